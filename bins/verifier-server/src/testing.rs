/// Scripted in-memory engine for tests.
///
/// Each container "runs" according to `Finish`, answers stop requests
/// according to `StopBehaviour`, and reports every call it received.
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;

use crate::engine::{EngineClient, EngineError, EventStream, LifecycleEvent, LogStream, SandboxSpec};
use crate::logs::{encode_frame, StreamType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(SandboxSpec),
    Start(String),
    Stop(String),
    Logs(String),
    Remove(String),
}

/// When a started container ends by itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finish {
    OnStart,
    After(Duration),
    Never,
}

/// How the engine answers a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBehaviour {
    Stops,
    AlreadyStopped,
    Fails,
}

pub struct FakeEngine {
    finish: Finish,
    stop: StopBehaviour,
    output: Vec<u8>,
    fail_create: bool,
    fail_start: bool,
    fail_logs: bool,
    fail_remove: bool,
    calls: Mutex<Vec<Call>>,
    next_id: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    events_tx: mpsc::UnboundedSender<LifecycleEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<LifecycleEvent>>>,
}

impl FakeEngine {
    /// Containers end as soon as they start and print `stdout`.
    pub fn new(stdout: &str) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            finish: Finish::OnStart,
            stop: StopBehaviour::Stops,
            output: encode_frame(StreamType::Stdout, stdout.as_bytes()).to_vec(),
            fail_create: false,
            fail_start: false,
            fail_logs: false,
            fail_remove: false,
            calls: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    pub fn finish(mut self, finish: Finish) -> Self {
        self.finish = finish;
        self
    }

    pub fn on_stop(mut self, stop: StopBehaviour) -> Self {
        self.stop = stop;
        self
    }

    /// Append a stderr frame after stdout.
    pub fn stderr(mut self, text: &str) -> Self {
        self.output
            .extend_from_slice(&encode_frame(StreamType::Stderr, text.as_bytes()));
        self
    }

    /// Replace the whole log stream with raw bytes.
    pub fn raw_output(mut self, bytes: &[u8]) -> Self {
        self.output = bytes.to_vec();
        self
    }

    pub fn fail_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn fail_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn fail_logs(mut self) -> Self {
        self.fail_logs = true;
        self
    }

    pub fn fail_remove(mut self) -> Self {
        self.fail_remove = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| matches(c)).count()
    }

    /// Containers created and not yet removed
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of containers alive at once
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Push an event as if the engine reported it.
    pub fn emit(&self, container_id: &str, status: &str) {
        let _ = self.events_tx.send(LifecycleEvent::new(container_id, status));
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl EngineClient for FakeEngine {
    async fn create(&self, spec: &SandboxSpec) -> Result<String, EngineError> {
        self.record(Call::Create(spec.clone()));
        if self.fail_create {
            return Err(EngineError::image_missing(&spec.image));
        }

        let id = format!("fake-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), EngineError> {
        self.record(Call::Start(id.to_string()));
        if self.fail_start {
            return Err(EngineError::internal("cannot start container"));
        }

        match self.finish {
            Finish::OnStart => self.emit(id, "die"),
            Finish::After(delay) => {
                let events = self.events_tx.clone();
                let id = id.to_string();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = events.send(LifecycleEvent::new(id, "die"));
                });
            }
            Finish::Never => {}
        }
        Ok(())
    }

    async fn stop(&self, id: &str, _grace_secs: u32) -> Result<(), EngineError> {
        self.record(Call::Stop(id.to_string()));
        match self.stop {
            StopBehaviour::Stops => {
                self.emit(id, "stop");
                Ok(())
            }
            StopBehaviour::AlreadyStopped => Err(EngineError::already_stopped(id)),
            StopBehaviour::Fails => Err(EngineError::transport("connection reset")),
        }
    }

    async fn logs(&self, id: &str) -> Result<LogStream, EngineError> {
        self.record(Call::Logs(id.to_string()));
        if self.fail_logs {
            return Err(EngineError::missing(id));
        }
        Ok(Box::pin(Cursor::new(self.output.clone())))
    }

    async fn remove(&self, id: &str) -> Result<(), EngineError> {
        self.record(Call::Remove(id.to_string()));
        if self.fail_remove {
            return Err(EngineError::internal("removal in progress"));
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn events(&self) -> EventStream {
        match self.events_rx.lock().unwrap().take() {
            Some(rx) => stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|event| (Ok(event), rx))
            })
            .boxed(),
            None => stream::pending().boxed(),
        }
    }
}
