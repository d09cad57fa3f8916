/// Sandbox - drives one job's container from creation to removal.
///
/// **States:**
/// Built -> Created -> Started -> AwaitingCompletion -> {Completed | TimedOut}
/// -> ResultFetched -> Removed
///
/// **Critical Ordering:**
/// - The watcher subscription is registered before the container starts, so
///   a sandbox that ends instantly cannot be missed
/// - The deadline is armed once the container has started; image pulls and
///   creation latency do not eat into execution time
/// - A stop that reports "already stopped" means the sandbox beat the
///   deadline: the job completed, it did not time out
/// - Every path past creation goes through removal (unless containers are kept
///   for debugging), and a removal failure never replaces an earlier outcome

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose, Engine as _};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument, warn};
use verifier_common::config::VerifierConfig;
use verifier_common::runtime;
use verifier_common::types::{JobRequest, JobResult};

use crate::engine::{EngineClient, EngineError, SandboxSpec};
use crate::error::JobError;
use crate::logs;
use crate::response;
use crate::watcher::Watcher;

/// Reported in place of a decoded result when the deadline wins
pub const TIMEOUT_MESSAGE: &str = "execution exceeded the time limit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    Built,
    Created,
    Started,
    AwaitingCompletion,
    Completed,
    TimedOut,
    ResultFetched,
    Removed,
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Built => "built",
            Self::Created => "created",
            Self::Started => "started",
            Self::AwaitingCompletion => "awaiting_completion",
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::ResultFetched => "result_fetched",
            Self::Removed => "removed",
        };
        f.write_str(name)
    }
}

/// How the completion-or-deadline race ended
#[derive(Debug)]
pub enum Outcome {
    Completed,
    TimedOut,
    Failed(EngineError),
}

/// Build the container spec for a request.
///
/// The sandbox entrypoint receives `-e [--tests <b64 tests>] <b64 solution>`.
pub fn sandbox_spec(request: &JobRequest) -> Result<SandboxSpec, JobError> {
    let image = runtime::image_for(&request.runtime)
        .ok_or_else(|| JobError::UnsupportedRuntime(request.runtime.clone()))?;

    if request.solution.is_empty() {
        return Err(JobError::MissingSolution);
    }

    let mut cmd = vec!["-e".to_string()];
    if !request.tests.is_empty() {
        cmd.push("--tests".to_string());
        cmd.push(general_purpose::STANDARD.encode(&request.tests));
    }
    cmd.push(general_purpose::STANDARD.encode(&request.solution));

    Ok(SandboxSpec {
        image: image.to_string(),
        cmd,
        network_disabled: true,
        attach_stdin: false,
        attach_stdout: true,
        attach_stderr: false,
    })
}

pub struct Sandbox {
    engine: Arc<dyn EngineClient>,
    spec: SandboxSpec,
    container_id: Option<String>,
    state: SandboxState,
}

impl Sandbox {
    /// Validate the request and build its spec. Nothing touches the engine yet.
    pub fn new(engine: Arc<dyn EngineClient>, request: &JobRequest) -> Result<Self, JobError> {
        let spec = sandbox_spec(request)?;
        Ok(Self {
            engine,
            spec,
            container_id: None,
            state: SandboxState::Built,
        })
    }

    pub fn state(&self) -> SandboxState {
        self.state
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    pub async fn create(&mut self) -> Result<(), JobError> {
        let id = self.engine.create(&self.spec).await?;
        debug!(container_id = %id, image = %self.spec.image, "Container created");
        self.container_id = Some(id);
        self.state = SandboxState::Created;
        Ok(())
    }

    /// Start the container and spawn the task racing its end against the deadline.
    ///
    /// ## Returns
    /// A receiver for the race outcome. The task owns the sending half only.
    pub async fn start(
        &mut self,
        watcher: &Watcher,
        timeout: Duration,
        stop_grace_secs: u32,
    ) -> Result<oneshot::Receiver<Outcome>, JobError> {
        let id = self.created_id()?.to_string();

        let (stopped_tx, mut stopped_rx) = mpsc::channel(1);
        watcher.watch_stop(&id, stopped_tx);

        if let Err(e) = self.engine.start(&id).await {
            watcher.forget(&id);
            return Err(e.into());
        }
        self.state = SandboxState::Started;

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                Some(()) = stopped_rx.recv() => Outcome::Completed,
                _ = tokio::time::sleep(timeout) => {
                    debug!(container_id = %id, "Deadline reached, stopping container");
                    match engine.stop(&id, stop_grace_secs).await {
                        Ok(()) => Outcome::TimedOut,
                        Err(e) if e.is_already_stopped() => {
                            debug!(container_id = %id, "Container ended before the stop request");
                            Outcome::Completed
                        }
                        Err(e) => Outcome::Failed(e),
                    }
                }
            };
            // The job may have been dropped; nobody is left to tell.
            let _ = outcome_tx.send(outcome);
        });

        self.state = SandboxState::AwaitingCompletion;
        Ok(outcome_rx)
    }

    /// Run the created container to completion or deadline and harvest its result.
    pub async fn execute(
        &mut self,
        watcher: &Watcher,
        config: &VerifierConfig,
    ) -> Result<JobResult, JobError> {
        let outcome = self
            .start(watcher, config.timeout, config.stop_grace_secs)
            .await?;

        let outcome = outcome.await.map_err(|_| JobError::MonitorLost);
        if let Some(id) = self.container_id.as_deref() {
            // Covers deadlines whose stop event never reached the watcher.
            watcher.forget(id);
        }

        match outcome? {
            Outcome::Completed => {
                self.state = SandboxState::Completed;
                self.results(config.max_log_bytes).await
            }
            Outcome::TimedOut => {
                self.state = SandboxState::TimedOut;
                Ok(JobResult::failure(TIMEOUT_MESSAGE))
            }
            Outcome::Failed(e) => Err(e.into()),
        }
    }

    /// Fetch the stdout of a finished container and decode it.
    pub async fn results(&mut self, max_log_bytes: usize) -> Result<JobResult, JobError> {
        let id = self.created_id()?;
        let stream = self.engine.logs(id).await?;
        let streams = logs::demux(stream, max_log_bytes).await?;

        if !streams.stderr.is_empty() {
            debug!(
                container_id = %id,
                stderr = %String::from_utf8_lossy(&streams.stderr),
                "Container wrote to stderr"
            );
        }

        let result = response::decode(&streams.stdout)?;
        self.state = SandboxState::ResultFetched;
        Ok(result)
    }

    pub async fn remove(&mut self) -> Result<(), JobError> {
        let id = self.created_id()?;
        self.engine.remove(id).await?;
        self.state = SandboxState::Removed;
        Ok(())
    }

    fn created_id(&self) -> Result<&str, JobError> {
        self.container_id
            .as_deref()
            .ok_or_else(|| EngineError::internal("container was not created").into())
    }
}

/// Run one job end to end: create, start, await, harvest, remove.
#[instrument(skip_all, fields(runtime = %request.runtime))]
pub async fn run(
    engine: Arc<dyn EngineClient>,
    watcher: &Watcher,
    request: &JobRequest,
    config: &VerifierConfig,
) -> Result<JobResult, JobError> {
    let started = Instant::now();
    let mut sandbox = Sandbox::new(engine, request)?;
    sandbox.create().await?;

    let result = sandbox.execute(watcher, config).await;
    let container_id = sandbox.container_id().unwrap_or_default().to_string();

    if config.keep_containers {
        info!(container_id = %container_id, state = %sandbox.state(), "Keeping container for inspection");
    } else if let Err(e) = sandbox.remove().await {
        // A removal error would only be reported when nothing came before it,
        // but past creation `result` always holds a value or an earlier error.
        // It is logged and never replaces either.
        warn!(container_id = %container_id, error = %e, "Failed to remove container");
    }

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &result {
        Ok(outcome) => info!(
            container_id = %container_id,
            solved = outcome.solved,
            elapsed_ms,
            "Job finished"
        ),
        Err(e) => error!(
            container_id = %container_id,
            error = %e,
            elapsed_ms,
            "Job failed"
        ),
    }

    result
}
