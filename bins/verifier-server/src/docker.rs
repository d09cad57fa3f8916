// Docker container management using Bollard

use std::collections::HashMap;
use std::io;
use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerInspectResponse, EventMessage};
use bollard::system::EventsOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

use crate::engine::{EngineClient, EngineError, EventStream, LifecycleEvent, LogStream, SandboxSpec};
use crate::logs::{encode_frame, StreamType};

/// Seconds before a request to the daemon is abandoned
const REQUEST_TIMEOUT_SECS: u64 = 120;

const KEY_FILE: &str = "key.pem";
const CERT_FILE: &str = "cert.pem";
const CA_FILE: &str = "ca.pem";

/// Which call an error came from; the same status means different things per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Create,
    Start,
    Stop,
    Logs,
    Remove,
    Inspect,
}

/// Engine Client backed by the Docker remote API
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect to a daemon at `host` (`unix://`, `tcp://`, `http://` or `https://`).
    ///
    /// TLS is used for TCP hosts when `cert_dir` holds `key.pem`, `cert.pem` and `ca.pem`.
    pub fn connect(host: &str, cert_dir: Option<&Path>) -> Result<Self> {
        let docker = if host.starts_with("unix://") {
            Docker::connect_with_unix(host, REQUEST_TIMEOUT_SECS, API_DEFAULT_VERSION)
                .with_context(|| format!("Failed to connect to Docker socket {}", host))?
        } else if host.starts_with("tcp://") || host.starts_with("http://") || host.starts_with("https://") {
            match cert_dir {
                Some(dir) => {
                    let key = require_file(dir, KEY_FILE)?;
                    let cert = require_file(dir, CERT_FILE)?;
                    let ca = require_file(dir, CA_FILE)?;
                    Docker::connect_with_ssl(
                        host,
                        &key,
                        &cert,
                        &ca,
                        REQUEST_TIMEOUT_SECS,
                        API_DEFAULT_VERSION,
                    )
                    .with_context(|| format!("Failed to connect to Docker over TLS at {}", host))?
                }
                None => Docker::connect_with_http(host, REQUEST_TIMEOUT_SECS, API_DEFAULT_VERSION)
                    .with_context(|| format!("Failed to connect to Docker at {}", host))?,
            }
        } else {
            bail!("Unsupported Docker host URL: {}", host);
        };

        Ok(Self { docker })
    }

    /// Check the daemon answers
    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .context("Cannot ping Docker daemon. Is Docker running?")?;
        Ok(())
    }
}

#[async_trait]
impl EngineClient for DockerEngine {
    async fn create(&self, spec: &SandboxSpec) -> Result<String, EngineError> {
        let options = CreateContainerOptions {
            name: format!("verifier-{}", uuid::Uuid::new_v4()),
            platform: None,
        };
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            network_disabled: Some(spec.network_disabled),
            attach_stdin: Some(spec.attach_stdin),
            attach_stdout: Some(spec.attach_stdout),
            attach_stderr: Some(spec.attach_stderr),
            tty: Some(false),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| engine_error(e, Op::Create, &spec.image))?;

        if !response.warnings.is_empty() {
            warn!(container_id = %response.id, warnings = ?response.warnings, "Container creation warning");
        }
        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| engine_error(e, Op::Start, id))
    }

    async fn stop(&self, id: &str, grace_secs: u32) -> Result<(), EngineError> {
        // The daemon answers 304 for an already stopped container, which
        // bollard reports as success; ask first so the race stays visible.
        // A container exiting between this inspect and the stop below is
        // still reported as stopped by us.
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| engine_error(e, Op::Inspect, id))?;
        if !is_running(&inspect) {
            return Err(EngineError::already_stopped(id));
        }

        self.docker
            .stop_container(id, Some(StopContainerOptions { t: i64::from(grace_secs) }))
            .await
            .map_err(|e| engine_error(e, Op::Stop, id))
    }

    async fn logs(&self, id: &str) -> Result<LogStream, EngineError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: false,
            follow: false,
            ..Default::default()
        };
        let mut output = Box::pin(self.docker.logs(id, Some(options)));

        // Pull the first chunk here so a missing container surfaces as an
        // engine error rather than a read error halfway through parsing.
        let first = output
            .next()
            .await
            .transpose()
            .map_err(|e| engine_error(e, Op::Logs, id))?;

        let frames = stream::iter(first.map(Ok))
            .chain(output)
            .map(|chunk| chunk.map(reframe).map_err(|e| io::Error::new(io::ErrorKind::Other, e)))
            .boxed();

        Ok(Box::pin(StreamReader::new(frames)))
    }

    async fn remove(&self, id: &str) -> Result<(), EngineError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| engine_error(e, Op::Remove, id))?;
        debug!(container_id = %id, "Container removed");
        Ok(())
    }

    fn events(&self) -> EventStream {
        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);
        let options = EventsOptions::<String> {
            filters,
            ..Default::default()
        };

        info!("Monitoring Docker container events");
        self.docker
            .events(Some(options))
            .filter_map(|message| async move {
                match message {
                    Ok(message) => lifecycle_event(message).map(Ok),
                    Err(e) => Some(Err(EngineError::transport(e.to_string()))),
                }
            })
            .boxed()
    }
}

fn is_running(inspect: &ContainerInspectResponse) -> bool {
    inspect
        .state
        .as_ref()
        .and_then(|state| state.running)
        .unwrap_or(false)
}

/// Bollard hands back demultiplexed chunks; put them back on the wire format.
fn reframe(output: LogOutput) -> Bytes {
    match output {
        LogOutput::StdOut { message } | LogOutput::Console { message } => {
            encode_frame(StreamType::Stdout, &message)
        }
        LogOutput::StdErr { message } => encode_frame(StreamType::Stderr, &message),
        LogOutput::StdIn { message } => encode_frame(StreamType::Stdin, &message),
    }
}

fn lifecycle_event(message: EventMessage) -> Option<LifecycleEvent> {
    let status = message.action?;
    let container_id = message.actor.and_then(|actor| actor.id)?;
    Some(LifecycleEvent::new(container_id, status))
}

/// Map a daemon error to the engine error kinds, per call.
fn engine_error(err: BollardError, op: Op, target: &str) -> EngineError {
    match err {
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => match (status_code, op) {
            // bollard 0.17 reports 304 as success; these only apply if that changes.
            (304, Op::Start) => EngineError::already_started(target),
            (304, Op::Stop) => EngineError::already_stopped(target),
            (404, Op::Create) => EngineError::image_missing(target),
            (404, _) => EngineError::missing(target),
            (400, _) => EngineError::bad_request(message),
            (500, _) => EngineError::internal(message),
            (code, _) => EngineError::internal(format!("{} (status {})", message, code)),
        },
        other => EngineError::transport(other.to_string()),
    }
}

fn require_file(dir: &Path, name: &str) -> Result<std::path::PathBuf> {
    let path = dir.join(name);
    if !path.is_file() {
        bail!("Failed to find '{}' in '{}'", name, dir.display());
    }
    Ok(path)
}
