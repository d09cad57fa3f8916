/// Engine Client - the narrow capability surface the orchestrator needs
/// from a container engine.
///
/// **Responsibility:**
/// Create, start, stop, remove and read the logs of one sandbox, and feed
/// lifecycle events for every sandbox the engine manages.
///
/// **Boundary:**
/// - The orchestrator only ever talks to this trait
/// - Transport (unix socket, TCP, TLS) is the implementor's concern
/// - `logs` hands back the engine's raw multiplexed stream; parsing it is
///   the job of `logs::demux`
///
/// Production uses `DockerEngine` (docker.rs); tests use an in-memory fake.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// Raw multiplexed output of a sandbox
pub type LogStream = Pin<Box<dyn AsyncRead + Send>>;

/// Push-feed of lifecycle events, never ends on its own while the engine is reachable
pub type EventStream = BoxStream<'static, Result<LifecycleEvent, EngineError>>;

/// Event statuses meaning the sandbox is no longer running
pub const ENDED_STATUSES: [&str; 3] = ["die", "kill", "stop"];

/// Everything the engine needs to create one sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    pub image: String,
    pub cmd: Vec<String>,
    pub network_disabled: bool,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
}

/// A state transition reported by the engine for one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub container_id: String,
    pub status: String,
}

impl LifecycleEvent {
    pub fn new(container_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            status: status.into(),
        }
    }

    /// True for die, kill and stop events
    pub fn is_ended(&self) -> bool {
        ENDED_STATUSES.contains(&self.status.as_str())
    }
}

#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Create a sandbox and return its engine-assigned id.
    async fn create(&self, spec: &SandboxSpec) -> Result<String, EngineError>;

    async fn start(&self, id: &str) -> Result<(), EngineError>;

    /// Ask the engine to stop a sandbox, killing it after `grace_secs`.
    ///
    /// Must report `EngineError::AlreadyStopped` when the sandbox had
    /// already ended; the orchestrator relies on it to resolve timeouts.
    async fn stop(&self, id: &str, grace_secs: u32) -> Result<(), EngineError>;

    /// Stdout of a finished sandbox, in the engine's framed format.
    async fn logs(&self, id: &str) -> Result<LogStream, EngineError>;

    async fn remove(&self, id: &str) -> Result<(), EngineError>;

    /// Subscribe to lifecycle events. May be called again after a feed ends.
    fn events(&self) -> EventStream;
}

/// Failures reported by, or while talking to, the container engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Image '{image}' not found")]
    ImageMissing { image: String },

    #[error("Container {id} already started")]
    AlreadyStarted { id: String },

    #[error("Container {id} already stopped")]
    AlreadyStopped { id: String },

    #[error("Container {id} is missing")]
    Missing { id: String },

    #[error("Engine rejected the request: {message}")]
    BadRequest { message: String },

    #[error("Engine internal error: {message}")]
    Internal { message: String },

    /// Could not reach the engine, or the connection broke mid-request.
    #[error("Engine transport error: {message}")]
    Transport { message: String },
}

impl EngineError {
    pub fn image_missing(image: impl Into<String>) -> Self {
        Self::ImageMissing { image: image.into() }
    }

    pub fn already_started(id: impl Into<String>) -> Self {
        Self::AlreadyStarted { id: id.into() }
    }

    pub fn already_stopped(id: impl Into<String>) -> Self {
        Self::AlreadyStopped { id: id.into() }
    }

    pub fn missing(id: impl Into<String>) -> Self {
        Self::Missing { id: id.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn is_already_stopped(&self) -> bool {
        matches!(self, Self::AlreadyStopped { .. })
    }
}
