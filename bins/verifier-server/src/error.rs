//! Job error taxonomy.
//!
//! Front-ends map `ErrorKind` to their own status codes; a timeout is not an
//! error and never shows up here.

use crate::engine::EngineError;
use crate::logs::FrameError;

/// Broad class of a job failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad request, rejected before any sandbox exists
    Validation,
    /// The container engine failed or could not be reached
    Engine,
    /// The sandbox ran but its output was unusable
    Protocol,
    /// The server is shutting down and no longer admits jobs
    Unavailable,
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Unknown runtime: {0}")]
    UnsupportedRuntime(String),

    #[error("The user solution was not specified")]
    MissingSolution,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Failed to read the sandbox output: {0}")]
    Framing(#[from] FrameError),

    #[error("Failed to parse response ({preview}): {source}")]
    Decode {
        #[source]
        source: serde_json::Error,
        preview: String,
    },

    /// A background task running the job, or racing completion against the
    /// deadline, went away without reporting.
    #[error("Sandbox monitor exited without an outcome")]
    MonitorLost,

    #[error("Server is shutting down")]
    ShuttingDown,
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedRuntime(_) | Self::MissingSolution => ErrorKind::Validation,
            Self::Engine(_) | Self::MonitorLost => ErrorKind::Engine,
            Self::Framing(_) | Self::Decode { .. } => ErrorKind::Protocol,
            Self::ShuttingDown => ErrorKind::Unavailable,
        }
    }
}
