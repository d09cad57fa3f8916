// Job execution settings shared by the orchestrator and its front-ends

use std::time::Duration;

pub const DEFAULT_MAX_JOBS: usize = 5;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_STOP_GRACE_SECS: u32 = 1;
/// Upper bound on the log bytes buffered for one sandbox
pub const DEFAULT_MAX_LOG_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierConfig {
    /// Number of sandboxes allowed to run at once
    pub max_jobs: usize,
    /// Execution deadline, armed once the sandbox has started
    pub timeout: Duration,
    /// Seconds the engine waits before killing a timed out sandbox
    pub stop_grace_secs: u32,
    /// Keep sandboxes around after the job for manual inspection
    pub keep_containers: bool,
    pub max_log_bytes: usize,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            max_jobs: DEFAULT_MAX_JOBS,
            timeout: DEFAULT_TIMEOUT,
            stop_grace_secs: DEFAULT_STOP_GRACE_SECS,
            keep_containers: false,
            max_log_bytes: DEFAULT_MAX_LOG_BYTES,
        }
    }
}

impl VerifierConfig {
    pub fn with_max_jobs(mut self, max_jobs: usize) -> Self {
        self.max_jobs = max_jobs.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_stop_grace_secs(mut self, secs: u32) -> Self {
        self.stop_grace_secs = secs;
        self
    }

    pub fn with_keep_containers(mut self, keep: bool) -> Self {
        self.keep_containers = keep;
        self
    }

    pub fn with_max_log_bytes(mut self, max_log_bytes: usize) -> Self {
        self.max_log_bytes = max_log_bytes;
        self
    }
}
