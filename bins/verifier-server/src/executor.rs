/// Job Executor - High-Level Orchestration
///
/// **Responsibility:**
/// The single entry point front-ends call to verify a solution.
///
/// **Architecture:**
/// 1. Wait for an admission slot (limiter.rs)
/// 2. Run the sandbox lifecycle (container.rs), fed by the shared watcher
/// 3. Release the slot, whatever happened
///
/// Steps 2 and 3 run on their own task, so a caller that goes away
/// (a client disconnecting mid-job) never leaks a container or a slot.
///
/// This module is the glue layer - it knows nothing about:
/// - How the engine is reached (docker.rs)
/// - How output is parsed (logs.rs, response.rs)

use std::sync::Arc;

use tracing::error;

use verifier_common::config::VerifierConfig;
use verifier_common::runtime;
use verifier_common::types::{JobRequest, JobResult};

use crate::container;
use crate::engine::EngineClient;
use crate::error::JobError;
use crate::limiter::JobLimiter;
use crate::watcher::Watcher;

pub struct Executor {
    engine: Arc<dyn EngineClient>,
    watcher: Arc<Watcher>,
    limiter: JobLimiter,
    config: VerifierConfig,
}

impl Executor {
    /// The watcher must already be consuming `engine`'s event feed.
    pub fn new(engine: Arc<dyn EngineClient>, watcher: Arc<Watcher>, config: VerifierConfig) -> Self {
        let limiter = JobLimiter::new(config.max_jobs);
        Self {
            engine,
            watcher,
            limiter,
            config,
        }
    }

    /// Run one job, waiting for a free slot first.
    ///
    /// A timeout is reported as an unsolved `JobResult`, not as an error.
    pub async fn run_job(&self, request: JobRequest) -> Result<JobResult, JobError> {
        let slot = self.limiter.acquire().await?;
        let engine = Arc::clone(&self.engine);
        let watcher = Arc::clone(&self.watcher);
        let config = self.config.clone();

        let job = tokio::spawn(async move {
            // Held until the sandbox is gone, not until the caller returns.
            let _slot = slot;
            container::run(engine, &watcher, &request, &config).await
        });

        job.await.map_err(|e| {
            error!(error = %e, "Job task ended without an outcome");
            JobError::MonitorLost
        })?
    }

    pub fn list_supported_runtimes(&self) -> Vec<String> {
        runtime::supported_runtimes()
    }

    /// Reject jobs still waiting for a slot; running jobs finish.
    pub fn shutdown(&self) {
        self.limiter.close();
    }

    pub fn limiter(&self) -> &JobLimiter {
        &self.limiter
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }
}
