// Admission Limiter - bounds how many sandboxes run at once

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::JobError;

/// Counted semaphore gating job admission.
///
/// Waiters are served in FIFO order. A slot is released when its `JobSlot`
/// is dropped, so early returns and panics cannot leak capacity.
#[derive(Debug, Clone)]
pub struct JobLimiter {
    slots: Arc<Semaphore>,
    capacity: usize,
}

/// One unit of admission capacity, held for the lifetime of a job
#[derive(Debug)]
pub struct JobSlot {
    _permit: OwnedSemaphorePermit,
}

impl JobLimiter {
    /// `max` below 1 is clamped to 1.
    pub fn new(max: usize) -> Self {
        let capacity = max.max(1);
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot.
    ///
    /// Fails only once the limiter has been closed for shutdown.
    pub async fn acquire(&self) -> Result<JobSlot, JobError> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| JobError::ShuttingDown)?;
        Ok(JobSlot { _permit: permit })
    }

    /// Stop admitting jobs. Waiting callers are rejected; running jobs keep their slot.
    pub fn close(&self) {
        self.slots.close();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}
