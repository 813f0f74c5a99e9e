use crate::error::ScanError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Per-invocation query state: which worker runs this part of the scan, how
/// the enclosing query reads arrays, and a cancellation flag shared by every
/// worker of the query.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub query_id: u64,
    pub worker_id: usize,
    pub coordinator_id: usize,
    /// Reads tolerate missing replicas; output partitioning is not guaranteed.
    pub degraded_read: bool,
    cancel: Arc<AtomicBool>,
}

impl QueryContext {
    pub fn new(query_id: u64) -> Self {
        Self {
            query_id,
            worker_id: 0,
            coordinator_id: 0,
            degraded_read: false,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Same query and cancellation flag, running on `worker_id`.
    pub fn for_worker(&self, worker_id: usize) -> Self {
        Self {
            worker_id,
            ..self.clone()
        }
    }

    pub fn with_degraded_read(mut self, degraded_read: bool) -> Self {
        self.degraded_read = degraded_read;
        self
    }

    pub fn is_coordinator(&self) -> bool {
        self.worker_id == self.coordinator_id
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: Arc::clone(&self.cancel),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    pub fn check_cancelled(&self) -> Result<(), ScanError> {
        if self.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        Ok(())
    }
}

/// Cancels every worker of one query.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }
}
