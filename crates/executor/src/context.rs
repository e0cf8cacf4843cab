//! Cancellation and deadline polling (spec.md §5): no operation suspends,
//! so a run only ever notices cancellation or a blown deadline at a block
//! boundary or immediately before a transaction — never mid-operation.

use replay_common::{ReplayError, ReplayResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub struct RunContext {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl RunContext {
    pub fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)), deadline: None }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)), deadline: Some(deadline) }
    }

    /// A shared handle another thread can flip to cancel this run.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub(crate) fn check(&self) -> ReplayResult<()> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(ReplayError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(ReplayError::Deadline);
            }
        }
        Ok(())
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
