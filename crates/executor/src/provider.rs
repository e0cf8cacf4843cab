//! The pipeline's item source (spec.md §4.4 "provider"). Read-only and
//! `Send + Sync` on purpose, the same shape as the teacher's `Database`
//! trait, so block item lists can be produced ahead of time from multiple
//! threads (`parallel::prefetch`) before the single-writer apply phase.

use crate::item::TransactionInfo;
use replay_common::ReplayResult;

pub trait Provider: Send + Sync {
    /// Returns every item to run for `block`, in the order they must be
    /// applied. An empty vec is a valid (empty) block, not an error.
    fn items(&self, block: u64) -> ReplayResult<Vec<TransactionInfo>>;
}
