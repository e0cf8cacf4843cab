//! The pipeline's item sink (spec.md §4.4 "processor"): applies one item to
//! the state backend. `replay-proxy`'s recording/debug proxies wrap a
//! `StateBackend`, not a `Processor`, so a processor over `PipelineItem::Operation`
//! is just `replay_trace::apply` and a processor over `PipelineItem::Transaction`
//! is supplied by whatever VM integration drives this crate.

use crate::item::TransactionInfo;
use replay_common::ReplayResult;
use replay_state::StateBackend;

pub trait Processor {
    fn process(&mut self, info: &TransactionInfo, state: &mut dyn StateBackend) -> ReplayResult<()>;
}

/// A processor for traces: every item must be `PipelineItem::Operation`.
/// Grounded directly on `replay_trace::dispatch::apply`.
pub struct TraceProcessor;

impl Processor for TraceProcessor {
    fn process(&mut self, info: &TransactionInfo, state: &mut dyn StateBackend) -> ReplayResult<()> {
        match &info.item {
            crate::item::PipelineItem::Operation(op) => replay_trace::apply(op, state),
            crate::item::PipelineItem::Transaction { .. } => Err(replay_common::ReplayError::InvalidLifecycle(
                "TraceProcessor received a Transaction item, not a decoded Operation".into(),
            )),
        }
    }
}
