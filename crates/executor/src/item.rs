//! The unit of work a pipeline moves through its stages (spec.md §4.4):
//! either a transaction to re-execute through a VM, or a decoded trace
//! operation to replay directly against a state backend. Modeled as a
//! tagged variant of concrete kinds rather than a generic item type
//! parameter, so `Executor`/`Extension` stay free of a type parameter that
//! would otherwise infect every trait object in this crate.

use replay_common::H256;
use replay_trace::Operation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineItem {
    Transaction { tx_hash: H256 },
    Operation(Operation),
}

/// One item of work plus the block/transaction coordinates a provider
/// placed it at. `tx_index` is the position within the block's item list,
/// not necessarily the on-chain transaction index (a pseudo-transaction,
/// e.g. a withdrawal sweep, can occupy a slot with no real transaction).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    pub block: u64,
    pub tx_index: u64,
    pub item: PipelineItem,
}
