//! The operation dispatcher (spec.md §2, §4.3): the only code that turns a
//! decoded `Operation` into a call against the host-state contract. Kept
//! separate from `reader.rs`/`writer.rs` so the codec itself never depends
//! on `replay-state` beyond the trait objects it dispatches into.

use crate::operation::Operation;
use replay_common::ReplayResult;
use replay_state::{Lifecycle, StateBackend, ViewAndMutate};
use tracing::trace;

/// Applies one decoded operation to `backend`. Returns whatever the
/// underlying call returns is discarded; callers that need return values
/// (e.g. a delta-debugger wanting the previous balance) should call the
/// trait method directly instead of going through the dispatcher.
pub fn apply(op: &Operation, backend: &mut dyn StateBackend) -> ReplayResult<()> {
    trace!(?op, "dispatching trace operation");
    match op {
        Operation::BeginSyncPeriod { id } => backend.begin_sync_period(*id),
        Operation::EndSyncPeriod => backend.end_sync_period(),
        Operation::BeginBlock { number } => backend.begin_block(*number),
        Operation::EndBlock => backend.end_block(),
        Operation::BeginTransaction { index } => backend.begin_transaction(*index),
        Operation::EndTransaction => backend.end_transaction(),
        Operation::SetTxContext { tx_hash, tx_index } => backend.set_tx_context(*tx_hash, *tx_index),

        Operation::CreateAccount { address } => backend.create_account(*address),
        Operation::CreateContract { address } => backend.create_contract(*address),
        Operation::SelfDestruct { address } => backend.self_destruct(*address).map(|_| ()),
        Operation::SelfDestruct6780 { address } => backend.self_destruct_6780(*address).map(|_| ()),
        Operation::AddBalance { address, amount, .. } => backend.add_balance(*address, *amount).map(|_| ()),
        Operation::SubBalance { address, amount, .. } => backend.sub_balance(*address, *amount).map(|_| ()),
        Operation::SetNonce { address, nonce, .. } => backend.set_nonce(*address, *nonce),
        Operation::SetState { address, key, value } => backend.set_state(*address, *key, *value).map(|_| ()),
        Operation::SetTransientState { address, key, value } => {
            backend.set_transient_state(*address, *key, *value)
        }
        Operation::SetCode { address, code } => backend.set_code(*address, code.clone()).map(|_| ()),
        Operation::AddRefund { amount } => backend.add_refund(*amount),
        Operation::SubRefund { amount } => backend.sub_refund(*amount),
        Operation::Prepare { rules, sender, coinbase, dest, precompiles, tx_access_list } => {
            backend.prepare(*rules, *sender, *coinbase, *dest, precompiles, tx_access_list)
        }
        Operation::AddAddressToAccessList { address } => {
            backend.add_address_to_access_list(*address).map(|_| ())
        }
        Operation::AddSlotToAccessList { address, key } => {
            backend.add_slot_to_access_list(*address, *key).map(|_| ())
        }
        Operation::AddLog { address, topics, data } => {
            backend.add_log(*address, topics.clone(), data.clone())
        }
        Operation::GetLogs { tx_hash, block_number, block_hash, block_timestamp } => backend
            .get_logs(*tx_hash, *block_number, *block_hash, *block_timestamp)
            .map(|_| ()),
        Operation::Snapshot => backend.snapshot().map(|_| ()),
        Operation::RevertToSnapshot { id } => backend.revert_to_snapshot(*id as u64),
        Operation::AddPreimage { hash, preimage } => backend.add_preimage(*hash, preimage),

        // EVM-compatibility markers (Design Notes §9): inert beyond what the
        // contract already exposes through `get_hash`/`close`.
        Operation::Commit | Operation::IntermediateRoot { .. } => backend.get_hash().map(|_| ()),
        Operation::Finalise { .. } => Ok(()),
        Operation::Close => backend.close(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replay_common::Address;
    use replay_state::MemoryState;

    #[test]
    fn create_then_read_back_through_dispatch() {
        let mut backend = MemoryState::new();
        let a = Address::repeat_byte(9);
        apply(&Operation::BeginBlock { number: 1 }, &mut backend).unwrap();
        apply(&Operation::BeginTransaction { index: 0 }, &mut backend).unwrap();
        apply(&Operation::CreateAccount { address: a }, &mut backend).unwrap();
        apply(
            &Operation::AddBalance { address: a, amount: 100u64.into(), reason: 0 },
            &mut backend,
        )
        .unwrap();
        apply(&Operation::EndTransaction, &mut backend).unwrap();
        apply(&Operation::EndBlock, &mut backend).unwrap();
        assert_eq!(backend.get_balance(a).unwrap(), 100u64.into());
    }
}
