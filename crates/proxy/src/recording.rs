//! Recording proxy (spec.md §2 "Proxy wrappers"): wraps a state backend and
//! tees every mutating call into a `TraceWriter`, so a live run can be
//! captured for later bit-identical replay. Grounded on the teacher's
//! `CachingDatabase` pattern of wrapping `inner: Arc<dyn Database>` and
//! forwarding every trait method, generalized here to record as it forwards
//! rather than to cache.
//!
//! `reason` bytes on balance/nonce changes are diagnostic metadata the host
//! contract itself does not carry (see `replay_state::contract::ViewAndMutate`);
//! the recorder always writes `0` for them. A VM integration that wants real
//! reason codes should build `Operation` values directly instead of going
//! through this proxy.

use bytes::Bytes;
use replay_common::{Address, Rules, H256, U256};
use replay_state::{ArchiveView, BulkLoader, Lifecycle, Log, Substate, ViewAndMutate};
use replay_trace::{Operation, TraceWriter};

pub struct RecordingState<S> {
    inner: S,
    writer: TraceWriter,
}

impl<S> RecordingState<S> {
    pub fn new(inner: S, first_block: u64, last_block: u64) -> Self {
        Self { inner, writer: TraceWriter::new(first_block, last_block) }
    }

    pub fn into_parts(self) -> (S, TraceWriter) {
        (self.inner, self.writer)
    }

    fn record(&mut self, op: Operation) {
        self.writer.write(&op);
    }
}

impl<S: ViewAndMutate> ViewAndMutate for RecordingState<S> {
    fn create_account(&mut self, address: Address) -> replay_common::ReplayResult<()> {
        let result = self.inner.create_account(address);
        if result.is_ok() {
            self.record(Operation::CreateAccount { address });
        }
        result
    }

    fn create_contract(&mut self, address: Address) -> replay_common::ReplayResult<()> {
        let result = self.inner.create_contract(address);
        if result.is_ok() {
            self.record(Operation::CreateContract { address });
        }
        result
    }

    fn exist(&self, address: Address) -> replay_common::ReplayResult<bool> {
        self.inner.exist(address)
    }

    fn empty(&self, address: Address) -> replay_common::ReplayResult<bool> {
        self.inner.empty(address)
    }

    fn self_destruct(&mut self, address: Address) -> replay_common::ReplayResult<U256> {
        let result = self.inner.self_destruct(address);
        if result.is_ok() {
            self.record(Operation::SelfDestruct { address });
        }
        result
    }

    fn self_destruct_6780(&mut self, address: Address) -> replay_common::ReplayResult<(U256, bool)> {
        let result = self.inner.self_destruct_6780(address);
        if result.is_ok() {
            self.record(Operation::SelfDestruct6780 { address });
        }
        result
    }

    fn has_self_destructed(&self, address: Address) -> replay_common::ReplayResult<bool> {
        self.inner.has_self_destructed(address)
    }

    fn get_balance(&self, address: Address) -> replay_common::ReplayResult<U256> {
        self.inner.get_balance(address)
    }

    fn add_balance(&mut self, address: Address, amount: U256) -> replay_common::ReplayResult<U256> {
        let result = self.inner.add_balance(address, amount);
        if result.is_ok() {
            self.record(Operation::AddBalance { address, amount, reason: 0 });
        }
        result
    }

    fn sub_balance(&mut self, address: Address, amount: U256) -> replay_common::ReplayResult<U256> {
        let result = self.inner.sub_balance(address, amount);
        if result.is_ok() {
            self.record(Operation::SubBalance { address, amount, reason: 0 });
        }
        result
    }

    fn get_nonce(&self, address: Address) -> replay_common::ReplayResult<u64> {
        self.inner.get_nonce(address)
    }

    fn set_nonce(&mut self, address: Address, nonce: u64) -> replay_common::ReplayResult<()> {
        let result = self.inner.set_nonce(address, nonce);
        if result.is_ok() {
            self.record(Operation::SetNonce { address, nonce, reason: 0 });
        }
        result
    }

    fn get_committed_state(&self, address: Address, key: H256) -> replay_common::ReplayResult<H256> {
        self.inner.get_committed_state(address, key)
    }

    fn get_state(&self, address: Address, key: H256) -> replay_common::ReplayResult<H256> {
        self.inner.get_state(address, key)
    }

    fn set_state(&mut self, address: Address, key: H256, value: H256) -> replay_common::ReplayResult<H256> {
        let result = self.inner.set_state(address, key, value);
        if result.is_ok() {
            self.record(Operation::SetState { address, key, value });
        }
        result
    }

    fn get_storage_root(&self, address: Address) -> replay_common::ReplayResult<H256> {
        self.inner.get_storage_root(address)
    }

    fn set_transient_state(&mut self, address: Address, key: H256, value: H256) -> replay_common::ReplayResult<()> {
        let result = self.inner.set_transient_state(address, key, value);
        if result.is_ok() {
            self.record(Operation::SetTransientState { address, key, value });
        }
        result
    }

    fn get_transient_state(&self, address: Address, key: H256) -> replay_common::ReplayResult<H256> {
        self.inner.get_transient_state(address, key)
    }

    fn get_code_hash(&self, address: Address) -> replay_common::ReplayResult<H256> {
        self.inner.get_code_hash(address)
    }

    fn get_code(&self, address: Address) -> replay_common::ReplayResult<Bytes> {
        self.inner.get_code(address)
    }

    fn set_code(&mut self, address: Address, code: Bytes) -> replay_common::ReplayResult<Bytes> {
        let result = self.inner.set_code(address, code.clone());
        if result.is_ok() {
            self.record(Operation::SetCode { address, code });
        }
        result
    }

    fn get_code_size(&self, address: Address) -> replay_common::ReplayResult<usize> {
        self.inner.get_code_size(address)
    }

    fn add_refund(&mut self, amount: u64) -> replay_common::ReplayResult<()> {
        let result = self.inner.add_refund(amount);
        if result.is_ok() {
            self.record(Operation::AddRefund { amount });
        }
        result
    }

    fn sub_refund(&mut self, amount: u64) -> replay_common::ReplayResult<()> {
        let result = self.inner.sub_refund(amount);
        if result.is_ok() {
            self.record(Operation::SubRefund { amount });
        }
        result
    }

    fn get_refund(&self) -> replay_common::ReplayResult<u64> {
        self.inner.get_refund()
    }

    fn prepare(
        &mut self,
        rules: Rules,
        sender: Address,
        coinbase: Address,
        dest: Option<Address>,
        precompiles: &[Address],
        tx_access_list: &[(Address, Vec<H256>)],
    ) -> replay_common::ReplayResult<()> {
        let result = self.inner.prepare(rules, sender, coinbase, dest, precompiles, tx_access_list);
        if result.is_ok() {
            self.record(Operation::Prepare {
                rules,
                sender,
                coinbase,
                dest,
                precompiles: precompiles.to_vec(),
                tx_access_list: tx_access_list.to_vec(),
            });
        }
        result
    }

    fn address_in_access_list(&self, address: Address) -> replay_common::ReplayResult<bool> {
        self.inner.address_in_access_list(address)
    }

    fn slot_in_access_list(&self, address: Address, key: H256) -> replay_common::ReplayResult<bool> {
        self.inner.slot_in_access_list(address, key)
    }

    fn add_address_to_access_list(&mut self, address: Address) -> replay_common::ReplayResult<bool> {
        let result = self.inner.add_address_to_access_list(address);
        if result.is_ok() {
            self.record(Operation::AddAddressToAccessList { address });
        }
        result
    }

    fn add_slot_to_access_list(&mut self, address: Address, key: H256) -> replay_common::ReplayResult<bool> {
        let result = self.inner.add_slot_to_access_list(address, key);
        if result.is_ok() {
            self.record(Operation::AddSlotToAccessList { address, key });
        }
        result
    }

    fn add_log(&mut self, address: Address, topics: Vec<H256>, data: Bytes) -> replay_common::ReplayResult<()> {
        let result = self.inner.add_log(address, topics.clone(), data.clone());
        if result.is_ok() {
            self.record(Operation::AddLog { address, topics, data });
        }
        result
    }

    fn get_logs(
        &mut self,
        tx_hash: H256,
        block_number: u64,
        block_hash: H256,
        block_timestamp: u64,
    ) -> replay_common::ReplayResult<Vec<Log>> {
        let result = self.inner.get_logs(tx_hash, block_number, block_hash, block_timestamp);
        if result.is_ok() {
            self.record(Operation::GetLogs { tx_hash, block_number, block_hash, block_timestamp });
        }
        result
    }

    fn snapshot(&mut self) -> replay_common::ReplayResult<u64> {
        let result = self.inner.snapshot();
        if result.is_ok() {
            self.record(Operation::Snapshot);
        }
        result
    }

    fn revert_to_snapshot(&mut self, id: u64) -> replay_common::ReplayResult<()> {
        let result = self.inner.revert_to_snapshot(id);
        if result.is_ok() {
            self.record(Operation::RevertToSnapshot { id: id as u32 });
        }
        result
    }

    fn begin_transaction(&mut self, index: u64) -> replay_common::ReplayResult<()> {
        let result = self.inner.begin_transaction(index);
        if result.is_ok() {
            self.record(Operation::BeginTransaction { index });
        }
        result
    }

    fn end_transaction(&mut self) -> replay_common::ReplayResult<()> {
        let result = self.inner.end_transaction();
        if result.is_ok() {
            self.record(Operation::EndTransaction);
        }
        result
    }

    fn set_tx_context(&mut self, tx_hash: H256, tx_index: u64) -> replay_common::ReplayResult<()> {
        let result = self.inner.set_tx_context(tx_hash, tx_index);
        if result.is_ok() {
            self.record(Operation::SetTxContext { tx_hash, tx_index });
        }
        result
    }

    fn get_substate_post_alloc(&self) -> replay_common::ReplayResult<Substate> {
        self.inner.get_substate_post_alloc()
    }

    fn add_preimage(&mut self, hash: H256, preimage: &[u8]) -> replay_common::ReplayResult<()> {
        let result = self.inner.add_preimage(hash, preimage);
        if result.is_ok() {
            self.record(Operation::AddPreimage { hash, preimage: Bytes::copy_from_slice(preimage) });
        }
        result
    }
}

impl<S: Lifecycle> Lifecycle for RecordingState<S> {
    fn begin_block(&mut self, number: u64) -> replay_common::ReplayResult<()> {
        let result = self.inner.begin_block(number);
        if result.is_ok() {
            self.record(Operation::BeginBlock { number });
        }
        result
    }

    fn end_block(&mut self) -> replay_common::ReplayResult<()> {
        let result = self.inner.end_block();
        if result.is_ok() {
            self.record(Operation::EndBlock);
        }
        result
    }

    fn begin_sync_period(&mut self, id: u64) -> replay_common::ReplayResult<()> {
        let result = self.inner.begin_sync_period(id);
        if result.is_ok() {
            self.record(Operation::BeginSyncPeriod { id });
        }
        result
    }

    fn end_sync_period(&mut self) -> replay_common::ReplayResult<()> {
        let result = self.inner.end_sync_period();
        if result.is_ok() {
            self.record(Operation::EndSyncPeriod);
        }
        result
    }

    fn get_hash(&self) -> replay_common::ReplayResult<H256> {
        self.inner.get_hash()
    }

    fn close(&mut self) -> replay_common::ReplayResult<()> {
        let result = self.inner.close();
        if result.is_ok() {
            self.record(Operation::Close);
        }
        result
    }

    fn start_bulk_load(&mut self, block: u64) -> replay_common::ReplayResult<Box<dyn BulkLoader + '_>> {
        self.inner.start_bulk_load(block)
    }

    fn get_archive_state(&self, block: u64) -> replay_common::ReplayResult<Box<dyn ArchiveView>> {
        self.inner.get_archive_state(block)
    }

    fn get_archive_block_height(&self) -> replay_common::ReplayResult<Option<u64>> {
        self.inner.get_archive_block_height()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replay_state::MemoryState;

    #[test]
    fn a_mutating_call_is_both_applied_and_recorded() {
        let a = Address::repeat_byte(1);
        let mut recorder = RecordingState::new(MemoryState::new(), 0, 0);
        recorder.create_account(a).unwrap();
        recorder.add_balance(a, 10u64.into()).unwrap();

        assert!(recorder.exist(a).unwrap());
        let (_, writer) = recorder.into_parts();
        let bytes = writer.into_bytes();

        let mut reader = replay_trace::TraceReader::new(&bytes).unwrap();
        let mut replayed = MemoryState::new();
        while let Some(op) = reader.next_operation().unwrap() {
            replay_trace::apply(&op, &mut replayed).unwrap();
        }
        assert!(replayed.exist(a).unwrap());
        assert_eq!(replayed.get_balance(a).unwrap(), 10u64.into());
    }
}
