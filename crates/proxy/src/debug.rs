//! Debug/logging proxy (spec.md §2 "Proxy wrappers"): wraps a state backend
//! and logs every mutating call at `trace` level via `tracing`, the same
//! structured-logging crate the teacher uses throughout its VM layer. Pure
//! reads are not logged; they are too frequent to be useful and would drown
//! out the mutation trail this proxy exists to surface.

use bytes::Bytes;
use replay_common::{Address, Rules, H256, U256};
use replay_state::{ArchiveView, BulkLoader, Lifecycle, Log, Substate, ViewAndMutate};
use tracing::trace;

pub struct DebugState<S> {
    inner: S,
}

impl<S> DebugState<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: ViewAndMutate> ViewAndMutate for DebugState<S> {
    fn create_account(&mut self, address: Address) -> replay_common::ReplayResult<()> {
        trace!(?address, "create_account");
        self.inner.create_account(address)
    }

    fn create_contract(&mut self, address: Address) -> replay_common::ReplayResult<()> {
        trace!(?address, "create_contract");
        self.inner.create_contract(address)
    }

    fn exist(&self, address: Address) -> replay_common::ReplayResult<bool> {
        self.inner.exist(address)
    }

    fn empty(&self, address: Address) -> replay_common::ReplayResult<bool> {
        self.inner.empty(address)
    }

    fn self_destruct(&mut self, address: Address) -> replay_common::ReplayResult<U256> {
        trace!(?address, "self_destruct");
        self.inner.self_destruct(address)
    }

    fn self_destruct_6780(&mut self, address: Address) -> replay_common::ReplayResult<(U256, bool)> {
        trace!(?address, "self_destruct_6780");
        self.inner.self_destruct_6780(address)
    }

    fn has_self_destructed(&self, address: Address) -> replay_common::ReplayResult<bool> {
        self.inner.has_self_destructed(address)
    }

    fn get_balance(&self, address: Address) -> replay_common::ReplayResult<U256> {
        self.inner.get_balance(address)
    }

    fn add_balance(&mut self, address: Address, amount: U256) -> replay_common::ReplayResult<U256> {
        trace!(?address, %amount, "add_balance");
        self.inner.add_balance(address, amount)
    }

    fn sub_balance(&mut self, address: Address, amount: U256) -> replay_common::ReplayResult<U256> {
        trace!(?address, %amount, "sub_balance");
        self.inner.sub_balance(address, amount)
    }

    fn get_nonce(&self, address: Address) -> replay_common::ReplayResult<u64> {
        self.inner.get_nonce(address)
    }

    fn set_nonce(&mut self, address: Address, nonce: u64) -> replay_common::ReplayResult<()> {
        trace!(?address, nonce, "set_nonce");
        self.inner.set_nonce(address, nonce)
    }

    fn get_committed_state(&self, address: Address, key: H256) -> replay_common::ReplayResult<H256> {
        self.inner.get_committed_state(address, key)
    }

    fn get_state(&self, address: Address, key: H256) -> replay_common::ReplayResult<H256> {
        self.inner.get_state(address, key)
    }

    fn set_state(&mut self, address: Address, key: H256, value: H256) -> replay_common::ReplayResult<H256> {
        trace!(?address, ?key, ?value, "set_state");
        self.inner.set_state(address, key, value)
    }

    fn get_storage_root(&self, address: Address) -> replay_common::ReplayResult<H256> {
        self.inner.get_storage_root(address)
    }

    fn set_transient_state(&mut self, address: Address, key: H256, value: H256) -> replay_common::ReplayResult<()> {
        trace!(?address, ?key, ?value, "set_transient_state");
        self.inner.set_transient_state(address, key, value)
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
        trace!(?address, len = code.len(), "set_code");
        self.inner.set_code(address, code)
    }

    fn get_code_size(&self, address: Address) -> replay_common::ReplayResult<usize> {
        self.inner.get_code_size(address)
    }

    fn add_refund(&mut self, amount: u64) -> replay_common::ReplayResult<()> {
        trace!(amount, "add_refund");
        self.inner.add_refund(amount)
    }

    fn sub_refund(&mut self, amount: u64) -> replay_common::ReplayResult<()> {
        trace!(amount, "sub_refund");
        self.inner.sub_refund(amount)
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
        trace!(?sender, ?coinbase, ?dest, "prepare");
        self.inner.prepare(rules, sender, coinbase, dest, precompiles, tx_access_list)
    }

    fn address_in_access_list(&self, address: Address) -> replay_common::ReplayResult<bool> {
        self.inner.address_in_access_list(address)
    }

    fn slot_in_access_list(&self, address: Address, key: H256) -> replay_common::ReplayResult<bool> {
        self.inner.slot_in_access_list(address, key)
    }

    fn add_address_to_access_list(&mut self, address: Address) -> replay_common::ReplayResult<bool> {
        trace!(?address, "add_address_to_access_list");
        self.inner.add_address_to_access_list(address)
    }

    fn add_slot_to_access_list(&mut self, address: Address, key: H256) -> replay_common::ReplayResult<bool> {
        trace!(?address, ?key, "add_slot_to_access_list");
        self.inner.add_slot_to_access_list(address, key)
    }

    fn add_log(&mut self, address: Address, topics: Vec<H256>, data: Bytes) -> replay_common::ReplayResult<()> {
        trace!(?address, topic_count = topics.len(), "add_log");
        self.inner.add_log(address, topics, data)
    }

    fn get_logs(
        &mut self,
        tx_hash: H256,
        block_number: u64,
        block_hash: H256,
        block_timestamp: u64,
    ) -> replay_common::ReplayResult<Vec<Log>> {
        trace!(?tx_hash, block_number, "get_logs");
        self.inner.get_logs(tx_hash, block_number, block_hash, block_timestamp)
    }

    fn snapshot(&mut self) -> replay_common::ReplayResult<u64> {
        let id = self.inner.snapshot();
        trace!(?id, "snapshot");
        id
    }

    fn revert_to_snapshot(&mut self, id: u64) -> replay_common::ReplayResult<()> {
        trace!(id, "revert_to_snapshot");
        self.inner.revert_to_snapshot(id)
    }

    fn begin_transaction(&mut self, index: u64) -> replay_common::ReplayResult<()> {
        trace!(index, "begin_transaction");
        self.inner.begin_transaction(index)
    }

    fn end_transaction(&mut self) -> replay_common::ReplayResult<()> {
        trace!("end_transaction");
        self.inner.end_transaction()
    }

    fn set_tx_context(&mut self, tx_hash: H256, tx_index: u64) -> replay_common::ReplayResult<()> {
        trace!(?tx_hash, tx_index, "set_tx_context");
        self.inner.set_tx_context(tx_hash, tx_index)
    }

    fn get_substate_post_alloc(&self) -> replay_common::ReplayResult<Substate> {
        self.inner.get_substate_post_alloc()
    }

    fn add_preimage(&mut self, hash: H256, preimage: &[u8]) -> replay_common::ReplayResult<()> {
        trace!(?hash, len = preimage.len(), "add_preimage");
        self.inner.add_preimage(hash, preimage)
    }
}

impl<S: Lifecycle> Lifecycle for DebugState<S> {
    fn begin_block(&mut self, number: u64) -> replay_common::ReplayResult<()> {
        trace!(number, "begin_block");
        self.inner.begin_block(number)
    }

    fn end_block(&mut self) -> replay_common::ReplayResult<()> {
        trace!("end_block");
        self.inner.end_block()
    }

    fn begin_sync_period(&mut self, id: u64) -> replay_common::ReplayResult<()> {
        trace!(id, "begin_sync_period");
        self.inner.begin_sync_period(id)
    }

    fn end_sync_period(&mut self) -> replay_common::ReplayResult<()> {
        trace!("end_sync_period");
        self.inner.end_sync_period()
    }

    fn get_hash(&self) -> replay_common::ReplayResult<H256> {
        self.inner.get_hash()
    }

    fn close(&mut self) -> replay_common::ReplayResult<()> {
        trace!("close");
        self.inner.close()
    }

    fn start_bulk_load(&mut self, block: u64) -> replay_common::ReplayResult<Box<dyn BulkLoader + '_>> {
        trace!(block, "start_bulk_load");
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
    fn wrapping_does_not_change_observable_behavior() {
        let a = Address::repeat_byte(3);
        let mut debugged = DebugState::new(MemoryState::new());
        debugged.create_account(a).unwrap();
        debugged.add_balance(a, 5u64.into()).unwrap();
        assert_eq!(debugged.get_balance(a).unwrap(), 5u64.into());
    }
}
