//! The reference in-memory backend (spec.md §4.2.1): the canonical
//! semantics, and the shadow comparator every other backend is tested
//! against. A tower of sparse overlays sits on top of a persistently
//! committed base frame; reads walk top to bottom, writes land in the top
//! frame only.

use crate::contract::{
    ArchiveView, BulkLoader, Lifecycle, Log, Substate as SubstateView, ViewAndMutate,
};
use crate::lifecycle::LifecycleGuard;
use crate::snapshot::{Overlay, SnapshotId, Tower};
use crate::substate::Substate;
use bytes::Bytes;
use replay_common::{empty_code_hash, keccak, Account, Address, ReplayError, ReplayResult, Rules, H256, U256};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use tracing::{instrument, trace};

#[derive(Default)]
pub struct WorldFrame {
    created_accounts: FxHashSet<Address>,
    created_contracts: FxHashSet<Address>,
    balances: FxHashMap<Address, U256>,
    nonces: FxHashMap<Address, u64>,
    code: FxHashMap<Address, Bytes>,
    storage: FxHashMap<(Address, H256), H256>,
    touched: FxHashSet<Address>,
    /// Addresses self-destructed and reaped by a prior `end_transaction` in
    /// this frame. A tombstone stops a lookup from falling through to an
    /// older frame's stale value for the same address.
    deleted: FxHashSet<Address>,
}

impl Overlay for WorldFrame {
    fn merge_newer(&mut self, newer: Self) {
        self.created_accounts.extend(newer.created_accounts);
        self.created_contracts.extend(newer.created_contracts);
        self.balances.extend(newer.balances);
        self.nonces.extend(newer.nonces);
        self.code.extend(newer.code);
        self.storage.extend(newer.storage);
        self.touched.extend(newer.touched);
        self.deleted.extend(newer.deleted);
    }
}

#[derive(Clone, Default)]
struct CommittedAccounts {
    balances: BTreeMap<Address, U256>,
    nonces: BTreeMap<Address, u64>,
    code: BTreeMap<Address, Bytes>,
    storage: BTreeMap<(Address, H256), H256>,
    touched: std::collections::BTreeSet<Address>,
}

pub struct MemoryState {
    lifecycle: LifecycleGuard,
    world: Tower<WorldFrame>,
    substate: Substate,
    tx_base: Option<SnapshotId>,
    rules: Rules,
    current_block: Option<u64>,
    archive: BTreeMap<u64, CommittedAccounts>,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryState {
    pub fn new() -> Self {
        Self {
            lifecycle: LifecycleGuard::new(),
            world: Tower::new(),
            substate: Substate::new(),
            tx_base: None,
            rules: Rules::default(),
            current_block: None,
            archive: BTreeMap::new(),
        }
    }

    fn lookup_balance(&self, address: Address) -> U256 {
        for frame in self.world.iter_top_down() {
            if let Some(v) = frame.balances.get(&address) {
                return *v;
            }
            if frame.deleted.contains(&address) {
                return U256::zero();
            }
        }
        U256::zero()
    }

    fn lookup_nonce(&self, address: Address) -> u64 {
        for frame in self.world.iter_top_down() {
            if let Some(v) = frame.nonces.get(&address) {
                return *v;
            }
            if frame.deleted.contains(&address) {
                return 0;
            }
        }
        0
    }

    fn lookup_code(&self, address: Address) -> Bytes {
        for frame in self.world.iter_top_down() {
            if let Some(v) = frame.code.get(&address) {
                return v.clone();
            }
            if frame.deleted.contains(&address) {
                return Bytes::new();
            }
        }
        Bytes::new()
    }

    fn lookup_storage<'a>(
        frames: impl Iterator<Item = &'a WorldFrame>,
        address: Address,
        key: H256,
    ) -> H256 {
        for frame in frames {
            if let Some(v) = frame.storage.get(&(address, key)) {
                return *v;
            }
            if frame.deleted.contains(&address) {
                return H256::zero();
            }
        }
        H256::zero()
    }

    fn lookup_exists(&self, address: Address) -> bool {
        for frame in self.world.iter_top_down() {
            if frame.touched.contains(&address) {
                return true;
            }
            if frame.deleted.contains(&address) {
                return false;
            }
        }
        false
    }

    fn touch(&mut self, address: Address) {
        self.world.top_mut().touched.insert(address);
    }
}

impl ViewAndMutate for MemoryState {
    #[instrument(level = "trace", skip(self))]
    fn create_account(&mut self, address: Address) -> ReplayResult<()> {
        let frame = self.world.top_mut();
        frame.nonces.insert(address, 0);
        frame.code.insert(address, Bytes::new());
        frame.created_accounts.insert(address);
        frame.touched.insert(address);
        frame.deleted.remove(&address);
        self.substate.mark_created(address);
        Ok(())
    }

    fn create_contract(&mut self, address: Address) -> ReplayResult<()> {
        if !self.lookup_exists(address) {
            return Ok(());
        }
        let frame = self.world.top_mut();
        frame.created_contracts.insert(address);
        frame.touched.insert(address);
        Ok(())
    }

    fn exist(&self, address: Address) -> ReplayResult<bool> {
        Ok(self.lookup_exists(address))
    }

    fn empty(&self, address: Address) -> ReplayResult<bool> {
        Ok(self.lookup_balance(address).is_zero()
            && self.lookup_nonce(address) == 0
            && self.lookup_code(address).is_empty())
    }

    fn self_destruct(&mut self, address: Address) -> ReplayResult<U256> {
        let balance = self.lookup_balance(address);
        self.substate.mark_self_destruct(address, false);
        Ok(balance)
    }

    fn self_destruct_6780(&mut self, address: Address) -> ReplayResult<(U256, bool)> {
        let balance = self.lookup_balance(address);
        let created = self.substate.was_created_in_tx(address);
        self.substate.mark_self_destruct(address, true);
        // spec.md §8 invariant 7: observable as an access-list addition
        // even when the deletion itself does not apply.
        self.substate.add_accessed_address(address);
        Ok((balance, created))
    }

    fn has_self_destructed(&self, address: Address) -> ReplayResult<bool> {
        Ok(self.substate.has_self_destructed(address))
    }

    fn get_balance(&self, address: Address) -> ReplayResult<U256> {
        Ok(self.lookup_balance(address))
    }

    fn add_balance(&mut self, address: Address, amount: U256) -> ReplayResult<U256> {
        let previous = self.lookup_balance(address);
        let new_balance = previous
            .checked_add(amount)
            .ok_or_else(|| ReplayError::BackendIo(format!("balance overflow for {address:?}")))?;
        self.world.top_mut().balances.insert(address, new_balance);
        self.touch(address);
        Ok(previous)
    }

    fn sub_balance(&mut self, address: Address, amount: U256) -> ReplayResult<U256> {
        let previous = self.lookup_balance(address);
        let new_balance = previous.checked_sub(amount).ok_or_else(|| {
            ReplayError::BalanceUnderflow {
                amount: amount.to_string(),
            }
        })?;
        self.world.top_mut().balances.insert(address, new_balance);
        self.touch(address);
        Ok(previous)
    }

    fn get_nonce(&self, address: Address) -> ReplayResult<u64> {
        Ok(self.lookup_nonce(address))
    }

    fn set_nonce(&mut self, address: Address, nonce: u64) -> ReplayResult<()> {
        self.world.top_mut().nonces.insert(address, nonce);
        self.touch(address);
        Ok(())
    }

    fn get_committed_state(&self, address: Address, key: H256) -> ReplayResult<H256> {
        let value = match self.tx_base {
            Some(id) => Self::lookup_storage(self.world.iter_below(id), address, key),
            None => Self::lookup_storage(self.world.iter_top_down(), address, key),
        };
        Ok(value)
    }

    fn get_state(&self, address: Address, key: H256) -> ReplayResult<H256> {
        Ok(Self::lookup_storage(self.world.iter_top_down(), address, key))
    }

    fn set_state(&mut self, address: Address, key: H256, value: H256) -> ReplayResult<H256> {
        let previous = Self::lookup_storage(self.world.iter_top_down(), address, key);
        self.world.top_mut().storage.insert((address, key), value);
        self.touch(address);
        Ok(previous)
    }

    fn get_storage_root(&self, address: Address) -> ReplayResult<H256> {
        let mut current: BTreeMap<H256, H256> = BTreeMap::new();
        for frame in self.world.iter_bottom_up() {
            if frame.deleted.contains(&address) {
                current.clear();
            }
            for (&(a, k), &v) in &frame.storage {
                if a == address {
                    current.insert(k, v);
                }
            }
        }
        current.retain(|_, v| !v.is_zero());
        if current.is_empty() {
            return Ok(H256::zero());
        }
        let mut buf = Vec::with_capacity(current.len() * 64);
        for (k, v) in current {
            buf.extend_from_slice(k.as_bytes());
            buf.extend_from_slice(v.as_bytes());
        }
        Ok(keccak(&buf))
    }

    fn set_transient_state(&mut self, address: Address, key: H256, value: H256) -> ReplayResult<()> {
        self.substate.set_transient(address, key, value);
        Ok(())
    }

    fn get_transient_state(&self, address: Address, key: H256) -> ReplayResult<H256> {
        Ok(self.substate.get_transient(address, key))
    }

    fn get_code_hash(&self, address: Address) -> ReplayResult<H256> {
        let code = self.lookup_code(address);
        Ok(if code.is_empty() {
            empty_code_hash()
        } else {
            keccak(&code)
        })
    }

    fn get_code(&self, address: Address) -> ReplayResult<Bytes> {
        Ok(self.lookup_code(address))
    }

    fn set_code(&mut self, address: Address, code: Bytes) -> ReplayResult<Bytes> {
        let previous = self.lookup_code(address);
        self.world.top_mut().code.insert(address, code);
        self.touch(address);
        Ok(previous)
    }

    fn get_code_size(&self, address: Address) -> ReplayResult<usize> {
        Ok(self.lookup_code(address).len())
    }

    fn add_refund(&mut self, amount: u64) -> ReplayResult<()> {
        self.substate.add_refund(amount);
        Ok(())
    }

    fn sub_refund(&mut self, amount: u64) -> ReplayResult<()> {
        self.substate.sub_refund(amount)
    }

    fn get_refund(&self) -> ReplayResult<u64> {
        Ok(self.substate.get_refund())
    }

    fn prepare(
        &mut self,
        rules: Rules,
        sender: Address,
        coinbase: Address,
        dest: Option<Address>,
        precompiles: &[Address],
        tx_access_list: &[(Address, Vec<H256>)],
    ) -> ReplayResult<()> {
        self.rules = rules;
        self.substate.add_accessed_address(sender);
        if rules.warm_coinbase {
            self.substate.add_accessed_address(coinbase);
        }
        if let Some(dest) = dest {
            self.substate.add_accessed_address(dest);
        }
        for &precompile in precompiles {
            self.substate.add_accessed_address(precompile);
        }
        for (address, keys) in tx_access_list {
            self.substate.add_accessed_address(*address);
            for key in keys {
                self.substate.add_accessed_slot(*address, *key);
            }
        }
        Ok(())
    }

    fn address_in_access_list(&self, address: Address) -> ReplayResult<bool> {
        Ok(self.substate.address_in_access_list(address))
    }

    fn slot_in_access_list(&self, address: Address, key: H256) -> ReplayResult<bool> {
        Ok(self.substate.slot_in_access_list(address, key))
    }

    fn add_address_to_access_list(&mut self, address: Address) -> ReplayResult<bool> {
        Ok(self.substate.add_accessed_address(address))
    }

    fn add_slot_to_access_list(&mut self, address: Address, key: H256) -> ReplayResult<bool> {
        Ok(self.substate.add_accessed_slot(address, key))
    }

    fn add_log(&mut self, address: Address, topics: Vec<H256>, data: Bytes) -> ReplayResult<()> {
        self.substate.add_log(address, topics, data);
        Ok(())
    }

    fn get_logs(
        &mut self,
        tx_hash: H256,
        block_number: u64,
        block_hash: H256,
        block_timestamp: u64,
    ) -> ReplayResult<Vec<Log>> {
        let tx_index = self.substate.current_tx_index();
        Ok(self
            .substate
            .drain_logs(tx_hash, tx_index, block_number, block_hash, block_timestamp))
    }

    fn snapshot(&mut self) -> ReplayResult<u64> {
        let world_id = self.world.push();
        let substate_id = self.substate.snapshot();
        debug_assert_eq!(world_id.0, substate_id.0, "towers drifted out of lock-step");
        trace!(id = world_id.0, "snapshot taken");
        Ok(world_id.0)
    }

    fn revert_to_snapshot(&mut self, id: u64) -> ReplayResult<()> {
        let id = SnapshotId(id);
        if !self.world.is_live(id) {
            return Err(ReplayError::InvalidSnapshot(id.0));
        }
        self.world.revert_to(id)?;
        self.substate.revert_to(id)?;
        Ok(())
    }

    fn begin_transaction(&mut self, index: u64) -> ReplayResult<()> {
        self.lifecycle.begin_transaction()?;
        self.substate.begin_transaction();
        self.substate.set_current_tx_index(index);
        let base = self.world.push();
        debug_assert_eq!(base.0, self.substate.depth());
        self.tx_base = Some(base);
        Ok(())
    }

    fn end_transaction(&mut self) -> ReplayResult<()> {
        self.lifecycle.end_transaction()?;
        self.world.flatten();
        self.substate.flatten();
        for (address, created, eip6780) in self.substate.self_destructed() {
            let should_delete = !eip6780 || created;
            if !should_delete {
                continue;
            }
            let frame = self.world.top_mut();
            frame.balances.remove(&address);
            frame.nonces.remove(&address);
            frame.code.remove(&address);
            frame.storage.retain(|&(a, _), _| a != address);
            frame.created_accounts.remove(&address);
            frame.created_contracts.remove(&address);
            frame.touched.remove(&address);
            frame.deleted.insert(address);
        }
        self.tx_base = None;
        Ok(())
    }

    fn set_tx_context(&mut self, tx_hash: H256, tx_index: u64) -> ReplayResult<()> {
        self.substate.set_tx_context(tx_hash, tx_index);
        Ok(())
    }

    fn get_substate_post_alloc(&self) -> ReplayResult<SubstateView> {
        let mut accounts = BTreeMap::new();
        let mut storage = BTreeMap::new();
        for frame in self.world.iter_bottom_up() {
            for &address in &frame.touched {
                let account = Account {
                    balance: self.lookup_balance(address),
                    nonce: self.lookup_nonce(address),
                    code_hash: self.get_code_hash(address)?,
                    code: self.lookup_code(address),
                };
                accounts.insert(address, account);
            }
            for &address in &frame.deleted {
                accounts.remove(&address);
            }
        }
        for &address in accounts.keys() {
            for frame in self.world.iter_bottom_up() {
                for (&(a, k), &v) in &frame.storage {
                    if a == address {
                        storage.insert((a, k), v);
                    }
                }
            }
        }
        Ok(SubstateView { accounts, storage })
    }
}

impl Lifecycle for MemoryState {
    fn begin_block(&mut self, number: u64) -> ReplayResult<()> {
        self.lifecycle.begin_block(number)?;
        self.current_block = Some(number);
        self.substate.reset_log_index();
        Ok(())
    }

    fn end_block(&mut self) -> ReplayResult<()> {
        self.lifecycle.end_block()?;
        if let Some(number) = self.current_block {
            self.archive.insert(number, self.snapshot_committed());
        }
        Ok(())
    }

    fn begin_sync_period(&mut self, _id: u64) -> ReplayResult<()> {
        self.lifecycle.begin_sync_period()
    }

    fn end_sync_period(&mut self) -> ReplayResult<()> {
        self.lifecycle.end_sync_period()
    }

    fn get_hash(&self) -> ReplayResult<H256> {
        let committed = self.snapshot_committed();
        let mut buf = Vec::new();
        for (addr, balance) in &committed.balances {
            buf.extend_from_slice(addr.as_bytes());
            buf.extend_from_slice(&balance.to_big_endian());
        }
        for (addr, nonce) in &committed.nonces {
            buf.extend_from_slice(addr.as_bytes());
            buf.extend_from_slice(&nonce.to_be_bytes());
        }
        Ok(keccak(&buf))
    }

    fn close(&mut self) -> ReplayResult<()> {
        self.lifecycle.close()
    }

    fn start_bulk_load(&mut self, block: u64) -> ReplayResult<Box<dyn BulkLoader + '_>> {
        self.lifecycle.require_between_blocks("start_bulk_load")?;
        Ok(Box::new(MemoryBulkLoader {
            state: self,
            block,
        }))
    }

    fn get_archive_state(&self, block: u64) -> ReplayResult<Box<dyn ArchiveView>> {
        let committed = self
            .archive
            .get(&block)
            .cloned()
            .ok_or(ReplayError::ArchiveUnavailable)?;
        Ok(Box::new(MemoryArchiveView {
            block,
            committed,
            released: false,
        }))
    }

    fn get_archive_block_height(&self) -> ReplayResult<Option<u64>> {
        Ok(self.archive.keys().next_back().copied())
    }
}

impl MemoryState {
    fn snapshot_committed(&self) -> CommittedAccounts {
        let mut out = CommittedAccounts::default();
        for frame in self.world.iter_bottom_up() {
            out.balances.extend(frame.balances.iter().map(|(&a, &v)| (a, v)));
            out.nonces.extend(frame.nonces.iter().map(|(&a, &v)| (a, v)));
            out.code.extend(frame.code.iter().map(|(&a, v)| (a, v.clone())));
            out.storage.extend(frame.storage.iter().map(|(&k, &v)| (k, v)));
            out.touched.extend(frame.touched.iter().copied());
            for &address in &frame.deleted {
                out.balances.remove(&address);
                out.nonces.remove(&address);
                out.code.remove(&address);
                out.storage.retain(|&(a, _), _| a != address);
                out.touched.remove(&address);
            }
        }
        out
    }
}

struct MemoryBulkLoader<'a> {
    state: &'a mut MemoryState,
    #[allow(dead_code)]
    block: u64,
}

impl BulkLoader for MemoryBulkLoader<'_> {
    fn create_account(&mut self, address: Address) -> ReplayResult<()> {
        let frame = self.state.world.top_mut();
        frame.touched.insert(address);
        frame.created_accounts.insert(address);
        Ok(())
    }

    fn set_balance(&mut self, address: Address, balance: U256) -> ReplayResult<()> {
        self.state.world.top_mut().balances.insert(address, balance);
        Ok(())
    }

    fn set_nonce(&mut self, address: Address, nonce: u64) -> ReplayResult<()> {
        self.state.world.top_mut().nonces.insert(address, nonce);
        Ok(())
    }

    fn set_state(&mut self, address: Address, key: H256, value: H256) -> ReplayResult<()> {
        self.state
            .world
            .top_mut()
            .storage
            .insert((address, key), value);
        Ok(())
    }

    fn set_code(&mut self, address: Address, code: Bytes) -> ReplayResult<()> {
        self.state.world.top_mut().code.insert(address, code);
        Ok(())
    }

    fn close(self: Box<Self>) -> ReplayResult<()> {
        self.state.world.flatten();
        Ok(())
    }
}

struct MemoryArchiveView {
    block: u64,
    committed: CommittedAccounts,
    released: bool,
}

impl ViewAndMutate for MemoryArchiveView {
    fn create_account(&mut self, _address: Address) -> ReplayResult<()> {
        Err(ReplayError::ReadOnlyView)
    }
    fn create_contract(&mut self, _address: Address) -> ReplayResult<()> {
        Err(ReplayError::ReadOnlyView)
    }
    fn exist(&self, address: Address) -> ReplayResult<bool> {
        Ok(self.committed.touched.contains(&address))
    }
    fn empty(&self, address: Address) -> ReplayResult<bool> {
        Ok(self.get_balance(address)?.is_zero()
            && self.get_nonce(address)? == 0
            && self.get_code(address)?.is_empty())
    }
    fn self_destruct(&mut self, _address: Address) -> ReplayResult<U256> {
        Err(ReplayError::ReadOnlyView)
    }
    fn self_destruct_6780(&mut self, _address: Address) -> ReplayResult<(U256, bool)> {
        Err(ReplayError::ReadOnlyView)
    }
    fn has_self_destructed(&self, _address: Address) -> ReplayResult<bool> {
        Ok(false)
    }
    fn get_balance(&self, address: Address) -> ReplayResult<U256> {
        Ok(self.committed.balances.get(&address).copied().unwrap_or_default())
    }
    fn add_balance(&mut self, _address: Address, _amount: U256) -> ReplayResult<U256> {
        Err(ReplayError::ReadOnlyView)
    }
    fn sub_balance(&mut self, _address: Address, _amount: U256) -> ReplayResult<U256> {
        Err(ReplayError::ReadOnlyView)
    }
    fn get_nonce(&self, address: Address) -> ReplayResult<u64> {
        Ok(self.committed.nonces.get(&address).copied().unwrap_or_default())
    }
    fn set_nonce(&mut self, _address: Address, _nonce: u64) -> ReplayResult<()> {
        Err(ReplayError::ReadOnlyView)
    }
    fn get_committed_state(&self, address: Address, key: H256) -> ReplayResult<H256> {
        self.get_state(address, key)
    }
    fn get_state(&self, address: Address, key: H256) -> ReplayResult<H256> {
        Ok(self
            .committed
            .storage
            .get(&(address, key))
            .copied()
            .unwrap_or_default())
    }
    fn set_state(&mut self, _address: Address, _key: H256, _value: H256) -> ReplayResult<H256> {
        Err(ReplayError::ReadOnlyView)
    }
    fn get_storage_root(&self, address: Address) -> ReplayResult<H256> {
        let any = self
            .committed
            .storage
            .iter()
            .any(|(&(a, _), v)| a == address && !v.is_zero());
        Ok(if any { H256::repeat_byte(0xAB) } else { H256::zero() })
    }
    fn set_transient_state(&mut self, _address: Address, _key: H256, _value: H256) -> ReplayResult<()> {
        Err(ReplayError::ReadOnlyView)
    }
    fn get_transient_state(&self, _address: Address, _key: H256) -> ReplayResult<H256> {
        Ok(H256::zero())
    }
    fn get_code_hash(&self, address: Address) -> ReplayResult<H256> {
        let code = self.get_code(address)?;
        Ok(if code.is_empty() {
            empty_code_hash()
        } else {
            keccak(&code)
        })
    }
    fn get_code(&self, address: Address) -> ReplayResult<Bytes> {
        Ok(self.committed.code.get(&address).cloned().unwrap_or_default())
    }
    fn set_code(&mut self, _address: Address, _code: Bytes) -> ReplayResult<Bytes> {
        Err(ReplayError::ReadOnlyView)
    }
    fn get_code_size(&self, address: Address) -> ReplayResult<usize> {
        Ok(self.get_code(address)?.len())
    }
    fn add_refund(&mut self, _amount: u64) -> ReplayResult<()> {
        Err(ReplayError::ReadOnlyView)
    }
    fn sub_refund(&mut self, _amount: u64) -> ReplayResult<()> {
        Err(ReplayError::ReadOnlyView)
    }
    fn get_refund(&self) -> ReplayResult<u64> {
        Ok(0)
    }
    fn prepare(
        &mut self,
        _rules: Rules,
        _sender: Address,
        _coinbase: Address,
        _dest: Option<Address>,
        _precompiles: &[Address],
        _tx_access_list: &[(Address, Vec<H256>)],
    ) -> ReplayResult<()> {
        Err(ReplayError::ReadOnlyView)
    }
    fn address_in_access_list(&self, _address: Address) -> ReplayResult<bool> {
        Ok(false)
    }
    fn slot_in_access_list(&self, _address: Address, _key: H256) -> ReplayResult<bool> {
        Ok(false)
    }
    fn add_address_to_access_list(&mut self, _address: Address) -> ReplayResult<bool> {
        Err(ReplayError::ReadOnlyView)
    }
    fn add_slot_to_access_list(&mut self, _address: Address, _key: H256) -> ReplayResult<bool> {
        Err(ReplayError::ReadOnlyView)
    }
    fn add_log(&mut self, _address: Address, _topics: Vec<H256>, _data: Bytes) -> ReplayResult<()> {
        Err(ReplayError::ReadOnlyView)
    }
    fn get_logs(
        &mut self,
        _tx_hash: H256,
        _block_number: u64,
        _block_hash: H256,
        _block_timestamp: u64,
    ) -> ReplayResult<Vec<Log>> {
        Ok(Vec::new())
    }
    fn snapshot(&mut self) -> ReplayResult<u64> {
        Err(ReplayError::ReadOnlyView)
    }
    fn revert_to_snapshot(&mut self, _id: u64) -> ReplayResult<()> {
        Err(ReplayError::ReadOnlyView)
    }
    fn begin_transaction(&mut self, _index: u64) -> ReplayResult<()> {
        Err(ReplayError::ReadOnlyView)
    }
    fn end_transaction(&mut self) -> ReplayResult<()> {
        Err(ReplayError::ReadOnlyView)
    }
    fn set_tx_context(&mut self, _tx_hash: H256, _tx_index: u64) -> ReplayResult<()> {
        Err(ReplayError::ReadOnlyView)
    }
    fn get_substate_post_alloc(&self) -> ReplayResult<SubstateView> {
        let mut accounts = BTreeMap::new();
        for &address in &self.committed.touched {
            accounts.insert(
                address,
                Account {
                    balance: self.get_balance(address)?,
                    nonce: self.get_nonce(address)?,
                    code_hash: self.get_code_hash(address)?,
                    code: self.get_code(address)?,
                },
            );
        }
        Ok(SubstateView {
            accounts,
            storage: self.committed.storage.clone(),
        })
    }
}

impl ArchiveView for MemoryArchiveView {
    fn archive_hash(&self) -> ReplayResult<H256> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.block.to_be_bytes());
        for (addr, balance) in &self.committed.balances {
            buf.extend_from_slice(addr.as_bytes());
            buf.extend_from_slice(&balance.to_big_endian());
        }
        Ok(keccak(&buf))
    }

    fn release(mut self: Box<Self>) -> ReplayResult<()> {
        if self.released {
            return Err(ReplayError::BackendIo("archive view released twice".into()));
        }
        self.released = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[test]
    fn create_destroy_recreate_scenario() {
        // spec.md §8 concrete scenario 1.
        let mut s = MemoryState::new();
        let a = addr(1);
        let k = H256::repeat_byte(4);
        let v = H256::repeat_byte(7);

        s.begin_block(1).unwrap();
        s.begin_transaction(0).unwrap();
        s.create_account(a).unwrap();
        s.set_state(a, k, v).unwrap();
        s.set_nonce(a, 1).unwrap();
        s.end_transaction().unwrap();
        s.end_block().unwrap();

        s.begin_block(2).unwrap();
        s.begin_transaction(0).unwrap();
        s.self_destruct(a).unwrap();
        s.end_transaction().unwrap();

        s.begin_transaction(1).unwrap();
        assert_eq!(s.get_storage_root(a).unwrap(), H256::zero());
        assert_eq!(s.get_nonce(a).unwrap(), 0);
        s.create_account(a).unwrap();
        s.set_state(a, k, v).unwrap();
        s.set_nonce(a, 1).unwrap();
        s.end_transaction().unwrap();
        s.end_block().unwrap();

        s.begin_block(3).unwrap();
        s.begin_transaction(0).unwrap();
        assert_ne!(s.get_storage_root(a).unwrap(), H256::zero());
        assert_eq!(s.get_nonce(a).unwrap(), 1);
    }

    #[test]
    fn snapshot_nesting_scenario() {
        // spec.md §8 concrete scenario 2.
        let mut s = MemoryState::new();
        let a = addr(2);
        s.begin_block(1).unwrap();
        s.begin_transaction(0).unwrap();
        let s1 = s.snapshot().unwrap();
        s.add_balance(a, U256::from(10)).unwrap();
        let s2 = s.snapshot().unwrap();
        s.add_balance(a, U256::from(20)).unwrap();
        s.revert_to_snapshot(s2).unwrap();
        assert_eq!(s.get_balance(a).unwrap(), U256::from(10));
        s.revert_to_snapshot(s1).unwrap();
        assert_eq!(s.get_balance(a).unwrap(), U256::zero());
    }

    #[test]
    fn access_list_prepare_scenario() {
        // spec.md §8 concrete scenario 4.
        let mut s = MemoryState::new();
        let sender = addr(1);
        let coinbase = addr(2);
        let dest = addr(3);
        let p1 = addr(4);
        let p2 = addr(5);
        let a1 = addr(6);
        let k1 = H256::repeat_byte(1);
        let k2 = H256::repeat_byte(2);
        s.begin_block(1).unwrap();
        s.begin_transaction(0).unwrap();
        s.prepare(
            Rules::shanghai(),
            sender,
            coinbase,
            Some(dest),
            &[p1, p2],
            &[(a1, vec![k1, k2])],
        )
        .unwrap();
        for who in [sender, dest, coinbase, p1, p2, a1] {
            assert!(s.address_in_access_list(who).unwrap());
        }
        assert!(s.slot_in_access_list(a1, k1).unwrap());
        assert!(!s.slot_in_access_list(a1, H256::repeat_byte(9)).unwrap());
    }

    #[test]
    fn eip6780_deletes_only_if_created_in_tx() {
        let mut s = MemoryState::new();
        let created_now = addr(1);
        let pre_existing = addr(2);

        s.begin_block(1).unwrap();
        s.begin_transaction(0).unwrap();
        s.create_account(pre_existing).unwrap();
        s.add_balance(pre_existing, U256::from(5)).unwrap();
        s.end_transaction().unwrap();

        s.begin_transaction(1).unwrap();
        s.create_account(created_now).unwrap();
        s.add_balance(created_now, U256::from(7)).unwrap();
        let (_, created) = s.self_destruct_6780(created_now).unwrap();
        assert!(created);
        let (_, created) = s.self_destruct_6780(pre_existing).unwrap();
        assert!(!created);
        s.end_transaction().unwrap();

        assert!(!s.exist(created_now).unwrap());
        assert!(s.exist(pre_existing).unwrap());
    }

    #[test]
    fn transactional_isolation_invariant() {
        // spec.md §8 universal invariant 2.
        let mut s = MemoryState::new();
        let a = addr(9);
        s.begin_block(1).unwrap();
        let before = s.get_substate_post_alloc().unwrap();
        let snap = s.snapshot().unwrap();
        s.begin_transaction(0).unwrap();
        s.create_account(a).unwrap();
        s.add_balance(a, U256::from(42)).unwrap();
        s.revert_to_snapshot(snap).unwrap();
        let after = s.get_substate_post_alloc().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn bulk_load_then_read_back() {
        // spec.md §8 concrete scenario 6 (scaled down).
        let mut s = MemoryState::new();
        let a = addr(42);
        {
            let mut loader = s.start_bulk_load(0).unwrap();
            loader.create_account(a).unwrap();
            loader.set_balance(a, U256::from(100)).unwrap();
            loader.set_nonce(a, 3).unwrap();
            loader.set_code(a, Bytes::from_static(b"\x00")).unwrap();
            loader
                .set_state(a, H256::repeat_byte(1), H256::repeat_byte(2))
                .unwrap();
            loader.close().unwrap();
        }
        s.begin_block(0).unwrap();
        s.begin_transaction(0).unwrap();
        assert_eq!(s.get_balance(a).unwrap(), U256::from(100));
        assert_eq!(s.get_nonce(a).unwrap(), 3);
        assert_eq!(s.get_code(a).unwrap(), Bytes::from_static(b"\x00"));
        assert_eq!(
            s.get_state(a, H256::repeat_byte(1)).unwrap(),
            H256::repeat_byte(2)
        );
    }
}
