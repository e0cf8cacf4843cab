//! The persistent structured-state backend (spec.md §4.2.3): account and
//! storage data land directly in rocksdb column families with no trie layer
//! at all, `get_hash` is a flat content hash over the whole accounts column,
//! and every committed block is additionally appended to a history column so
//! `get_archive_state` can serve a read-only view of any past block. Column
//! family and write-batch usage follows the same pattern as `trie_backend.rs`
//! (itself grounded on the teacher's `storage/store.rs`); the difference from
//! that backend is the absence of the `mpt` commitment layer and the
//! presence of append-only history.

use crate::contract::{
    ArchiveView, BulkLoader, Lifecycle, Log, Substate as SubstateView, ViewAndMutate,
};
use crate::lifecycle::LifecycleGuard;
use crate::snapshot::{Overlay, SnapshotId, Tower};
use crate::substate::Substate;
use bytes::Bytes;
use replay_common::{empty_code_hash, keccak, Account, Address, ReplayError, ReplayResult, Rules, H256, U256};
use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::instrument;

const CF_ACCOUNTS: &str = "accounts";
const CF_CODE: &str = "code";
const CF_STORAGE: &str = "storage";
const CF_ACCOUNT_HISTORY: &str = "account_history";
const CF_STORAGE_HISTORY: &str = "storage_history";

fn encode_account(balance: U256, nonce: u64, code_hash: H256) -> Vec<u8> {
    let mut out = Vec::with_capacity(72);
    out.extend_from_slice(&balance.to_big_endian());
    out.extend_from_slice(&nonce.to_be_bytes());
    out.extend_from_slice(code_hash.as_bytes());
    out
}

fn decode_account(bytes: &[u8]) -> (U256, u64, H256) {
    let balance = U256::from_big_endian(&bytes[0..32]);
    let nonce = u64::from_be_bytes(bytes[32..40].try_into().unwrap_or_default());
    let code_hash = H256::from_slice(&bytes[40..72]);
    (balance, nonce, code_hash)
}

fn account_history_key(address: Address, block: u64) -> [u8; 28] {
    let mut key = [0u8; 28];
    key[..20].copy_from_slice(address.as_bytes());
    key[20..].copy_from_slice(&block.to_be_bytes());
    key
}

fn storage_history_key(address: Address, slot: H256, block: u64) -> [u8; 60] {
    let mut key = [0u8; 60];
    key[..20].copy_from_slice(address.as_bytes());
    key[20..52].copy_from_slice(slot.as_bytes());
    key[52..].copy_from_slice(&block.to_be_bytes());
    key
}

#[derive(Default)]
struct WorldFrame {
    balances: FxHashMap<Address, U256>,
    nonces: FxHashMap<Address, u64>,
    code: FxHashMap<Address, Bytes>,
    storage: FxHashMap<(Address, H256), H256>,
    touched: FxHashSet<Address>,
    created_accounts: FxHashSet<Address>,
    created_contracts: FxHashSet<Address>,
    deleted: FxHashSet<Address>,
}

impl Overlay for WorldFrame {
    fn merge_newer(&mut self, newer: Self) {
        self.balances.extend(newer.balances);
        self.nonces.extend(newer.nonces);
        self.code.extend(newer.code);
        self.storage.extend(newer.storage);
        self.touched.extend(newer.touched);
        self.created_accounts.extend(newer.created_accounts);
        self.created_contracts.extend(newer.created_contracts);
        self.deleted.extend(newer.deleted);
    }
}

pub struct StructState {
    lifecycle: LifecycleGuard,
    world: Tower<WorldFrame>,
    substate: Substate,
    tx_base: Option<SnapshotId>,
    db: Arc<DB>,
    current_block: Option<u64>,
}

impl StructState {
    pub fn open(path: impl AsRef<Path>) -> ReplayResult<Self> {
        let cfs = [CF_ACCOUNTS, CF_CODE, CF_STORAGE, CF_ACCOUNT_HISTORY, CF_STORAGE_HISTORY]
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let db = DB::open_cf_descriptors(&opts, path, cfs)?;
        Ok(Self {
            lifecycle: LifecycleGuard::new(),
            world: Tower::new(),
            substate: Substate::new(),
            tx_base: None,
            db: Arc::new(db),
            current_block: None,
        })
    }

    fn cf(&self, name: &str) -> impl rocksdb::AsColumnFamilyRef + '_ {
        self.db.cf_handle(name).expect("column family registered at open")
    }

    fn read_account(&self, address: Address) -> ReplayResult<Option<(U256, u64, H256)>> {
        Ok(self
            .db
            .get_cf(self.cf(CF_ACCOUNTS), address.as_bytes())?
            .map(|bytes| decode_account(&bytes)))
    }

    fn read_code(&self, code_hash: H256) -> ReplayResult<Bytes> {
        if code_hash == empty_code_hash() {
            return Ok(Bytes::new());
        }
        Ok(self
            .db
            .get_cf(self.cf(CF_CODE), code_hash.as_bytes())?
            .map(Bytes::from)
            .unwrap_or_default())
    }

    fn read_storage(&self, address: Address, key: H256) -> ReplayResult<H256> {
        let mut composite = [0u8; 52];
        composite[..20].copy_from_slice(address.as_bytes());
        composite[20..].copy_from_slice(key.as_bytes());
        Ok(self
            .db
            .get_cf(self.cf(CF_STORAGE), composite)?
            .map(|bytes| H256::from_slice(&bytes))
            .unwrap_or_default())
    }

    fn lookup_balance(&self, address: Address) -> ReplayResult<U256> {
        for frame in self.world.iter_top_down() {
            if let Some(v) = frame.balances.get(&address) {
                return Ok(*v);
            }
            if frame.deleted.contains(&address) {
                return Ok(U256::zero());
            }
        }
        Ok(self.read_account(address)?.map(|a| a.0).unwrap_or_default())
    }

    fn lookup_nonce(&self, address: Address) -> ReplayResult<u64> {
        for frame in self.world.iter_top_down() {
            if let Some(v) = frame.nonces.get(&address) {
                return Ok(*v);
            }
            if frame.deleted.contains(&address) {
                return Ok(0);
            }
        }
        Ok(self.read_account(address)?.map(|a| a.1).unwrap_or_default())
    }

    fn lookup_code(&self, address: Address) -> ReplayResult<Bytes> {
        for frame in self.world.iter_top_down() {
            if let Some(v) = frame.code.get(&address) {
                return Ok(v.clone());
            }
            if frame.deleted.contains(&address) {
                return Ok(Bytes::new());
            }
        }
        match self.read_account(address)? {
            Some((_, _, code_hash)) => self.read_code(code_hash),
            None => Ok(Bytes::new()),
        }
    }

    fn lookup_storage(&self, address: Address, key: H256) -> ReplayResult<H256> {
        for frame in self.world.iter_top_down() {
            if let Some(v) = frame.storage.get(&(address, key)) {
                return Ok(*v);
            }
            if frame.deleted.contains(&address) {
                return Ok(H256::zero());
            }
        }
        self.read_storage(address, key)
    }

    fn lookup_exists(&self, address: Address) -> ReplayResult<bool> {
        for frame in self.world.iter_top_down() {
            if frame.touched.contains(&address) {
                return Ok(true);
            }
            if frame.deleted.contains(&address) {
                return Ok(false);
            }
        }
        Ok(self.read_account(address)?.is_some())
    }

    fn touch(&mut self, address: Address) {
        self.world.top_mut().touched.insert(address);
    }

    fn storage_root_from_disk(&self, address: Address) -> ReplayResult<H256> {
        let mut prefix = [0u8; 20];
        prefix.copy_from_slice(address.as_bytes());
        let mut current = BTreeMap::new();
        for item in self.db.prefix_iterator_cf(self.cf(CF_STORAGE), prefix) {
            let (key, value) = item?;
            if key.len() != 52 || &key[..20] != address.as_bytes() {
                continue;
            }
            let value = H256::from_slice(&value);
            if !value.is_zero() {
                current.insert(H256::from_slice(&key[20..]), value);
            }
        }
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
}

impl ViewAndMutate for StructState {
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
        if !self.lookup_exists(address)? {
            return Ok(());
        }
        let frame = self.world.top_mut();
        frame.created_contracts.insert(address);
        frame.touched.insert(address);
        Ok(())
    }

    fn exist(&self, address: Address) -> ReplayResult<bool> {
        self.lookup_exists(address)
    }

    fn empty(&self, address: Address) -> ReplayResult<bool> {
        Ok(self.lookup_balance(address)?.is_zero()
            && self.lookup_nonce(address)? == 0
            && self.lookup_code(address)?.is_empty())
    }

    fn self_destruct(&mut self, address: Address) -> ReplayResult<U256> {
        let balance = self.lookup_balance(address)?;
        self.substate.mark_self_destruct(address, false);
        Ok(balance)
    }

    fn self_destruct_6780(&mut self, address: Address) -> ReplayResult<(U256, bool)> {
        let balance = self.lookup_balance(address)?;
        let created = self.substate.was_created_in_tx(address);
        self.substate.mark_self_destruct(address, true);
        self.substate.add_accessed_address(address);
        Ok((balance, created))
    }

    fn has_self_destructed(&self, address: Address) -> ReplayResult<bool> {
        Ok(self.substate.has_self_destructed(address))
    }

    fn get_balance(&self, address: Address) -> ReplayResult<U256> {
        self.lookup_balance(address)
    }

    fn add_balance(&mut self, address: Address, amount: U256) -> ReplayResult<U256> {
        let previous = self.lookup_balance(address)?;
        let new_balance = previous
            .checked_add(amount)
            .ok_or_else(|| ReplayError::BackendIo(format!("balance overflow for {address:?}")))?;
        self.world.top_mut().balances.insert(address, new_balance);
        self.touch(address);
        Ok(previous)
    }

    fn sub_balance(&mut self, address: Address, amount: U256) -> ReplayResult<U256> {
        let previous = self.lookup_balance(address)?;
        let new_balance = previous.checked_sub(amount).ok_or_else(|| ReplayError::BalanceUnderflow {
            amount: amount.to_string(),
        })?;
        self.world.top_mut().balances.insert(address, new_balance);
        self.touch(address);
        Ok(previous)
    }

    fn get_nonce(&self, address: Address) -> ReplayResult<u64> {
        self.lookup_nonce(address)
    }

    fn set_nonce(&mut self, address: Address, nonce: u64) -> ReplayResult<()> {
        self.world.top_mut().nonces.insert(address, nonce);
        self.touch(address);
        Ok(())
    }

    fn get_committed_state(&self, address: Address, key: H256) -> ReplayResult<H256> {
        let Some(base) = self.tx_base else {
            return self.lookup_storage(address, key);
        };
        for frame in self.world.iter_below(base) {
            if let Some(v) = frame.storage.get(&(address, key)) {
                return Ok(*v);
            }
            if frame.deleted.contains(&address) {
                return Ok(H256::zero());
            }
        }
        self.read_storage(address, key)
    }

    fn get_state(&self, address: Address, key: H256) -> ReplayResult<H256> {
        self.lookup_storage(address, key)
    }

    fn set_state(&mut self, address: Address, key: H256, value: H256) -> ReplayResult<H256> {
        let previous = self.lookup_storage(address, key)?;
        self.world.top_mut().storage.insert((address, key), value);
        self.touch(address);
        Ok(previous)
    }

    fn get_storage_root(&self, address: Address) -> ReplayResult<H256> {
        let mut overrides: BTreeMap<H256, H256> = BTreeMap::new();
        let mut tombstoned = false;
        for frame in self.world.iter_bottom_up() {
            if frame.deleted.contains(&address) {
                overrides.clear();
                tombstoned = true;
            }
            for (&(a, k), &v) in &frame.storage {
                if a == address {
                    overrides.insert(k, v);
                }
            }
        }
        if overrides.is_empty() && !tombstoned {
            return self.storage_root_from_disk(address);
        }
        let mut merged = if tombstoned {
            BTreeMap::new()
        } else {
            let mut base = BTreeMap::new();
            let mut prefix = [0u8; 20];
            prefix.copy_from_slice(address.as_bytes());
            for item in self.db.prefix_iterator_cf(self.cf(CF_STORAGE), prefix) {
                let (key, value) = item?;
                if key.len() != 52 || &key[..20] != address.as_bytes() {
                    continue;
                }
                base.insert(H256::from_slice(&key[20..]), H256::from_slice(&value));
            }
            base
        };
        merged.extend(overrides);
        merged.retain(|_, v| !v.is_zero());
        if merged.is_empty() {
            return Ok(H256::zero());
        }
        let mut buf = Vec::with_capacity(merged.len() * 64);
        for (k, v) in merged {
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
        let code = self.lookup_code(address)?;
        Ok(if code.is_empty() { empty_code_hash() } else { keccak(&code) })
    }

    fn get_code(&self, address: Address) -> ReplayResult<Bytes> {
        self.lookup_code(address)
    }

    fn set_code(&mut self, address: Address, code: Bytes) -> ReplayResult<Bytes> {
        let previous = self.lookup_code(address)?;
        self.world.top_mut().code.insert(address, code);
        self.touch(address);
        Ok(previous)
    }

    fn get_code_size(&self, address: Address) -> ReplayResult<usize> {
        Ok(self.lookup_code(address)?.len())
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
        Ok(self.substate.drain_logs(tx_hash, tx_index, block_number, block_hash, block_timestamp))
    }

    fn snapshot(&mut self) -> ReplayResult<u64> {
        let world_id = self.world.push();
        let substate_id = self.substate.snapshot();
        debug_assert_eq!(world_id.0, substate_id.0);
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
        self.tx_base = Some(self.world.push());
        Ok(())
    }

    #[instrument(level = "trace", skip(self))]
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
                    balance: self.lookup_balance(address)?,
                    nonce: self.lookup_nonce(address)?,
                    code_hash: self.get_code_hash(address)?,
                    code: self.lookup_code(address)?,
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

impl Lifecycle for StructState {
    fn begin_block(&mut self, number: u64) -> ReplayResult<()> {
        self.lifecycle.begin_block(number)?;
        self.current_block = Some(number);
        self.substate.reset_log_index();
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    fn end_block(&mut self) -> ReplayResult<()> {
        self.lifecycle.end_block()?;
        let block = self.current_block.unwrap_or_default();
        self.world.flatten();
        let frame = std::mem::take(self.world.top_mut());

        let mut batch = WriteBatch::default();
        for (&(address, key), &value) in &frame.storage {
            let mut composite = [0u8; 52];
            composite[..20].copy_from_slice(address.as_bytes());
            composite[20..].copy_from_slice(key.as_bytes());
            if value.is_zero() {
                batch.delete_cf(self.cf(CF_STORAGE), composite);
            } else {
                batch.put_cf(self.cf(CF_STORAGE), composite, value.as_bytes());
            }
            batch.put_cf(
                self.cf(CF_STORAGE_HISTORY),
                storage_history_key(address, key, block),
                value.as_bytes(),
            );
        }
        for (&address, code) in &frame.code {
            if !code.is_empty() {
                batch.put_cf(self.cf(CF_CODE), keccak(code).as_bytes(), code.as_ref());
            }
        }
        for &address in &frame.deleted {
            batch.delete_cf(self.cf(CF_ACCOUNTS), address.as_bytes());
            batch.put_cf(self.cf(CF_ACCOUNT_HISTORY), account_history_key(address, block), []);
        }
        for &address in &frame.touched {
            if frame.deleted.contains(&address) {
                continue;
            }
            let balance = self.lookup_balance(address)?;
            let nonce = self.lookup_nonce(address)?;
            let code = self.lookup_code(address)?;
            let code_hash = if code.is_empty() { empty_code_hash() } else { keccak(&code) };
            let encoded = encode_account(balance, nonce, code_hash);
            batch.put_cf(self.cf(CF_ACCOUNTS), address.as_bytes(), &encoded);
            batch.put_cf(self.cf(CF_ACCOUNT_HISTORY), account_history_key(address, block), &encoded);
        }
        self.db.write(batch)?;
        Ok(())
    }

    fn begin_sync_period(&mut self, _id: u64) -> ReplayResult<()> {
        self.lifecycle.begin_sync_period()
    }

    fn end_sync_period(&mut self) -> ReplayResult<()> {
        self.lifecycle.end_sync_period()
    }

    fn get_hash(&self) -> ReplayResult<H256> {
        let mut buf = Vec::new();
        let iter = self.db.iterator_cf(self.cf(CF_ACCOUNTS), IteratorMode::Start);
        for item in iter {
            let (key, value) = item?;
            buf.extend_from_slice(&key);
            buf.extend_from_slice(&value);
        }
        Ok(keccak(&buf))
    }

    fn close(&mut self) -> ReplayResult<()> {
        self.lifecycle.close()
    }

    fn start_bulk_load(&mut self, block: u64) -> ReplayResult<Box<dyn BulkLoader + '_>> {
        self.lifecycle.require_between_blocks("start_bulk_load")?;
        Ok(Box::new(StructBulkLoader { state: self, block }))
    }

    fn get_archive_state(&self, block: u64) -> ReplayResult<Box<dyn ArchiveView>> {
        Ok(Box::new(StructArchiveView {
            db: self.db.clone(),
            block,
            released: false,
        }))
    }

    fn get_archive_block_height(&self) -> ReplayResult<Option<u64>> {
        Ok(self.current_block.or_else(|| {
            self.db
                .iterator_cf(self.cf(CF_ACCOUNT_HISTORY), IteratorMode::End)
                .next()
                .and_then(Result::ok)
                .map(|(key, _)| u64::from_be_bytes(key[20..28].try_into().unwrap_or_default()))
        }))
    }
}

struct StructBulkLoader<'a> {
    state: &'a mut StructState,
    #[allow(dead_code)]
    block: u64,
}

impl BulkLoader for StructBulkLoader<'_> {
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
        self.state.world.top_mut().storage.insert((address, key), value);
        Ok(())
    }

    fn set_code(&mut self, address: Address, code: Bytes) -> ReplayResult<()> {
        self.state.world.top_mut().code.insert(address, code);
        Ok(())
    }

    fn close(self: Box<Self>) -> ReplayResult<()> {
        self.state.current_block = Some(0);
        let result = {
            self.state.world.flatten();
            let frame = std::mem::take(self.state.world.top_mut());
            let mut batch = WriteBatch::default();
            for (&(address, key), &value) in &frame.storage {
                let mut composite = [0u8; 52];
                composite[..20].copy_from_slice(address.as_bytes());
                composite[20..].copy_from_slice(key.as_bytes());
                batch.put_cf(self.state.cf(CF_STORAGE), composite, value.as_bytes());
            }
            for (&address, code) in &frame.code {
                if !code.is_empty() {
                    batch.put_cf(self.state.cf(CF_CODE), keccak(code).as_bytes(), code.as_ref());
                }
            }
            for &address in &frame.touched {
                let balance = frame.balances.get(&address).copied().unwrap_or_default();
                let nonce = frame.nonces.get(&address).copied().unwrap_or_default();
                let code = frame.code.get(&address).cloned().unwrap_or_default();
                let code_hash = if code.is_empty() { empty_code_hash() } else { keccak(&code) };
                let encoded = encode_account(balance, nonce, code_hash);
                batch.put_cf(self.state.cf(CF_ACCOUNTS), address.as_bytes(), &encoded);
            }
            self.state.db.write(batch)
        };
        self.state.current_block = None;
        result.map_err(ReplayError::from)
    }
}

struct StructArchiveView {
    db: Arc<DB>,
    block: u64,
    released: bool,
}

impl StructArchiveView {
    fn cf(&self, name: &str) -> impl rocksdb::AsColumnFamilyRef + '_ {
        self.db.cf_handle(name).expect("column family registered at open")
    }

    fn account_as_of(&self, address: Address) -> ReplayResult<Option<(U256, u64, H256)>> {
        let upper = account_history_key(address, self.block);
        let mode = IteratorMode::From(&upper, Direction::Reverse);
        for item in self.db.iterator_cf(self.cf(CF_ACCOUNT_HISTORY), mode) {
            let (key, value) = item?;
            if key.len() != 28 || &key[..20] != address.as_bytes() {
                break;
            }
            let found_block = u64::from_be_bytes(key[20..].try_into().unwrap_or_default());
            if found_block > self.block {
                continue;
            }
            return Ok(if value.is_empty() { None } else { Some(decode_account(&value)) });
        }
        Ok(None)
    }

    fn storage_as_of(&self, address: Address, slot: H256) -> ReplayResult<H256> {
        let upper = storage_history_key(address, slot, self.block);
        let mode = IteratorMode::From(&upper, Direction::Reverse);
        for item in self.db.iterator_cf(self.cf(CF_STORAGE_HISTORY), mode) {
            let (key, value) = item?;
            if key.len() != 60 || &key[..20] != address.as_bytes() || &key[20..52] != slot.as_bytes() {
                break;
            }
            let found_block = u64::from_be_bytes(key[52..].try_into().unwrap_or_default());
            if found_block > self.block {
                continue;
            }
            return Ok(H256::from_slice(&value));
        }
        Ok(H256::zero())
    }
}

impl ViewAndMutate for StructArchiveView {
    fn create_account(&mut self, _address: Address) -> ReplayResult<()> {
        Err(ReplayError::ReadOnlyView)
    }
    fn create_contract(&mut self, _address: Address) -> ReplayResult<()> {
        Err(ReplayError::ReadOnlyView)
    }
    fn exist(&self, address: Address) -> ReplayResult<bool> {
        Ok(self.account_as_of(address)?.is_some())
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
        Ok(self.account_as_of(address)?.map(|a| a.0).unwrap_or_default())
    }
    fn add_balance(&mut self, _address: Address, _amount: U256) -> ReplayResult<U256> {
        Err(ReplayError::ReadOnlyView)
    }
    fn sub_balance(&mut self, _address: Address, _amount: U256) -> ReplayResult<U256> {
        Err(ReplayError::ReadOnlyView)
    }
    fn get_nonce(&self, address: Address) -> ReplayResult<u64> {
        Ok(self.account_as_of(address)?.map(|a| a.1).unwrap_or_default())
    }
    fn set_nonce(&mut self, _address: Address, _nonce: u64) -> ReplayResult<()> {
        Err(ReplayError::ReadOnlyView)
    }
    fn get_committed_state(&self, address: Address, key: H256) -> ReplayResult<H256> {
        self.storage_as_of(address, key)
    }
    fn get_state(&self, address: Address, key: H256) -> ReplayResult<H256> {
        self.storage_as_of(address, key)
    }
    fn set_state(&mut self, _address: Address, _key: H256, _value: H256) -> ReplayResult<H256> {
        Err(ReplayError::ReadOnlyView)
    }
    fn get_storage_root(&self, _address: Address) -> ReplayResult<H256> {
        Ok(H256::zero())
    }
    fn set_transient_state(&mut self, _address: Address, _key: H256, _value: H256) -> ReplayResult<()> {
        Err(ReplayError::ReadOnlyView)
    }
    fn get_transient_state(&self, _address: Address, _key: H256) -> ReplayResult<H256> {
        Ok(H256::zero())
    }
    fn get_code_hash(&self, address: Address) -> ReplayResult<H256> {
        let code = self.get_code(address)?;
        Ok(if code.is_empty() { empty_code_hash() } else { keccak(&code) })
    }
    fn get_code(&self, address: Address) -> ReplayResult<Bytes> {
        match self.account_as_of(address)? {
            Some((_, _, code_hash)) if code_hash != empty_code_hash() => Ok(self
                .db
                .get_cf(self.cf(CF_CODE), code_hash.as_bytes())?
                .map(Bytes::from)
                .unwrap_or_default()),
            _ => Ok(Bytes::new()),
        }
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
        Ok(SubstateView::default())
    }
}

impl ArchiveView for StructArchiveView {
    fn archive_hash(&self) -> ReplayResult<H256> {
        Ok(keccak(&self.block.to_be_bytes()))
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
    use tempfile::TempDir;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[test]
    fn basic_read_write_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut s = StructState::open(dir.path()).unwrap();
        let a = addr(1);
        s.begin_block(1).unwrap();
        s.begin_transaction(0).unwrap();
        s.create_account(a).unwrap();
        s.add_balance(a, U256::from(99)).unwrap();
        s.set_nonce(a, 4).unwrap();
        s.end_transaction().unwrap();
        s.end_block().unwrap();
        assert_eq!(s.get_balance(a).unwrap(), U256::from(99));
        assert_eq!(s.get_nonce(a).unwrap(), 4);
    }

    #[test]
    fn archive_view_serves_a_past_block() {
        let dir = TempDir::new().unwrap();
        let mut s = StructState::open(dir.path()).unwrap();
        let a = addr(5);

        s.begin_block(1).unwrap();
        s.begin_transaction(0).unwrap();
        s.create_account(a).unwrap();
        s.add_balance(a, U256::from(10)).unwrap();
        s.end_transaction().unwrap();
        s.end_block().unwrap();

        s.begin_block(2).unwrap();
        s.begin_transaction(0).unwrap();
        s.add_balance(a, U256::from(20)).unwrap();
        s.end_transaction().unwrap();
        s.end_block().unwrap();

        let archived = s.get_archive_state(1).unwrap();
        assert_eq!(archived.get_balance(a).unwrap(), U256::from(10));
        assert_eq!(s.get_balance(a).unwrap(), U256::from(30));
        archived.release().unwrap();
    }

    #[test]
    fn archive_mutation_is_rejected() {
        let dir = TempDir::new().unwrap();
        let s = StructState::open(dir.path()).unwrap();
        let mut archived = s.get_archive_state(0).unwrap();
        assert!(matches!(archived.set_nonce(addr(9), 1), Err(ReplayError::ReadOnlyView)));
    }
}
