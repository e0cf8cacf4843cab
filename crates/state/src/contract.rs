//! The uniform host-state contract (spec.md §4.1): the union of three
//! role-interfaces that every backend must satisfy identically.

use bytes::Bytes;
use replay_common::{Rules, H256, U256};
use replay_common::{Account, ReplayResult};
use std::collections::BTreeMap;

pub use replay_common::Address;

/// A single EVM log record, pre-stamp. `address`, `topics` and `data` are
/// supplied by `add_log`; the remaining fields are filled in by `get_logs`
/// (spec.md §4.1.5) from the caller-supplied block/transaction context and a
/// block-scoped sequential counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Bytes,
    pub tx_hash: H256,
    pub tx_index: u64,
    pub block_number: u64,
    pub block_hash: H256,
    pub block_timestamp: u64,
    pub index: u64,
}

/// A deterministic, order-independent view of the accounts and slots a
/// transaction (or a run so far) has touched. Distinct from `get_hash`
/// (spec.md §4.1): two backends agreeing on `Substate` does not imply they
/// agree on `get_hash`, and the reverse does not hold either.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substate {
    pub accounts: BTreeMap<Address, Account>,
    pub storage: BTreeMap<(Address, H256), H256>,
}

/// VM-facing role interface (spec.md §4.1 "ViewAndMutate").
pub trait ViewAndMutate {
    fn create_account(&mut self, address: Address) -> ReplayResult<()>;
    fn create_contract(&mut self, address: Address) -> ReplayResult<()>;
    fn exist(&self, address: Address) -> ReplayResult<bool>;
    fn empty(&self, address: Address) -> ReplayResult<bool>;

    /// Returns the balance the account held at the moment of the call.
    fn self_destruct(&mut self, address: Address) -> ReplayResult<U256>;
    /// Returns `(balance at call time, was created in the current transaction)`.
    fn self_destruct_6780(&mut self, address: Address) -> ReplayResult<(U256, bool)>;
    fn has_self_destructed(&self, address: Address) -> ReplayResult<bool>;

    fn get_balance(&self, address: Address) -> ReplayResult<U256>;
    /// Returns the balance *before* this call.
    fn add_balance(&mut self, address: Address, amount: U256) -> ReplayResult<U256>;
    /// Returns the balance *before* this call. Errors if `amount` exceeds
    /// the current balance (spec.md §3: underflow is a programmer error).
    fn sub_balance(&mut self, address: Address, amount: U256) -> ReplayResult<U256>;

    fn get_nonce(&self, address: Address) -> ReplayResult<u64>;
    fn set_nonce(&mut self, address: Address, nonce: u64) -> ReplayResult<()>;

    /// The value committed at the start of the current transaction, ignoring
    /// any uncommitted writes made so far this transaction.
    fn get_committed_state(&self, address: Address, key: H256) -> ReplayResult<H256>;
    fn get_state(&self, address: Address, key: H256) -> ReplayResult<H256>;
    /// Returns the previous value of the slot.
    fn set_state(&mut self, address: Address, key: H256, value: H256) -> ReplayResult<H256>;
    /// See spec.md §4.1 decision 1: not required to be a cryptographic root,
    /// but must distinguish "storage known to be empty" from "not".
    fn get_storage_root(&self, address: Address) -> ReplayResult<H256>;

    fn set_transient_state(&mut self, address: Address, key: H256, value: H256) -> ReplayResult<()>;
    fn get_transient_state(&self, address: Address, key: H256) -> ReplayResult<H256>;

    fn get_code_hash(&self, address: Address) -> ReplayResult<H256>;
    fn get_code(&self, address: Address) -> ReplayResult<Bytes>;
    /// Returns the previous code bytes.
    fn set_code(&mut self, address: Address, code: Bytes) -> ReplayResult<Bytes>;
    fn get_code_size(&self, address: Address) -> ReplayResult<usize>;

    fn add_refund(&mut self, amount: u64) -> ReplayResult<()>;
    fn sub_refund(&mut self, amount: u64) -> ReplayResult<()>;
    fn get_refund(&self) -> ReplayResult<u64>;

    #[allow(clippy::too_many_arguments)]
    fn prepare(
        &mut self,
        rules: Rules,
        sender: Address,
        coinbase: Address,
        dest: Option<Address>,
        precompiles: &[Address],
        tx_access_list: &[(Address, Vec<H256>)],
    ) -> ReplayResult<()>;
    fn address_in_access_list(&self, address: Address) -> ReplayResult<bool>;
    fn slot_in_access_list(&self, address: Address, key: H256) -> ReplayResult<bool>;
    /// Returns whether the address was already warm.
    fn add_address_to_access_list(&mut self, address: Address) -> ReplayResult<bool>;
    /// Returns whether the slot was already warm.
    fn add_slot_to_access_list(&mut self, address: Address, key: H256) -> ReplayResult<bool>;

    fn add_log(&mut self, address: Address, topics: Vec<H256>, data: Bytes) -> ReplayResult<()>;
    fn get_logs(
        &mut self,
        tx_hash: H256,
        block_number: u64,
        block_hash: H256,
        block_timestamp: u64,
    ) -> ReplayResult<Vec<Log>>;

    fn snapshot(&mut self) -> ReplayResult<u64>;
    fn revert_to_snapshot(&mut self, id: u64) -> ReplayResult<()>;

    fn begin_transaction(&mut self, index: u64) -> ReplayResult<()>;
    fn end_transaction(&mut self) -> ReplayResult<()>;
    fn set_tx_context(&mut self, tx_hash: H256, tx_index: u64) -> ReplayResult<()>;

    fn get_substate_post_alloc(&self) -> ReplayResult<Substate>;

    /// EVM-compatibility hook with no semantic effect on most backends
    /// (spec.md §9): records a SHA3 preimage. A correct backend may ignore
    /// the call entirely; tests must not assert on behavior here across
    /// backends.
    fn add_preimage(&mut self, _hash: H256, _preimage: &[u8]) -> ReplayResult<()> {
        Ok(())
    }
}

/// DB-facing role interface (spec.md §4.1 "Lifecycle").
pub trait Lifecycle {
    fn begin_block(&mut self, number: u64) -> ReplayResult<()>;
    fn end_block(&mut self) -> ReplayResult<()>;
    fn begin_sync_period(&mut self, id: u64) -> ReplayResult<()>;
    fn end_sync_period(&mut self) -> ReplayResult<()>;
    fn get_hash(&self) -> ReplayResult<H256>;
    fn close(&mut self) -> ReplayResult<()>;

    fn start_bulk_load(&mut self, block: u64) -> ReplayResult<Box<dyn BulkLoader + '_>>;

    /// Returns `ReplayError::ArchiveUnavailable` for backends that don't
    /// support archive views (spec.md §4.1).
    fn get_archive_state(&self, block: u64) -> ReplayResult<Box<dyn ArchiveView>>;
    fn get_archive_block_height(&self) -> ReplayResult<Option<u64>>;
}

/// Restricted builder usable only between blocks (spec.md §4.1 "BulkLoader").
pub trait BulkLoader {
    fn create_account(&mut self, address: Address) -> ReplayResult<()>;
    fn set_balance(&mut self, address: Address, balance: U256) -> ReplayResult<()>;
    fn set_nonce(&mut self, address: Address, nonce: u64) -> ReplayResult<()>;
    fn set_state(&mut self, address: Address, key: H256, value: H256) -> ReplayResult<()>;
    fn set_code(&mut self, address: Address, code: Bytes) -> ReplayResult<()>;
    fn close(self: Box<Self>) -> ReplayResult<()>;
}

/// A read-only snapshot of the world state at a past committed block
/// (spec.md §6 "Archive view contract"). Satisfies `ViewAndMutate`, but
/// mutating methods must return `ReplayError::ReadOnlyView`.
pub trait ArchiveView: ViewAndMutate {
    fn archive_hash(&self) -> ReplayResult<H256>;
    /// Must be called exactly once; double-release is an error.
    fn release(self: Box<Self>) -> ReplayResult<()>;
}

/// The full contract a backend exposes: every backend in this crate
/// implements both halves on the same type.
pub trait StateBackend: ViewAndMutate + Lifecycle {}
impl<T: ViewAndMutate + Lifecycle> StateBackend for T {}
