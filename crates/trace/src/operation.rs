//! The decoded form of a trace record: one variant per opcode (spec.md
//! §4.3), carrying already-resolved `Address`/`Hash` values rather than raw
//! dictionary identifiers. `writer.rs` builds these from the state-engine
//! call it is tee-ing; `reader.rs` produces them from bytes; `dispatch.rs`
//! is the only place that turns one back into a state-engine call.

use bytes::Bytes;
use replay_common::{Address, Rules, H256, U256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    BeginSyncPeriod { id: u64 },
    EndSyncPeriod,
    BeginBlock { number: u64 },
    EndBlock,
    BeginTransaction { index: u64 },
    EndTransaction,
    SetTxContext { tx_hash: H256, tx_index: u64 },

    CreateAccount { address: Address },
    CreateContract { address: Address },
    SelfDestruct { address: Address },
    SelfDestruct6780 { address: Address },
    AddBalance { address: Address, amount: U256, reason: u8 },
    SubBalance { address: Address, amount: U256, reason: u8 },
    SetNonce { address: Address, nonce: u64, reason: u8 },
    SetState { address: Address, key: H256, value: H256 },
    SetTransientState { address: Address, key: H256, value: H256 },
    SetCode { address: Address, code: Bytes },
    AddRefund { amount: u64 },
    SubRefund { amount: u64 },
    Prepare {
        rules: Rules,
        sender: Address,
        coinbase: Address,
        dest: Option<Address>,
        precompiles: Vec<Address>,
        tx_access_list: Vec<(Address, Vec<H256>)>,
    },
    AddAddressToAccessList { address: Address },
    AddSlotToAccessList { address: Address, key: H256 },
    AddLog { address: Address, topics: Vec<H256>, data: Bytes },
    GetLogs { tx_hash: H256, block_number: u64, block_hash: H256, block_timestamp: u64 },
    Snapshot,
    RevertToSnapshot { id: u32 },
    AddPreimage { hash: H256, preimage: Bytes },

    /// EVM-compatibility markers with no effect on the host-state contract
    /// beyond what `get_hash`/`close` already cover (Design Notes §9:
    /// "blanket ignored operations").
    Commit,
    Finalise { delete_empty_objects: bool },
    IntermediateRoot { delete_empty_objects: bool },
    Close,
}
