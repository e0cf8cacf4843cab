//! Word types, account shape, and the shared error taxonomy for the replay
//! state engine. Every other crate in the workspace depends on this one and
//! nothing here depends back on them.

pub use ethereum_types::{Address, H256, U256};

pub mod account;
pub mod error;
pub mod rules;
pub mod update;

pub use account::Account;
pub use error::{ReplayError, ReplayResult};
pub use rules::Rules;
pub use update::AccountUpdate;

/// A `Hash` is just a 32-byte word; re-exported under this name because the
/// specification uses it for both account keys and storage keys/values.
pub type Hash = H256;

/// keccak256, used to content-address contract code (`Account::code_hash`)
/// and nowhere else in this crate — callers needing keccak of arbitrary
/// structures should hash with `sha3` directly.
pub fn keccak(bytes: &[u8]) -> H256 {
    use sha3::{Digest, Keccak256};
    H256::from_slice(Keccak256::digest(bytes).as_slice())
}

/// keccak256 of the empty byte string — the code hash of an account whose
/// code is empty (as opposed to absent).
pub fn empty_code_hash() -> H256 {
    keccak(&[])
}
