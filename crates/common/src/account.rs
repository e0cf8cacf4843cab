use crate::{empty_code_hash, keccak, H256, U256};

/// The conceptual shape of an account (spec.md §3). Not every backend
/// materializes this struct directly — the reference backend does, the
/// column-oriented backend keeps the same fields split across tables — but
/// every backend's externally observable behavior must agree with it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Account {
    pub balance: U256,
    pub nonce: u64,
    pub code: bytes::Bytes,
    pub code_hash: H256,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            balance: U256::zero(),
            nonce: 0,
            code: bytes::Bytes::new(),
            code_hash: empty_code_hash(),
        }
    }
}

impl Account {
    pub fn with_code(code: bytes::Bytes) -> Self {
        let code_hash = keccak(&code);
        Self {
            code,
            code_hash,
            ..Default::default()
        }
    }

    /// spec.md §3: "an account is considered empty iff nonce = 0, balance =
    /// 0, and code is empty".
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && self.code.is_empty()
    }

    pub fn set_code(&mut self, code: bytes::Bytes) -> bytes::Bytes {
        let previous = std::mem::replace(&mut self.code, code);
        self.code_hash = if self.code.is_empty() {
            empty_code_hash()
        } else {
            keccak(&self.code)
        };
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_account_is_empty() {
        assert!(Account::default().is_empty());
    }

    #[test]
    fn nonzero_nonce_is_not_empty() {
        let mut a = Account::default();
        a.nonce = 1;
        assert!(!a.is_empty());
    }

    #[test]
    fn empty_code_string_is_valid_and_empty() {
        // spec.md §8 boundary: "set_code with an empty byte string is valid
        // and makes the account's code empty (not absent)".
        let mut a = Account::with_code(bytes::Bytes::from_static(b"\x60\x00"));
        assert!(!a.code.is_empty());
        let previous = a.set_code(bytes::Bytes::new());
        assert_eq!(previous, bytes::Bytes::from_static(b"\x60\x00"));
        assert!(a.code.is_empty());
        assert_eq!(a.code_hash, empty_code_hash());
    }
}
