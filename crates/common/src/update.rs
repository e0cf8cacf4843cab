use crate::{Account, Address, H256, U256};

/// A single account's observable delta across a block, derived from a
/// backend's committed overlay at `end_block`. Mirrors the teacher's
/// `Evm::get_state_transitions` / `AccountUpdate` shape: it lets the priming
/// loader and the recording proxy report what changed without re-reading an
/// account field by field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccountUpdate {
    pub address: Address,
    pub removed: bool,
    pub new_balance: Option<U256>,
    pub new_nonce: Option<u64>,
    pub new_code: Option<bytes::Bytes>,
    pub added_storage: Vec<(H256, H256)>,
}

impl AccountUpdate {
    pub fn removed(address: Address) -> Self {
        Self {
            address,
            removed: true,
            ..Default::default()
        }
    }

    pub fn from_accounts(address: Address, before: &Account, after: &Account) -> Option<Self> {
        if before == after {
            return None;
        }
        let mut update = Self {
            address,
            ..Default::default()
        };
        if before.balance != after.balance {
            update.new_balance = Some(after.balance);
        }
        if before.nonce != after.nonce {
            update.new_nonce = Some(after.nonce);
        }
        if before.code_hash != after.code_hash {
            update.new_code = Some(after.code.clone());
        }
        Some(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_accounts_produce_no_update() {
        let a = Account::default();
        assert_eq!(AccountUpdate::from_accounts(Address::repeat_byte(1), &a, &a), None);
    }

    #[test]
    fn a_balance_change_is_captured_without_touching_other_fields() {
        let address = Address::repeat_byte(2);
        let before = Account { balance: 0u64.into(), ..Default::default() };
        let after = Account { balance: 10u64.into(), ..Default::default() };

        let update = AccountUpdate::from_accounts(address, &before, &after).unwrap();
        assert_eq!(update.new_balance, Some(10u64.into()));
        assert_eq!(update.new_nonce, None);
        assert_eq!(update.new_code, None);
        assert!(!update.removed);
    }

    #[test]
    fn removed_marks_the_account_without_describing_a_new_state() {
        let address = Address::repeat_byte(3);
        let update = AccountUpdate::removed(address);
        assert!(update.removed);
        assert_eq!(update.new_balance, None);
    }
}
