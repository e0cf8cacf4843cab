//! Priming loader (spec.md §2 overview table): a thin convenience wrapper
//! over `BulkLoader` that lets a caller hand over one fully-formed account
//! (balance, nonce, code, storage slots) per call instead of driving the
//! four primitive setters itself, logging each account it primes.

use bytes::Bytes;
use replay_common::{Address, ReplayResult, H256, U256};
use replay_state::BulkLoader;
use tracing::debug;

/// One account's worth of genesis/snapshot state to prime into a backend
/// via `start_bulk_load`.
pub struct PrimedAccount {
    pub address: Address,
    pub balance: U256,
    pub nonce: u64,
    pub code: Bytes,
    pub storage: Vec<(H256, H256)>,
}

pub struct PrimingLoader<'a> {
    inner: Box<dyn BulkLoader + 'a>,
    primed: usize,
}

impl<'a> PrimingLoader<'a> {
    pub fn new(inner: Box<dyn BulkLoader + 'a>) -> Self {
        Self { inner, primed: 0 }
    }

    pub fn prime(&mut self, account: PrimedAccount) -> ReplayResult<()> {
        self.inner.create_account(account.address)?;
        self.inner.set_balance(account.address, account.balance)?;
        self.inner.set_nonce(account.address, account.nonce)?;
        if !account.code.is_empty() {
            self.inner.set_code(account.address, account.code)?;
        }
        for (key, value) in account.storage {
            self.inner.set_state(account.address, key, value)?;
        }
        self.primed += 1;
        debug!(address = ?account.address, total_primed = self.primed, "primed account");
        Ok(())
    }

    pub fn primed_count(&self) -> usize {
        self.primed
    }

    pub fn close(self) -> ReplayResult<()> {
        debug!(total_primed = self.primed, "closing priming loader");
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replay_state::{Lifecycle, MemoryState, ViewAndMutate};

    #[test]
    fn priming_an_account_is_visible_after_close() {
        let mut state = MemoryState::new();
        let a = Address::repeat_byte(7);
        let k = H256::repeat_byte(1);
        let v = H256::repeat_byte(2);

        {
            let loader = state.start_bulk_load(0).unwrap();
            let mut priming = PrimingLoader::new(loader);
            priming
                .prime(PrimedAccount {
                    address: a,
                    balance: 42u64.into(),
                    nonce: 1,
                    code: Bytes::new(),
                    storage: vec![(k, v)],
                })
                .unwrap();
            assert_eq!(priming.primed_count(), 1);
            priming.close().unwrap();
        }

        assert!(state.exist(a).unwrap());
        assert_eq!(state.get_balance(a).unwrap(), 42u64.into());
        assert_eq!(state.get_state(a, k).unwrap(), v);
    }
}
