/// The subset of hard-fork gated behavior the state engine's contract needs
/// to know about. The engine never loads a chain config or fork schedule
/// itself (that is out of scope, spec.md §1) — callers resolve the active
/// fork and hand the engine these booleans through `prepare`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rules {
    /// EIP-3651: pre-warm the coinbase address in `prepare` iff Shanghai or
    /// later (spec.md §9 Open Questions).
    pub warm_coinbase: bool,
    /// EIP-6780: `self_destruct_6780` only deletes accounts created in the
    /// same transaction.
    pub eip6780_self_destruct: bool,
    /// EIP-161: an account that becomes empty after a state-changing call is
    /// eligible for removal at the end of the transaction. Used by backends'
    /// `end_transaction` bookkeeping alongside self-destruct processing.
    pub clear_empty_accounts: bool,
}

impl Rules {
    pub const fn pre_merge() -> Self {
        Self {
            warm_coinbase: false,
            eip6780_self_destruct: false,
            clear_empty_accounts: false,
        }
    }

    pub const fn shanghai() -> Self {
        Self {
            warm_coinbase: true,
            eip6780_self_destruct: false,
            clear_empty_accounts: true,
        }
    }

    pub const fn cancun_or_later() -> Self {
        Self {
            warm_coinbase: true,
            eip6780_self_destruct: true,
            clear_empty_accounts: true,
        }
    }
}
