//! Explicit lifecycle state machine (spec.md §3, Design Notes §9: "re-architect
//! as an explicit state-machine enum on the engine so that `InvalidLifecycle`
//! is detected deterministically rather than as an opaque backend panic").

use replay_common::{ReplayError, ReplayResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Closed,
    Open,
    InSync,
    InBlock,
    InTx,
}

/// Tracks the current phase plus the bookkeeping needed to validate the two
/// monotonicity rules the spec calls out: block numbers strictly increase
/// for the live (head) state, and a block must end before the next begins.
#[derive(Debug, Clone)]
pub struct LifecycleGuard {
    phase: Phase,
    current_block: Option<u64>,
    last_committed_block: Option<u64>,
    is_archive: bool,
}

impl Default for LifecycleGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleGuard {
    pub fn new() -> Self {
        Self {
            phase: Phase::Open,
            current_block: None,
            last_committed_block: None,
            is_archive: false,
        }
    }

    /// Archive views are not subject to block monotonicity: they are
    /// immutable, so `begin_block` is never legal on one.
    pub fn new_archive() -> Self {
        let mut g = Self::new();
        g.is_archive = true;
        g
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn invalid(&self, op: &str) -> ReplayError {
        ReplayError::InvalidLifecycle(format!("{op} called while in phase {:?}", self.phase))
    }

    pub fn begin_sync_period(&mut self) -> ReplayResult<()> {
        match self.phase {
            Phase::Open => {
                self.phase = Phase::InSync;
                Ok(())
            }
            _ => Err(self.invalid("begin_sync_period")),
        }
    }

    pub fn end_sync_period(&mut self) -> ReplayResult<()> {
        match self.phase {
            Phase::InSync => {
                self.phase = Phase::Open;
                Ok(())
            }
            _ => Err(self.invalid("end_sync_period")),
        }
    }

    pub fn begin_block(&mut self, number: u64) -> ReplayResult<()> {
        if self.is_archive {
            return Err(self.invalid("begin_block (archive view)"));
        }
        match self.phase {
            Phase::Open | Phase::InSync => {
                if let Some(last) = self.last_committed_block
                    && number <= last
                {
                    return Err(ReplayError::InvalidLifecycle(format!(
                        "block numbers must strictly increase: {number} after {last}"
                    )));
                }
                self.current_block = Some(number);
                self.phase = Phase::InBlock;
                Ok(())
            }
            _ => Err(self.invalid("begin_block")),
        }
    }

    pub fn end_block(&mut self) -> ReplayResult<()> {
        match self.phase {
            Phase::InBlock => {
                self.last_committed_block = self.current_block;
                self.phase = Phase::Open;
                Ok(())
            }
            _ => Err(self.invalid("end_block")),
        }
    }

    pub fn begin_transaction(&mut self) -> ReplayResult<()> {
        match self.phase {
            Phase::InBlock => {
                self.phase = Phase::InTx;
                Ok(())
            }
            _ => Err(self.invalid("begin_transaction")),
        }
    }

    pub fn end_transaction(&mut self) -> ReplayResult<()> {
        match self.phase {
            Phase::InTx => {
                self.phase = Phase::InBlock;
                Ok(())
            }
            _ => Err(self.invalid("end_transaction")),
        }
    }

    pub fn require_in_tx(&self, op: &str) -> ReplayResult<()> {
        if self.phase == Phase::InTx {
            Ok(())
        } else {
            Err(self.invalid(op))
        }
    }

    pub fn require_between_blocks(&self, op: &str) -> ReplayResult<()> {
        match self.phase {
            Phase::Open | Phase::InSync => Ok(()),
            _ => Err(self.invalid(op)),
        }
    }

    pub fn close(&mut self) -> ReplayResult<()> {
        self.phase = Phase::Closed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let mut g = LifecycleGuard::new();
        g.begin_block(1).unwrap();
        g.begin_transaction().unwrap();
        g.end_transaction().unwrap();
        g.end_block().unwrap();
        g.begin_block(2).unwrap();
    }

    #[test]
    fn non_monotonic_block_number_rejected() {
        let mut g = LifecycleGuard::new();
        g.begin_block(5).unwrap();
        g.end_block().unwrap();
        assert!(g.begin_block(5).is_err());
        assert!(g.begin_block(4).is_err());
    }

    #[test]
    fn begin_transaction_requires_open_block() {
        let mut g = LifecycleGuard::new();
        assert!(g.begin_transaction().is_err());
    }

    #[test]
    fn archive_rejects_begin_block() {
        let mut g = LifecycleGuard::new_archive();
        assert!(g.begin_block(1).is_err());
    }
}
