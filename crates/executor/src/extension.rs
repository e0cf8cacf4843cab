//! Pipeline observers (spec.md §4.4 "extensions"): declaration order for
//! `pre_*` hooks, reverse declaration order for `post_*` hooks. Every hook
//! has a no-op default so an extension only overrides what it cares about.

use crate::item::TransactionInfo;
use replay_common::ReplayResult;
use replay_state::StateBackend;

pub trait Extension {
    fn pre_run(&mut self, _state: &mut dyn StateBackend, _from: u64, _to: u64) -> ReplayResult<()> {
        Ok(())
    }
    fn pre_block(&mut self, _state: &mut dyn StateBackend, _block: u64) -> ReplayResult<()> {
        Ok(())
    }
    fn pre_transaction(
        &mut self,
        _state: &mut dyn StateBackend,
        _info: &TransactionInfo,
    ) -> ReplayResult<()> {
        Ok(())
    }
    fn post_transaction(
        &mut self,
        _state: &mut dyn StateBackend,
        _info: &TransactionInfo,
    ) -> ReplayResult<()> {
        Ok(())
    }
    fn post_block(&mut self, _state: &mut dyn StateBackend, _block: u64) -> ReplayResult<()> {
        Ok(())
    }
    /// Always invoked, even when the run failed. `result` carries the first
    /// error the run encountered, if any; a `post_run` error of its own only
    /// takes effect when the run otherwise succeeded (spec.md §4.4/§7:
    /// extensions must not swallow processor errors or inject new ones).
    fn post_run(
        &mut self,
        _state: &mut dyn StateBackend,
        _to: u64,
        _result: &ReplayResult<()>,
    ) -> ReplayResult<()> {
        Ok(())
    }
}
