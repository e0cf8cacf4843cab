//! Transaction-scoped bookkeeping shared by every backend: access list,
//! refund counter, self-destruct registry, transient storage and pending
//! logs (spec.md §3). Built on the generic `Tower` so the same revert
//! mechanics back both this and a backend's world-state overlay, and so a
//! single `SnapshotId` can be made to cover both (each backend is
//! responsible for keeping its own world-state tower and this `Substate`'s
//! tower in lock-step, see `memory.rs`).

use crate::snapshot::{Overlay, SnapshotId, Tower};
use crate::contract::Log;
use replay_common::{Address, ReplayError, ReplayResult, H256};
use rustc_hash::{FxHashMap, FxHashSet};

#[derive(Debug, Default)]
pub struct SubstateFrame {
    accessed_addresses: FxHashSet<Address>,
    accessed_slots: FxHashSet<(Address, H256)>,
    /// Addresses `create_account`/`create_contract`'d since the last
    /// `begin_transaction` — used to resolve EIP-6780 eligibility.
    created_in_tx: FxHashSet<Address>,
    /// address -> (created in this transaction at call time, called via the
    /// EIP-6780 primitive rather than the pre-EIP-6780 one).
    self_destructed: FxHashMap<Address, (bool, bool)>,
    transient_storage: FxHashMap<(Address, H256), H256>,
    refund_delta: i64,
    logs: Vec<PendingLog>,
}

#[derive(Debug, Clone)]
struct PendingLog {
    address: Address,
    topics: Vec<H256>,
    data: bytes::Bytes,
}

impl Overlay for SubstateFrame {
    fn merge_newer(&mut self, newer: Self) {
        self.accessed_addresses.extend(newer.accessed_addresses);
        self.accessed_slots.extend(newer.accessed_slots);
        self.created_in_tx.extend(newer.created_in_tx);
        self.self_destructed.extend(newer.self_destructed);
        self.transient_storage.extend(newer.transient_storage);
        self.refund_delta += newer.refund_delta;
        self.logs.extend(newer.logs);
    }
}

#[derive(Default)]
pub struct Substate {
    tower: Tower<SubstateFrame>,
    next_log_index: u64,
    tx_index: u64,
}

impl Substate {
    pub fn new() -> Self {
        Self {
            tower: Tower::new(),
            next_log_index: 0,
            tx_index: 0,
        }
    }

    pub fn depth(&self) -> u64 {
        self.tower.depth()
    }

    /// Folds the whole tower into its base frame, the same commit point
    /// `end_transaction` reaches for the backend's own world-state tower.
    pub fn flatten(&mut self) {
        self.tower.flatten();
    }

    pub fn set_current_tx_index(&mut self, index: u64) {
        self.tx_index = index;
    }

    pub fn current_tx_index(&self) -> u64 {
        self.tx_index
    }

    pub fn set_tx_context(&mut self, _tx_hash: H256, tx_index: u64) {
        self.tx_index = tx_index;
    }

    /// Resets all transaction-scoped state: access list, refund, transient
    /// storage and the creation/self-destruct sets. The log index counter is
    /// intentionally **not** reset here — it is block-scoped (spec.md §4.1.5)
    /// and is reset by the caller at `begin_block`.
    pub fn begin_transaction(&mut self) {
        self.tower.reset();
    }

    pub fn reset_log_index(&mut self) {
        self.next_log_index = 0;
    }

    pub fn snapshot(&mut self) -> SnapshotId {
        self.tower.push()
    }

    pub fn revert_to(&mut self, id: SnapshotId) -> ReplayResult<()> {
        self.tower.revert_to(id)
    }

    pub fn is_live(&self, id: SnapshotId) -> bool {
        self.tower.is_live(id)
    }

    pub fn mark_created(&mut self, address: Address) {
        self.tower.top_mut().created_in_tx.insert(address);
    }

    pub fn was_created_in_tx(&self, address: Address) -> bool {
        self.tower
            .iter_top_down()
            .any(|f| f.created_in_tx.contains(&address))
    }

    /// Marks `address` for deletion via whichever self-destruct primitive
    /// was called, recording whether it was created in this transaction at
    /// that moment. Returns whether it was already marked.
    pub fn mark_self_destruct(&mut self, address: Address, eip6780: bool) -> bool {
        let already = self.has_self_destructed(address);
        let created = self.was_created_in_tx(address);
        self.tower
            .top_mut()
            .self_destructed
            .insert(address, (created, eip6780));
        already
    }

    pub fn has_self_destructed(&self, address: Address) -> bool {
        self.tower
            .iter_top_down()
            .any(|f| f.self_destructed.contains_key(&address))
    }

    /// Every `(address, created_in_same_tx, via_eip6780)` triple marked for
    /// self-destruct by the end of the transaction, used by
    /// `end_transaction` to apply pre-EIP-6780 vs EIP-6780 deletion rules
    /// (spec.md §3).
    pub fn self_destructed(&self) -> Vec<(Address, bool, bool)> {
        let mut seen = FxHashMap::default();
        for frame in self.tower.iter_top_down() {
            for (&addr, &info) in &frame.self_destructed {
                seen.entry(addr).or_insert(info);
            }
        }
        seen.into_iter()
            .map(|(addr, (created, eip6780))| (addr, created, eip6780))
            .collect()
    }

    pub fn add_accessed_address(&mut self, address: Address) -> bool {
        let already = self.address_in_access_list(address);
        self.tower.top_mut().accessed_addresses.insert(address);
        already
    }

    pub fn address_in_access_list(&self, address: Address) -> bool {
        self.tower
            .iter_top_down()
            .any(|f| f.accessed_addresses.contains(&address))
    }

    pub fn add_accessed_slot(&mut self, address: Address, key: H256) -> bool {
        let already = self.slot_in_access_list(address, key);
        self.tower.top_mut().accessed_slots.insert((address, key));
        already
    }

    pub fn slot_in_access_list(&self, address: Address, key: H256) -> bool {
        self.tower
            .iter_top_down()
            .any(|f| f.accessed_slots.contains(&(address, key)))
    }

    pub fn add_refund(&mut self, amount: u64) {
        self.tower.top_mut().refund_delta += amount as i64;
    }

    pub fn sub_refund(&mut self, amount: u64) -> ReplayResult<()> {
        if (amount as i64) > self.get_refund() as i64 {
            return Err(ReplayError::RefundUnderflow);
        }
        self.tower.top_mut().refund_delta -= amount as i64;
        Ok(())
    }

    pub fn get_refund(&self) -> u64 {
        let total: i64 = self.tower.iter_top_down().map(|f| f.refund_delta).sum();
        total.max(0) as u64
    }

    pub fn set_transient(&mut self, address: Address, key: H256, value: H256) {
        self.tower
            .top_mut()
            .transient_storage
            .insert((address, key), value);
    }

    pub fn get_transient(&self, address: Address, key: H256) -> H256 {
        self.tower
            .iter_top_down()
            .find_map(|f| f.transient_storage.get(&(address, key)).copied())
            .unwrap_or_default()
    }

    pub fn add_log(&mut self, address: Address, topics: Vec<H256>, data: bytes::Bytes) {
        self.tower.top_mut().logs.push(PendingLog {
            address,
            topics,
            data,
        });
    }

    /// Drains every pending log (across the whole tower, oldest first) and
    /// stamps it with the supplied context and a block-ascending `Index`.
    pub fn drain_logs(
        &mut self,
        tx_hash: H256,
        tx_index: u64,
        block_number: u64,
        block_hash: H256,
        block_timestamp: u64,
    ) -> Vec<Log> {
        let mut pending = Vec::new();
        for frame in self.tower.iter_top_down() {
            pending.extend(frame.logs.iter().cloned());
        }
        pending.reverse();
        pending
            .into_iter()
            .map(|p| {
                let index = self.next_log_index;
                self.next_log_index += 1;
                Log {
                    address: p.address,
                    topics: p.topics,
                    data: p.data,
                    tx_hash,
                    tx_index,
                    block_number,
                    block_hash,
                    block_timestamp,
                    index,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_logs_before_any_add_log_is_empty() {
        let mut s = Substate::new();
        let logs = s.drain_logs(H256::zero(), 0, 1, H256::zero(), 0);
        assert!(logs.is_empty());
    }

    #[test]
    fn sub_refund_below_zero_is_an_error() {
        let mut s = Substate::new();
        assert!(s.sub_refund(1).is_err());
        s.add_refund(5);
        assert!(s.sub_refund(10).is_err());
        assert_eq!(s.get_refund(), 5);
    }

    #[test]
    fn eip6780_marks_creation_flag_at_call_time() {
        let mut s = Substate::new();
        let a = Address::repeat_byte(1);
        s.mark_created(a);
        assert!(!s.mark_self_destruct(a, true));
        assert_eq!(s.self_destructed(), vec![(a, true, true)]);
    }

    #[test]
    fn access_list_add_returns_previous_membership() {
        let mut s = Substate::new();
        let a = Address::repeat_byte(2);
        assert!(!s.add_accessed_address(a));
        assert!(s.add_accessed_address(a));
    }
}
