//! The snapshot frame tower (spec.md §2 "Snapshot frame", §4.2.1). Generic
//! over the overlay payload so the reference backend's world-state overlay
//! and the per-transaction substate bookkeeping (`substate.rs`) can both be
//! built on the same revert mechanics, matching Design Notes §9: "represent
//! the tower as an arena-indexed singly-linked list owned by the engine;
//! revert truncates by setting the head index" — here the arena is a `Vec`
//! and the head index is simply the vector's length.

use replay_common::{ReplayError, ReplayResult};

/// A single level of the tower. Implementors describe how an older frame
/// absorbs a newer one when the tower is flattened (end of transaction) or
/// partially merged (a nested snapshot is implicitly kept by not reverting
/// it — flattening only ever happens across the whole tower).
pub trait Overlay: Default {
    fn merge_newer(&mut self, newer: Self);
}

/// An opaque, monotonically increasing handle into a `Tower`. `0` is never
/// issued by `push`; it is reserved for the tower's permanent base frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotId(pub u64);

pub struct Tower<F> {
    frames: Vec<F>,
}

impl<F: Overlay> Default for Tower<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Overlay> Tower<F> {
    pub fn new() -> Self {
        Self {
            frames: vec![F::default()],
        }
    }

    /// Pushes a fresh frame and returns its id. Subsequent writes should
    /// target `self.top_mut()`.
    pub fn push(&mut self) -> SnapshotId {
        self.frames.push(F::default());
        SnapshotId((self.frames.len() - 1) as u64)
    }

    /// `true` iff `id` still names a live (not-yet-reverted) frame.
    pub fn is_live(&self, id: SnapshotId) -> bool {
        let idx = id.0 as usize;
        idx != 0 && idx < self.frames.len()
    }

    /// Discards every frame pushed at or after `id`, restoring the state as
    /// it was the instant before `id` was returned by `push`.
    pub fn revert_to(&mut self, id: SnapshotId) -> ReplayResult<()> {
        if !self.is_live(id) {
            return Err(ReplayError::InvalidSnapshot(id.0));
        }
        self.frames.truncate(id.0 as usize);
        Ok(())
    }

    pub fn top(&self) -> &F {
        self.frames.last().expect("tower always has a base frame")
    }

    pub fn top_mut(&mut self) -> &mut F {
        self.frames
            .last_mut()
            .expect("tower always has a base frame")
    }

    /// Iterates frames from the most recently pushed down to the base.
    pub fn iter_top_down(&self) -> impl Iterator<Item = &F> {
        self.frames.iter().rev()
    }

    /// Iterates frames from the base up to the most recently pushed, the
    /// order in which they were written. Used when an older value must be
    /// overwritten by a newer one as the caller folds them by hand (e.g.
    /// resolving a per-key "current value" without reverse-search).
    pub fn iter_bottom_up(&self) -> impl Iterator<Item = &F> {
        self.frames.iter()
    }

    /// Iterates frames strictly older than `id`, newest-of-the-rest first.
    /// Used to read "the value as of before `id` was pushed" while ignoring
    /// everything pushed at or after it (e.g. `get_committed_state`).
    pub fn iter_below(&self, id: SnapshotId) -> impl Iterator<Item = &F> {
        let bound = (id.0 as usize).min(self.frames.len());
        self.frames[..bound].iter().rev()
    }

    pub fn depth(&self) -> u64 {
        (self.frames.len() - 1) as u64
    }

    /// Folds every frame into the base frame in push order (oldest first,
    /// so the most recently written value always wins) and resets the
    /// tower to hold just that single, now-committed frame.
    pub fn flatten(&mut self) {
        let mut frames = std::mem::take(&mut self.frames);
        let mut acc = frames.remove(0);
        for newer in frames {
            acc.merge_newer(newer);
        }
        self.frames = vec![acc];
    }

    /// Replaces the whole tower with a single fresh base frame, discarding
    /// history (used after `flatten` has been consumed, or to reset
    /// transaction-scoped state at `begin_transaction`).
    pub fn reset(&mut self) {
        self.frames = vec![F::default()];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Debug, PartialEq, Eq)]
    struct Counter(i64);
    impl Overlay for Counter {
        fn merge_newer(&mut self, newer: Self) {
            self.0 += newer.0;
        }
    }

    #[test]
    fn nested_snapshot_revert_matches_spec_scenario() {
        // spec.md §8 scenario 2.
        let mut t: Tower<Counter> = Tower::new();
        let s1 = t.push();
        t.top_mut().0 += 10; // pretend "add_balance(a, 10)" after s1.
        let s2 = t.push();
        t.top_mut().0 += 20;
        t.revert_to(s2).unwrap();
        assert_eq!(total(&t), 10);
        t.revert_to(s1).unwrap();
        assert_eq!(total(&t), 0);
    }

    fn total(t: &Tower<Counter>) -> i64 {
        t.iter_top_down().map(|f| f.0).sum()
    }

    #[test]
    fn revert_already_reverted_handle_fails() {
        let mut t: Tower<Counter> = Tower::new();
        let s = t.push();
        t.revert_to(s).unwrap();
        assert!(t.revert_to(s).is_err());
    }

    #[test]
    fn flatten_merges_in_push_order() {
        let mut t: Tower<Counter> = Tower::new();
        t.top_mut().0 = 1;
        t.push();
        t.top_mut().0 = 2;
        t.flatten();
        assert_eq!(t.top().0, 3);
        assert_eq!(t.depth(), 0);
    }
}
