//! Per-trace dictionary compression (spec.md §4.3): a value is written in
//! full the first time it is referenced and by a compact identifier every
//! time after. `NONE` marks an unused slot. `reader.rs` relies on the
//! invariant enforced here by construction: an identifier is only ever
//! handed out as the next sequential index, so a reader that has just
//! learned identifier `k` has necessarily already learned `0..k-1`.

use replay_common::{ReplayError, ReplayResult};
use rustc_hash::FxHashMap;
use std::hash::Hash;

/// Sentinel meaning "this operation does not use this slot".
pub const NONE: u32 = u32::MAX;

pub struct Dictionary<T> {
    values: Vec<T>,
    index: FxHashMap<T, u32>,
}

impl<T: Clone + Eq + Hash> Default for Dictionary<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Eq + Hash> Dictionary<T> {
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            index: FxHashMap::default(),
        }
    }

    pub fn len(&self) -> u32 {
        self.values.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns `(id, is_new)`: `is_new` tells the writer whether it must
    /// also emit the value's bytes this time.
    pub fn intern(&mut self, value: T) -> (u32, bool) {
        if let Some(&id) = self.index.get(&value) {
            return (id, false);
        }
        let id = self.len();
        self.values.push(value.clone());
        self.index.insert(value, id);
        (id, true)
    }

    /// Registers `value` as the very next sequential id, failing if the
    /// reader's dictionary and the writer's have fallen out of step.
    pub fn learn(&mut self, id: u32, value: T) -> ReplayResult<()> {
        if id != self.len() {
            return Err(ReplayError::CorruptTrace(format!(
                "dictionary identifier {id} is not the next expected id {}",
                self.len()
            )));
        }
        self.values.push(value.clone());
        self.index.insert(value, id);
        Ok(())
    }

    pub fn get(&self, id: u32) -> ReplayResult<T> {
        self.values
            .get(id as usize)
            .cloned()
            .ok_or_else(|| ReplayError::CorruptTrace(format!("dictionary identifier {id} was never seen")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_values_reuse_the_same_id() {
        let mut d: Dictionary<u64> = Dictionary::new();
        let (id1, new1) = d.intern(42);
        let (id2, new2) = d.intern(7);
        let (id3, new3) = d.intern(42);
        assert_eq!((id1, new1), (0, true));
        assert_eq!((id2, new2), (1, true));
        assert_eq!((id3, new3), (0, false));
    }

    #[test]
    fn learning_an_id_out_of_sequence_is_corrupt() {
        let mut d: Dictionary<u64> = Dictionary::new();
        assert!(d.learn(1, 99).is_err());
        d.learn(0, 99).unwrap();
        assert!(d.learn(0, 100).is_err());
    }
}
