//! Reader-side helpers for presentation layers.
//!
//! A reader that observes every published frame can simply scan the dirty
//! bitmask. A reader that runs slower than the simulation misses frames, so
//! it keeps the last effective version it saw per slot and compares against
//! that instead.

use crate::ids::SlotId;
use crate::store::PropertyStore;

/// Per-slot record of the last effective version a reader consumed.
#[derive(Debug, Clone, Default)]
pub struct VersionCursor {
    seen: Vec<u64>,
}

impl VersionCursor {
    pub fn new() -> Self {
        Self::default()
    }

    fn fit(&mut self, store: &PropertyStore) {
        if self.seen.len() < store.capacity() {
            self.seen.resize(store.capacity(), 0);
        }
    }

    /// True once per change of `slot`; updates the cursor.
    pub fn changed(&mut self, store: &PropertyStore, slot: SlotId) -> bool {
        self.fit(store);
        let version = store.version(slot);
        let seen = &mut self.seen[slot.index()];
        if version > *seen {
            *seen = version;
            true
        } else {
            false
        }
    }

    /// Every slot whose effective version advanced since the last poll,
    /// ascending.
    pub fn poll(&mut self, store: &PropertyStore) -> Vec<SlotId> {
        self.fit(store);
        let mut changed = Vec::new();
        for (index, seen) in self.seen.iter_mut().enumerate().take(store.capacity()) {
            let slot = SlotId(index as u32);
            let version = store.version(slot);
            if version > *seen {
                *seen = version;
                changed.push(slot);
            }
        }
        changed
    }

    /// Forgets everything seen, so the next poll reports every slot that was
    /// ever written or resynced.
    pub fn reset(&mut self) {
        self.seen.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::PropertyValue;
    use proptest::prelude::*;

    #[test]
    fn test_cursor_reports_each_change_once() {
        let mut store = PropertyStore::new(4, 8);
        let mut cursor = VersionCursor::new();

        store.write(SlotId(2), PropertyValue::Int(1)).unwrap();
        assert!(cursor.changed(&store, SlotId(2)));
        assert!(!cursor.changed(&store, SlotId(2)));
        assert!(!cursor.changed(&store, SlotId(1)));
    }

    #[test]
    fn test_cursor_survives_missed_frames() {
        let mut store = PropertyStore::new(4, 8);
        let mut cursor = VersionCursor::new();
        for v in 0..5 {
            store.write(SlotId(0), PropertyValue::Int(v)).unwrap();
            store.new_frame();
        }
        // Dirty bits are long gone, versions are not
        assert!(!store.any_dirty());
        assert_eq!(cursor.poll(&store), vec![SlotId(0)]);
    }

    proptest! {
        /// After a heartbeat, every slot reads as changed exactly once, by
        /// cursor and by bitmask.
        #[test]
        fn prop_heartbeat_convergence(
            capacity in 1usize..150,
            writes in proptest::collection::vec((0usize..150, any::<i64>()), 0..40),
        ) {
            let mut store = PropertyStore::new(capacity, 16);
            let mut cursor = VersionCursor::new();
            for (slot, v) in writes {
                store.write(SlotId((slot % capacity) as u32), PropertyValue::Int(v)).unwrap();
            }
            cursor.poll(&store);
            store.new_frame();

            store.mark_all_dirty();
            let changed = cursor.poll(&store);
            prop_assert_eq!(changed.len(), capacity);
            prop_assert_eq!(store.dirty_count(), capacity);
            prop_assert_eq!(store.dirty_slots().count(), capacity);
            prop_assert!(cursor.poll(&store).is_empty());
        }
    }
}
