//! Double buffering between the simulation (writer) and presentation (readers).
//!
//! ```text
//! Tick N:
//!   Simulation writes into FRONT  (store A)
//!   Presentation reads from BACK  (store B, state as of tick N-1)
//!
//! flip():
//!   roles swap: A becomes BACK, B becomes FRONT
//!   B catches up to A's changes, then starts a new frame
//!
//! Tick N+1:
//!   Simulation writes into FRONT  (store B)
//!   Presentation reads from BACK  (store A, state as of tick N)
//! ```
//!
//! Writers need `&mut DoubleBuffer` and readers borrow `&DoubleBuffer`, so the
//! borrow checker rules out a flip while a read or write is in progress.

use tickview_env::Tick;

use crate::store::PropertyStore;

/// Owns exactly two stores and the front/back role indicator.
#[derive(Debug, Clone)]
pub struct DoubleBuffer {
    stores: [PropertyStore; 2],
    /// Index of the write target
    front: usize,
    flips: u64,
}

impl DoubleBuffer {
    /// Creates a buffer whose two stores have `capacity` slots each.
    pub fn new(capacity: usize, transition_capacity: usize) -> Self {
        Self {
            stores: [
                PropertyStore::new(capacity, transition_capacity),
                PropertyStore::new(capacity, transition_capacity),
            ],
            front: 0,
            flips: 0,
        }
    }

    /// The write target.
    pub fn front(&self) -> &PropertyStore {
        &self.stores[self.front]
    }

    pub fn front_mut(&mut self) -> &mut PropertyStore {
        &mut self.stores[self.front]
    }

    /// The published store readers observe.
    pub fn back(&self) -> &PropertyStore {
        &self.stores[1 - self.front]
    }

    /// Stamps the write target with the tick about to be written.
    pub fn begin_tick(&mut self, tick: Tick) {
        self.front_mut().set_tick(tick);
    }

    /// Publishes the front store by swapping roles.
    ///
    /// The swap itself copies nothing. Afterwards the new write target
    /// replays the just-published changes so that stable-value suppression
    /// compares against the latest state, and its dirty bits and transition
    /// ring are cleared (`new_frame`).
    pub fn flip(&mut self) {
        self.front = 1 - self.front;
        self.flips += 1;

        let [a, b] = &mut self.stores;
        let (next_front, published) = if self.front == 0 { (a, &*b) } else { (b, &*a) };
        next_front.catch_up(published);
        next_front.set_tick(published.tick());
    }

    /// Grows both stores to at least `slots` slots.
    pub fn ensure_capacity(&mut self, slots: usize) {
        for store in &mut self.stores {
            store.ensure_capacity(slots);
        }
    }

    pub fn capacity(&self) -> usize {
        self.front().capacity()
    }

    /// Number of flips performed so far.
    pub fn flips(&self) -> u64 {
        self.flips
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SlotId;
    use crate::value::PropertyValue;
    use proptest::prelude::*;

    #[test]
    fn test_flip_publishes_front() {
        let mut buffer = DoubleBuffer::new(4, 8);
        buffer.begin_tick(Tick(1));
        buffer.front_mut().write(SlotId(0), PropertyValue::Int(10)).unwrap();

        // Not visible before the flip
        assert_eq!(buffer.back().read(SlotId(0)), PropertyValue::Empty);

        buffer.flip();
        assert_eq!(buffer.back().read(SlotId(0)), PropertyValue::Int(10));
        assert!(buffer.back().is_dirty(SlotId(0)));
        assert_eq!(buffer.flips(), 1);
    }

    #[test]
    fn test_new_front_is_caught_up_and_clean() {
        let mut buffer = DoubleBuffer::new(4, 8);
        buffer.front_mut().write(SlotId(1), PropertyValue::Bool(true)).unwrap();
        buffer.flip();

        let front = buffer.front();
        assert_eq!(front.read(SlotId(1)), PropertyValue::Bool(true));
        assert_eq!(front.version(SlotId(1)), 1);
        assert!(!front.any_dirty());
        assert_eq!(front.transitions().count(), 0);

        // Rewriting the published value is suppressed on the new front
        buffer.begin_tick(Tick(2));
        assert!(!buffer.front_mut().write(SlotId(1), PropertyValue::Bool(true)).unwrap());
        buffer.flip();
        assert!(!buffer.back().any_dirty());
        assert_eq!(buffer.back().version(SlotId(1)), 1);
    }

    #[test]
    fn test_heartbeat_survives_flip() {
        let mut buffer = DoubleBuffer::new(3, 8);
        buffer.front_mut().mark_all_dirty();
        buffer.flip();
        assert_eq!(buffer.back().dirty_count(), 3);
        assert_eq!(buffer.back().force_epoch(), 1);
        assert_eq!(buffer.front().force_epoch(), 1);

        buffer.flip();
        assert!(!buffer.back().any_dirty());
        assert_eq!(buffer.back().force_epoch(), 1);
    }

    #[test]
    fn test_ensure_capacity_grows_both_sides() {
        let mut buffer = DoubleBuffer::new(2, 8);
        buffer.ensure_capacity(100);
        assert_eq!(buffer.front().capacity(), 100);
        assert_eq!(buffer.back().capacity(), 100);
    }

    proptest! {
        /// After every flip the back buffer equals the model state at the end
        /// of that tick: no mixture of old and new values across slots.
        #[test]
        fn prop_flip_publishes_whole_ticks(
            ticks in proptest::collection::vec(
                proptest::collection::vec((0u32..12, 0i64..5), 0..20),
                1..30,
            )
        ) {
            let mut buffer = DoubleBuffer::new(12, 64);
            let mut model = vec![PropertyValue::Empty; 12];

            for (n, writes) in ticks.iter().enumerate() {
                let before = model.clone();
                let mut touched = [false; 12];
                buffer.begin_tick(Tick(n as u64 + 1));
                for (slot, v) in writes {
                    let value = PropertyValue::Int(*v);
                    buffer.front_mut().write(SlotId(*slot), value).unwrap();
                    if model[*slot as usize] != value {
                        touched[*slot as usize] = true;
                    }
                    model[*slot as usize] = value;
                    // Readers still see the previous tick
                    for s in 0..12u32 {
                        prop_assert_eq!(buffer.back().read(SlotId(s)), before[s as usize]);
                    }
                }
                buffer.flip();

                for s in 0..12u32 {
                    let slot = SlotId(s);
                    prop_assert_eq!(buffer.back().read(slot), model[s as usize]);
                    prop_assert_eq!(buffer.front().read(slot), model[s as usize]);
                    prop_assert_eq!(buffer.back().is_dirty(slot), touched[s as usize]);
                }
            }
        }
    }
}
