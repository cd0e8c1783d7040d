//! The property store - fixed-size values with change tracking.
//!
//! One [`PropertyStore`] backs each side of a [`DoubleBuffer`](crate::DoubleBuffer).
//! It knows nothing about what a slot means. It only tracks:
//!
//! - the current value of every slot,
//! - a monotonic version counter per slot,
//! - a dirty bitmask (1 bit per slot, cleared once per publish cycle),
//! - a bounded ring of value transitions,
//! - a store-wide force-dirty epoch used for resynchronization.
//!
//! Writes that do not change a value's bits have no side effects at all.

use tickview_env::Tick;

use crate::error::{CoreError, CoreResult};
use crate::ids::SlotId;
use crate::value::PropertyValue;

const WORD_BITS: usize = 64;

fn words_for(slots: usize) -> usize {
    slots.div_ceil(WORD_BITS)
}

// =============================================================================
// TRANSITION LOG
// =============================================================================

/// One recorded value change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionEntry {
    pub slot: SlotId,
    pub old: PropertyValue,
    pub new: PropertyValue,
    pub tick: Tick,
}

/// Fixed-capacity ring of transitions.
///
/// When full, the oldest entry is overwritten. Loss is counted so that a
/// reader can tell the log is incomplete and fall back to the bitmask.
#[derive(Debug, Clone)]
pub struct TransitionRing {
    entries: Vec<TransitionEntry>,
    capacity: usize,
    /// Next write position once the ring is full
    head: usize,
    /// Entries lost since the last clear
    overwritten: u64,
}

impl TransitionRing {
    /// Creates an empty ring holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            head: 0,
            overwritten: 0,
        }
    }

    pub fn push(&mut self, entry: TransitionEntry) {
        if self.entries.len() < self.capacity {
            self.entries.push(entry);
            self.head = self.entries.len() % self.capacity;
        } else {
            self.entries[self.head] = entry;
            self.head = (self.head + 1) % self.capacity;
            self.overwritten += 1;
        }
    }

    /// Iterates entries oldest-first (write order).
    pub fn iter(&self) -> impl Iterator<Item = &TransitionEntry> + '_ {
        let (older, newer): (&[TransitionEntry], &[TransitionEntry]) =
            if self.entries.len() < self.capacity {
                (self.entries.as_slice(), &[][..])
            } else {
                let (newer, older) = self.entries.split_at(self.head);
                (older, newer)
            };
        older.iter().chain(newer.iter())
    }

    /// Resets the write cursor. Keeps the allocation.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.head = 0;
        self.overwritten = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries dropped by wrap-around since the last clear.
    pub fn overwritten(&self) -> u64 {
        self.overwritten
    }
}

// =============================================================================
// DIRTY ITERATION
// =============================================================================

/// Iterator over dirty slots in ascending order.
pub struct DirtySlots<'a> {
    words: &'a [u64],
    word: usize,
    current: u64,
}

impl<'a> DirtySlots<'a> {
    fn new(words: &'a [u64]) -> Self {
        Self {
            words,
            word: 0,
            current: words.first().copied().unwrap_or(0),
        }
    }
}

impl Iterator for DirtySlots<'_> {
    type Item = SlotId;

    fn next(&mut self) -> Option<SlotId> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some(SlotId((self.word * WORD_BITS + bit) as u32));
            }
            self.word += 1;
            self.current = *self.words.get(self.word)?;
        }
    }
}

// =============================================================================
// PROPERTY STORE
// =============================================================================

/// Array of property values with per-slot versions, a dirty bitmask and a
/// transition ring.
///
/// Only the writer (simulation) mutates a store; consumers get `&PropertyStore`.
#[derive(Debug, Clone)]
pub struct PropertyStore {
    values: Vec<PropertyValue>,
    versions: Vec<u64>,
    dirty: Vec<u64>,
    transitions: TransitionRing,
    /// Bumped by `mark_all_dirty`; folded into every slot's effective version
    force_epoch: u64,
    /// Tick stamped onto transitions
    tick: Tick,
}

impl PropertyStore {
    /// Creates a store with `capacity` empty slots.
    pub fn new(capacity: usize, transition_capacity: usize) -> Self {
        Self {
            values: vec![PropertyValue::Empty; capacity],
            versions: vec![0; capacity],
            dirty: vec![0; words_for(capacity)],
            transitions: TransitionRing::new(transition_capacity),
            force_epoch: 0,
            tick: Tick::ZERO,
        }
    }

    /// Number of allocated slots.
    pub fn capacity(&self) -> usize {
        self.values.len()
    }

    /// Grows the store to at least `slots` slots, preserving contents.
    ///
    /// New slots start `Empty` at version 0 and clean. Never shrinks.
    pub fn ensure_capacity(&mut self, slots: usize) {
        if slots <= self.values.len() {
            return;
        }
        self.values.resize(slots, PropertyValue::Empty);
        self.versions.resize(slots, 0);
        self.dirty.resize(words_for(slots), 0);
    }

    /// Tick recorded on transitions appended from now on.
    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn set_tick(&mut self, tick: Tick) {
        self.tick = tick;
    }

    /// Stores `value` at `slot` if it differs bitwise from the current value.
    ///
    /// Returns `Ok(true)` when the value changed: the slot's version was
    /// bumped, its dirty bit set and a transition appended. Returns
    /// `Ok(false)` with no side effects when the value is bit-identical.
    pub fn write(&mut self, slot: SlotId, value: PropertyValue) -> CoreResult<bool> {
        let index = slot.index();
        let capacity = self.values.len();
        let current = self
            .values
            .get_mut(index)
            .ok_or(CoreError::OutOfRange { slot, capacity })?;

        if *current == value {
            return Ok(false);
        }

        let old = std::mem::replace(current, value);
        self.versions[index] += 1;
        self.dirty[index / WORD_BITS] |= 1u64 << (index % WORD_BITS);
        self.transitions.push(TransitionEntry {
            slot,
            old,
            new: value,
            tick: self.tick,
        });
        Ok(true)
    }

    /// Reads a slot.
    ///
    /// # Panics
    /// If `slot` is beyond capacity. Slot ids come from the schema registry;
    /// an out-of-range read means the reader holds a stale or guessed id.
    pub fn read(&self, slot: SlotId) -> PropertyValue {
        match self.values.get(slot.index()) {
            Some(value) => *value,
            None => panic!("read of {slot} beyond store capacity {}", self.values.len()),
        }
    }

    /// Non-panicking read.
    pub fn get(&self, slot: SlotId) -> Option<PropertyValue> {
        self.values.get(slot.index()).copied()
    }

    /// Effective version of a slot: its own counter plus the force-dirty epoch.
    ///
    /// Both parts only increase, so the sum does too.
    ///
    /// # Panics
    /// If `slot` is beyond capacity.
    pub fn version(&self, slot: SlotId) -> u64 {
        match self.versions.get(slot.index()) {
            Some(v) => v + self.force_epoch,
            None => panic!("version of {slot} beyond store capacity {}", self.values.len()),
        }
    }

    /// True if the slot's effective version is newer than `last_seen`.
    pub fn changed_since(&self, slot: SlotId, last_seen: u64) -> bool {
        self.version(slot) > last_seen
    }

    pub fn is_dirty(&self, slot: SlotId) -> bool {
        let index = slot.index();
        self.dirty
            .get(index / WORD_BITS)
            .is_some_and(|word| word & (1u64 << (index % WORD_BITS)) != 0)
    }

    pub fn any_dirty(&self) -> bool {
        self.dirty.iter().any(|word| *word != 0)
    }

    /// Raw bitmask word `i` (slots `64*i .. 64*i+63`). Zero past the end.
    pub fn dirty_word(&self, i: usize) -> u64 {
        self.dirty.get(i).copied().unwrap_or(0)
    }

    pub fn dirty_word_count(&self) -> usize {
        self.dirty.len()
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Dirty slots, ascending.
    pub fn dirty_slots(&self) -> DirtySlots<'_> {
        DirtySlots::new(&self.dirty)
    }

    /// Transitions since the last `new_frame`, in write order.
    pub fn transitions(&self) -> impl Iterator<Item = &TransitionEntry> + '_ {
        self.transitions.iter()
    }

    pub fn transition_ring(&self) -> &TransitionRing {
        &self.transitions
    }

    pub fn force_epoch(&self) -> u64 {
        self.force_epoch
    }

    /// Marks every slot dirty and bumps the force-dirty epoch.
    ///
    /// Values and per-slot counters are untouched. Every reader sees every
    /// slot as changed on its next read, whether it scans the bitmask or
    /// compares versions.
    pub fn mark_all_dirty(&mut self) {
        let capacity = self.values.len();
        for (i, word) in self.dirty.iter_mut().enumerate() {
            let bits = (capacity - i * WORD_BITS).min(WORD_BITS);
            *word = if bits == WORD_BITS {
                u64::MAX
            } else {
                (1u64 << bits) - 1
            };
        }
        self.force_epoch += 1;
    }

    /// Clears the dirty bitmask and resets the transition ring.
    pub fn new_frame(&mut self) {
        self.dirty.fill(0);
        self.transitions.clear();
    }

    /// Brings this store up to `published`, then starts a new frame.
    ///
    /// `published` was written from this store's previous contents plus one
    /// tick of changes, and its dirty bits mark exactly those changes, so
    /// replaying the dirty slots is sufficient.
    pub(crate) fn catch_up(&mut self, published: &PropertyStore) {
        self.ensure_capacity(published.capacity());
        for slot in published.dirty_slots() {
            let i = slot.index();
            self.values[i] = published.values[i];
            self.versions[i] = published.versions[i];
        }
        self.force_epoch = published.force_epoch;
        self.new_frame();
    }
}
