//! Common types for the TickView environment abstraction.

use serde::{Deserialize, Serialize};

/// A discrete simulation step.
///
/// Ticks only move forward. Tick 0 is the state before the first step, so
/// the first executed tick is `Tick(1)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tick(pub u64);

impl Tick {
    /// The tick before any simulation step has run.
    pub const ZERO: Tick = Tick(0);

    /// Returns the following tick.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw tick number.
    pub fn get(self) -> u64 {
        self.0
    }

    /// Number of ticks elapsed since `earlier` (0 if `earlier` is in the future).
    pub fn since(self, earlier: Tick) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Returns the tick `n` steps after this one.
    pub fn after(self, n: u64) -> Self {
        Self(self.0.saturating_add(n))
    }
}

impl std::fmt::Display for Tick {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Opaque reference to a simulation entity.
///
/// The core never interprets it; only the domain knows what it points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef(pub u64);

impl EntityRef {
    /// Creates a deterministic reference from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        // splitmix-style finalizer so neighbouring seeds spread out
        let mut z = seed.wrapping_add(0x9e3779b97f4a7c15);
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
        Self(z ^ (z >> 31))
    }

    /// Returns the raw reference value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show low 32 bits for readability
        write!(f, "e{:08x}", self.0 as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_ordering() {
        let t = Tick::ZERO.next().next();
        assert_eq!(t, Tick(2));
        assert!(Tick(3) > t);
        assert_eq!(Tick(15).since(Tick(10)), 5);
        assert_eq!(Tick(10).since(Tick(15)), 0);
        assert_eq!(Tick(10).after(10), Tick(20));
        assert_eq!(t.to_string(), "t2");
    }

    #[test]
    fn test_entity_ref_from_seed_is_deterministic() {
        assert_eq!(EntityRef::from_seed(7), EntityRef::from_seed(7));
        assert_ne!(EntityRef::from_seed(7), EntityRef::from_seed(8));
    }
}
