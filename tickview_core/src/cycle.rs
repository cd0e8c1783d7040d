//! Per-tick phase machine.
//!
//! ```text
//! Idle -> CommandsDrained -> IntentsCollected -> ActionSelected
//!      -> ActionExecuted  -> PublicationWritten
//! ```
//!
//! Phases advance strictly one at a time; within a tick none is skipped or
//! revisited. A new tick can only begin from `Idle` or `PublicationWritten`
//! and must be exactly the following tick.

use serde::Serialize;
use tickview_env::Tick;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickPhase {
    Idle,
    CommandsDrained,
    IntentsCollected,
    ActionSelected,
    ActionExecuted,
    PublicationWritten,
}

impl TickPhase {
    /// The only phase allowed after this one within a tick.
    pub fn successor(self) -> Option<TickPhase> {
        match self {
            TickPhase::Idle => Some(TickPhase::CommandsDrained),
            TickPhase::CommandsDrained => Some(TickPhase::IntentsCollected),
            TickPhase::IntentsCollected => Some(TickPhase::ActionSelected),
            TickPhase::ActionSelected => Some(TickPhase::ActionExecuted),
            TickPhase::ActionExecuted => Some(TickPhase::PublicationWritten),
            TickPhase::PublicationWritten => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TickCycle {
    tick: Tick,
    phase: TickPhase,
}

impl Default for TickCycle {
    fn default() -> Self {
        Self::new()
    }
}

impl TickCycle {
    pub fn new() -> Self {
        Self {
            tick: Tick::ZERO,
            phase: TickPhase::PublicationWritten,
        }
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn phase(&self) -> TickPhase {
        self.phase
    }

    /// Enters `Idle` for `tick`.
    pub fn begin(&mut self, tick: Tick) -> CoreResult<()> {
        if tick != self.tick.next() {
            return Err(CoreError::TickRegression {
                current: self.tick,
                requested: tick,
            });
        }
        if self.phase != TickPhase::PublicationWritten {
            return Err(CoreError::PhaseOrder {
                tick: self.tick,
                from: self.phase,
                to: TickPhase::Idle,
            });
        }
        self.tick = tick;
        self.phase = TickPhase::Idle;
        Ok(())
    }

    pub fn advance(&mut self, to: TickPhase) -> CoreResult<()> {
        if self.phase.successor() != Some(to) {
            return Err(CoreError::PhaseOrder {
                tick: self.tick,
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER: [TickPhase; 5] = [
        TickPhase::CommandsDrained,
        TickPhase::IntentsCollected,
        TickPhase::ActionSelected,
        TickPhase::ActionExecuted,
        TickPhase::PublicationWritten,
    ];

    #[test]
    fn test_full_cycle() {
        let mut cycle = TickCycle::new();
        for t in 1..=3 {
            cycle.begin(Tick(t)).unwrap();
            for phase in ORDER {
                cycle.advance(phase).unwrap();
            }
        }
        assert_eq!(cycle.tick(), Tick(3));
    }

    #[test]
    fn test_skip_and_revisit_rejected() {
        let mut cycle = TickCycle::new();
        cycle.begin(Tick(1)).unwrap();
        assert!(matches!(
            cycle.advance(TickPhase::ActionSelected),
            Err(CoreError::PhaseOrder { .. })
        ));
        cycle.advance(TickPhase::CommandsDrained).unwrap();
        assert!(cycle.advance(TickPhase::CommandsDrained).is_err());
    }

    #[test]
    fn test_begin_checks_tick_and_phase() {
        let mut cycle = TickCycle::new();
        assert!(matches!(
            cycle.begin(Tick(2)),
            Err(CoreError::TickRegression { .. })
        ));
        cycle.begin(Tick(1)).unwrap();
        // Tick 1 has not finished
        assert!(matches!(cycle.begin(Tick(2)), Err(CoreError::PhaseOrder { .. })));
    }
}
