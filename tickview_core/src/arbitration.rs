//! Soft-override arbitration between manual and automated control.
//!
//! Each tick exactly one of three outcomes holds:
//!
//! 1. a manual intent that is valid and ready wins;
//! 2. otherwise an automated intent (when automation is enabled) that is
//!    valid and ready wins;
//! 3. otherwise nothing is selected.
//!
//! Both sources produce the same [`Intent`] shape and the winner goes
//! through the single [`ActionDomain::execute`] path, which never sees where
//! it came from. The [`SourceTag`] on a [`SelectedAction`] is for tracing and
//! ownership display only.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tickview_env::{EntityRef, Tick};
use tracing::debug;

use crate::bridge::FrameWriter;
use crate::command::StampedCommand;
use crate::error::CoreResult;
use crate::ids::ActionId;
use crate::schema::SchemaSnapshot;
use crate::value::PropertyValue;

/// Origin of an intent. Inert: execution never receives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    Manual,
    Automated,
}

impl SourceTag {
    /// Published code; 0 means "nobody".
    pub fn code(self) -> i64 {
        match self {
            SourceTag::Manual => 1,
            SourceTag::Automated => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(SourceTag::Manual),
            2 => Some(SourceTag::Automated),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SourceTag::Manual => "manual",
            SourceTag::Automated => "automated",
        }
    }
}

impl std::fmt::Display for SourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A request to perform one action, from either source.
///
/// Multi-target actions are expressed as one intent per target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Intent {
    pub action: ActionId,
    pub target: Option<EntityRef>,
    pub payload: PropertyValue,
}

impl Intent {
    pub fn new(action: ActionId) -> Self {
        Self {
            action,
            target: None,
            payload: PropertyValue::Empty,
        }
    }

    pub fn with_target(mut self, target: EntityRef) -> Self {
        self.target = Some(target);
        self
    }
}

/// Typed reason a command did not execute, published for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    None,
    /// Readiness failed because of an active cooldown
    Cooldown,
    InvalidTarget,
    UnknownAction,
    ManualDisabled,
    /// An earlier command in the same tick already won
    Superseded,
    /// Readiness failed for another domain reason
    NotReady,
}

impl RejectionReason {
    pub const ALL: [RejectionReason; 7] = [
        RejectionReason::None,
        RejectionReason::Cooldown,
        RejectionReason::InvalidTarget,
        RejectionReason::UnknownAction,
        RejectionReason::ManualDisabled,
        RejectionReason::Superseded,
        RejectionReason::NotReady,
    ];

    pub fn code(self) -> i64 {
        match self {
            RejectionReason::None => 0,
            RejectionReason::Cooldown => 1,
            RejectionReason::InvalidTarget => 2,
            RejectionReason::UnknownAction => 3,
            RejectionReason::ManualDisabled => 4,
            RejectionReason::Superseded => 5,
            RejectionReason::NotReady => 6,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.code() == code)
    }

    pub fn label(self) -> &'static str {
        match self {
            RejectionReason::None => "none",
            RejectionReason::Cooldown => "cooldown",
            RejectionReason::InvalidTarget => "invalid_target",
            RejectionReason::UnknownAction => "unknown_action",
            RejectionReason::ManualDisabled => "manual_disabled",
            RejectionReason::Superseded => "superseded",
            RejectionReason::NotReady => "not_ready",
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A manual command that did not win this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub tick: Tick,
    pub sequence: u64,
    pub action: ActionId,
    pub reason: RejectionReason,
}

/// The single winner of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SelectedAction {
    pub tick: Tick,
    pub intent: Intent,
    /// Trace tag only
    pub source: SourceTag,
    /// Stamp of the winning command; `None` for automated intents
    pub sequence: Option<u64>,
}

/// The simulation's side of the execution boundary.
///
/// The core never interprets what an action means; it asks the domain
/// whether an intent is valid and ready, and hands the winner over for
/// execution.
pub trait ActionDomain {
    /// Structural checks: known action, live target. Independent of timing.
    fn validate(&self, intent: &Intent, tick: Tick) -> Result<(), RejectionReason>;

    /// Timing checks such as cooldowns.
    fn readiness(&self, intent: &Intent, tick: Tick) -> Result<(), RejectionReason>;

    /// Applies the intent's mutations. Must complete within the tick.
    fn execute(&mut self, intent: &Intent, tick: Tick);

    /// The automated controller's proposal for this tick.
    fn automated_intent(&mut self, _tick: Tick) -> Option<Intent> {
        None
    }

    /// Writes the domain's published slots for this tick.
    fn publish(&self, frame: &mut FrameWriter<'_>) -> CoreResult<()>;
}

/// Which sources are allowed to act.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlSwitches {
    pub manual_enabled: bool,
    pub automation_enabled: bool,
}

impl Default for ControlSwitches {
    fn default() -> Self {
        Self {
            manual_enabled: true,
            automation_enabled: true,
        }
    }
}

/// "Who acted last, and since when." Presentation metadata, never a gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Ownership {
    pub last_actor: Option<SourceTag>,
    /// Tick at which `last_actor` took over
    pub since: Tick,
    pub last_action: Option<ActionId>,
    pub acted_at: Tick,
}

impl Ownership {
    pub fn record(&mut self, selected: &SelectedAction) {
        if self.last_actor != Some(selected.source) {
            self.last_actor = Some(selected.source);
            self.since = selected.tick;
        }
        self.last_action = Some(selected.intent.action);
        self.acted_at = selected.tick;
    }

    /// Ticks the current actor has held ownership as of `now`.
    pub fn held_for(&self, now: Tick) -> u64 {
        match self.last_actor {
            Some(_) => now.since(self.since),
            None => 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArbitrationOutcome {
    pub selected: Option<SelectedAction>,
    pub rejections: Vec<Rejection>,
}

/// Applies the soft-override rule.
#[derive(Debug, Clone)]
pub struct Arbiter {
    schema: Arc<SchemaSnapshot>,
}

impl Arbiter {
    pub fn new(schema: Arc<SchemaSnapshot>) -> Self {
        Self { schema }
    }

    fn check<D: ActionDomain + ?Sized>(
        &self,
        domain: &D,
        intent: &Intent,
        tick: Tick,
    ) -> Result<(), RejectionReason> {
        if self.schema.action_path(intent.action).is_none() {
            return Err(RejectionReason::UnknownAction);
        }
        domain.validate(intent, tick)?;
        domain.readiness(intent, tick)
    }

    /// Picks at most one winner for `tick`.
    ///
    /// `commands` are processed in `(tick, sequence)` order. The first manual
    /// command that passes validation and readiness wins and every later one
    /// is superseded.
    pub fn arbitrate<D: ActionDomain + ?Sized>(
        &self,
        tick: Tick,
        commands: &mut [StampedCommand],
        automated: Option<Intent>,
        switches: ControlSwitches,
        domain: &D,
    ) -> ArbitrationOutcome {
        commands.sort_by_key(|c| (c.tick, c.sequence));

        let mut outcome = ArbitrationOutcome::default();
        for command in commands.iter() {
            let reason = if !switches.manual_enabled {
                Some(RejectionReason::ManualDisabled)
            } else if outcome.selected.is_some() {
                Some(RejectionReason::Superseded)
            } else {
                self.check(domain, &command.intent(), tick).err()
            };

            match reason {
                Some(reason) => {
                    debug!(
                        "Tick {}: command #{} ({}) rejected: {}",
                        tick, command.sequence, command.action, reason
                    );
                    outcome.rejections.push(Rejection {
                        tick,
                        sequence: command.sequence,
                        action: command.action,
                        reason,
                    });
                }
                None => {
                    outcome.selected = Some(SelectedAction {
                        tick,
                        intent: command.intent(),
                        source: SourceTag::Manual,
                        sequence: Some(command.sequence),
                    });
                }
            }
        }

        if outcome.selected.is_none() && switches.automation_enabled {
            if let Some(intent) = automated {
                match self.check(domain, &intent, tick) {
                    Ok(()) => {
                        outcome.selected = Some(SelectedAction {
                            tick,
                            intent,
                            source: SourceTag::Automated,
                            sequence: None,
                        });
                    }
                    Err(reason) => {
                        debug!("Tick {}: automated {} not taken: {}", tick, intent.action, reason);
                    }
                }
            }
        }

        match &outcome.selected {
            Some(s) => debug!("Tick {}: {} {} selected", tick, s.source, s.intent.action),
            None => debug!("Tick {}: no winner", tick),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Namespace, SchemaBuilder, TableProvider};
    use proptest::prelude::*;

    const ATTACK: ActionId = ActionId(256);
    const UNREGISTERED: ActionId = ActionId(999);

    /// Test domain with fixed verdicts.
    struct Fixed {
        valid: bool,
        ready: bool,
    }

    impl ActionDomain for Fixed {
        fn validate(&self, _: &Intent, _: Tick) -> Result<(), RejectionReason> {
            if self.valid {
                Ok(())
            } else {
                Err(RejectionReason::InvalidTarget)
            }
        }

        fn readiness(&self, _: &Intent, _: Tick) -> Result<(), RejectionReason> {
            if self.ready {
                Ok(())
            } else {
                Err(RejectionReason::Cooldown)
            }
        }

        fn execute(&mut self, _: &Intent, _: Tick) {}

        fn publish(&self, _: &mut FrameWriter<'_>) -> CoreResult<()> {
            Ok(())
        }
    }

    fn arbiter() -> Arbiter {
        let p = TableProvider::new(Namespace::domain("arena")).action("arena.attack", 256);
        Arbiter::new(Arc::new(SchemaBuilder::new().with(&p).build().unwrap()))
    }

    fn stamped(sequence: u64, action: ActionId) -> StampedCommand {
        StampedCommand {
            tick: Tick(1),
            sequence,
            origin: 0,
            action,
            target: None,
            payload: PropertyValue::Empty,
        }
    }

    #[test]
    fn test_manual_wins_over_automated() {
        let domain = Fixed { valid: true, ready: true };
        let mut cmds = [stamped(0, ATTACK)];
        let out = arbiter().arbitrate(
            Tick(1),
            &mut cmds,
            Some(Intent::new(ATTACK)),
            ControlSwitches::default(),
            &domain,
        );
        let selected = out.selected.unwrap();
        assert_eq!(selected.source, SourceTag::Manual);
        assert_eq!(selected.sequence, Some(0));
    }

    #[test]
    fn test_later_commands_are_superseded() {
        let domain = Fixed { valid: true, ready: true };
        let mut cmds = [stamped(4, ATTACK), stamped(2, ATTACK), stamped(3, UNREGISTERED)];
        let out = arbiter().arbitrate(Tick(1), &mut cmds, None, ControlSwitches::default(), &domain);

        assert_eq!(out.selected.unwrap().sequence, Some(2));
        let reasons: Vec<_> = out.rejections.iter().map(|r| (r.sequence, r.reason)).collect();
        assert_eq!(
            reasons,
            vec![(3, RejectionReason::Superseded), (4, RejectionReason::Superseded)]
        );
    }

    #[test]
    fn test_unknown_action_rejected_before_domain() {
        let domain = Fixed { valid: true, ready: true };
        let mut cmds = [stamped(0, UNREGISTERED)];
        let out = arbiter().arbitrate(Tick(1), &mut cmds, None, ControlSwitches::default(), &domain);
        assert!(out.selected.is_none());
        assert_eq!(out.rejections[0].reason, RejectionReason::UnknownAction);
    }

    #[test]
    fn test_manual_disabled() {
        let domain = Fixed { valid: true, ready: true };
        let switches = ControlSwitches {
            manual_enabled: false,
            automation_enabled: true,
        };
        let mut cmds = [stamped(0, ATTACK)];
        let out = arbiter().arbitrate(Tick(1), &mut cmds, Some(Intent::new(ATTACK)), switches, &domain);
        assert_eq!(out.rejections[0].reason, RejectionReason::ManualDisabled);
        assert_eq!(out.selected.unwrap().source, SourceTag::Automated);
    }

    #[test]
    fn test_ownership_tracks_takeover_tick() {
        let mut ownership = Ownership::default();
        let mut sel = SelectedAction {
            tick: Tick(10),
            intent: Intent::new(ATTACK),
            source: SourceTag::Automated,
            sequence: None,
        };
        ownership.record(&sel);
        sel.tick = Tick(12);
        ownership.record(&sel);
        assert_eq!(ownership.since, Tick(10));
        assert_eq!(ownership.acted_at, Tick(12));

        sel.tick = Tick(20);
        sel.source = SourceTag::Manual;
        ownership.record(&sel);
        assert_eq!(ownership.last_actor, Some(SourceTag::Manual));
        assert_eq!(ownership.since, Tick(20));
        assert_eq!(ownership.held_for(Tick(25)), 5);
    }

    #[test]
    fn test_reason_codes_round_trip() {
        for reason in RejectionReason::ALL {
            assert_eq!(RejectionReason::from_code(reason.code()), Some(reason));
        }
        assert_eq!(RejectionReason::from_code(42), None);
        assert_eq!(SourceTag::from_code(0), None);
    }

    proptest! {
        #[test]
        fn prop_arbitration_priority(
            has_manual in any::<bool>(),
            valid in any::<bool>(),
            ready in any::<bool>(),
            has_auto in any::<bool>(),
            automation_enabled in any::<bool>(),
        ) {
            let domain = Fixed { valid, ready };
            let switches = ControlSwitches { manual_enabled: true, automation_enabled };
            let mut cmds: Vec<StampedCommand> =
                if has_manual { vec![stamped(0, ATTACK)] } else { Vec::new() };
            let auto = has_auto.then(|| Intent::new(ATTACK));

            let out = arbiter().arbitrate(Tick(1), &mut cmds, auto, switches, &domain);
            let acceptable = valid && ready;
            let expected = if has_manual && acceptable {
                Some(SourceTag::Manual)
            } else if has_auto && automation_enabled && acceptable {
                Some(SourceTag::Automated)
            } else {
                None
            };
            prop_assert_eq!(out.selected.map(|s| s.source), expected);
        }
    }
}
