//! The tick orchestrator.
//!
//! ```text
//!  presentation threads          simulation thread (TickBridge::step)
//!  --------------------          ------------------------------------
//!  CommandSender::submit  --->   1. drain + stamp commands
//!                                2. collect automated intent
//!                                3. arbitrate (soft override)
//!                                4. execute the single winner
//!                                5. publish domain + shared slots
//!                                   (heartbeat: mark all dirty)
//!  read published()       <---   6. flip
//! ```
//!
//! The bridge never waits on presentation. Faults that mean an invariant
//! broke (phase order, a rejected publish write) halt the bridge: it logs,
//! remembers the cause and refuses every later step.

use std::sync::Arc;

use serde::Serialize;
use tickview_env::Tick;
use tracing::{debug, error, info, trace};

use crate::arbitration::{
    ActionDomain, Arbiter, ControlSwitches, Ownership, Rejection, RejectionReason, SelectedAction,
    SourceTag,
};
use crate::buffer::DoubleBuffer;
use crate::command::{ChannelStatsSnapshot, CommandChannel, CommandSender};
use crate::config::BridgeConfig;
use crate::cycle::{TickCycle, TickPhase};
use crate::error::{CoreError, CoreResult};
use crate::ids::SlotId;
use crate::schema::SchemaSnapshot;
use crate::shared::SharedSlots;
use crate::store::PropertyStore;
use crate::value::PropertyValue;

/// Type-checked write access to the current write target.
pub struct FrameWriter<'a> {
    store: &'a mut PropertyStore,
    schema: &'a SchemaSnapshot,
    tick: Tick,
}

impl<'a> FrameWriter<'a> {
    pub fn new(store: &'a mut PropertyStore, schema: &'a SchemaSnapshot, tick: Tick) -> Self {
        Self { store, schema, tick }
    }

    /// The tick being published.
    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn schema(&self) -> &SchemaSnapshot {
        self.schema
    }

    /// Writes a registered slot. `Empty` is accepted for any slot type.
    ///
    /// Returns whether the value changed.
    pub fn write(&mut self, slot: SlotId, value: impl Into<PropertyValue>) -> CoreResult<bool> {
        let value = value.into();
        let Some(expected) = self.schema.slot_type(slot) else {
            return Err(CoreError::UnregisteredSlot(slot));
        };
        if let Some(actual) = value.value_type() {
            if actual != expected {
                let path = self.schema.slot_path(slot).unwrap_or_default().to_string();
                return Err(CoreError::TypeMismatch {
                    path,
                    expected,
                    actual,
                });
            }
        }
        self.store.write(slot, value)
    }

    pub fn write_path(&mut self, path: &str, value: impl Into<PropertyValue>) -> CoreResult<bool> {
        let slot = self
            .schema
            .slot(path)
            .ok_or_else(|| CoreError::UnknownPath(path.to_string()))?;
        self.write(slot, value)
    }
}

/// Summary of one completed tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub tick: Tick,
    /// Commands taken from the channel this tick
    pub drained: usize,
    pub selected: Option<SelectedAction>,
    pub rejections: Vec<Rejection>,
    /// True if this publication was a forced full resync
    pub heartbeat: bool,
    /// Dirty slots in the published store
    pub changed_slots: usize,
}

/// Owns the double buffer, the command channel and the per-tick protocol.
pub struct TickBridge {
    config: BridgeConfig,
    schema: Arc<SchemaSnapshot>,
    buffer: DoubleBuffer,
    channel: CommandChannel,
    arbiter: Arbiter,
    cycle: TickCycle,
    slots: SharedSlots,
    switches: ControlSwitches,
    ownership: Ownership,
    /// Latest displayed rejection and the tick it happened
    block: Option<(RejectionReason, Tick)>,
    rejected_total: u64,
    resync_requested: bool,
    halted: Option<String>,
    tick: Tick,
}

impl TickBridge {
    /// Creates a bridge over a built schema. The schema must include
    /// [`SharedSchema`](crate::SharedSchema).
    pub fn new(config: BridgeConfig, schema: Arc<SchemaSnapshot>) -> CoreResult<Self> {
        config.validate()?;
        let slots = SharedSlots::resolve(&schema)?;
        let capacity = config.slot_capacity.max(schema.slot_capacity());

        info!(
            "TickBridge: {} slots, queue {} ({}), heartbeat every {} ticks",
            capacity, config.command_capacity, config.overflow_policy, config.heartbeat_interval_ticks
        );

        Ok(Self {
            buffer: DoubleBuffer::new(capacity, config.transition_capacity),
            channel: CommandChannel::new(config.command_capacity, config.overflow_policy),
            arbiter: Arbiter::new(Arc::clone(&schema)),
            cycle: TickCycle::new(),
            slots,
            switches: ControlSwitches {
                manual_enabled: config.manual_enabled,
                automation_enabled: config.automation_enabled,
            },
            ownership: Ownership::default(),
            block: None,
            rejected_total: 0,
            resync_requested: false,
            halted: None,
            tick: Tick::ZERO,
            schema,
            config,
        })
    }

    /// A producer handle for one presentation layer.
    pub fn sender(&self) -> CommandSender {
        self.channel.sender()
    }

    /// The last completed tick.
    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn schema(&self) -> &Arc<SchemaSnapshot> {
        &self.schema
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The store presentation layers read: state as of the last tick.
    pub fn published(&self) -> &PropertyStore {
        self.buffer.back()
    }

    pub fn buffer(&self) -> &DoubleBuffer {
        &self.buffer
    }

    pub fn switches(&self) -> ControlSwitches {
        self.switches
    }

    pub fn ownership(&self) -> &Ownership {
        &self.ownership
    }

    pub fn channel_stats(&self) -> ChannelStatsSnapshot {
        self.channel.stats()
    }

    pub fn halted(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    /// Takes effect at the next arbitration. Domain cooldowns are unaffected.
    pub fn set_manual_enabled(&mut self, enabled: bool) {
        if self.switches.manual_enabled != enabled {
            info!("Manual control {}", if enabled { "enabled" } else { "disabled" });
        }
        self.switches.manual_enabled = enabled;
    }

    /// Takes effect at the next arbitration. Domain cooldowns are unaffected.
    pub fn set_automation_enabled(&mut self, enabled: bool) {
        if self.switches.automation_enabled != enabled {
            info!("Automation {}", if enabled { "enabled" } else { "disabled" });
        }
        self.switches.automation_enabled = enabled;
    }

    /// Forces a full resync on the next publication (late-joining reader).
    pub fn request_resync(&mut self) {
        self.resync_requested = true;
    }

    /// Runs one complete tick.
    ///
    /// A tick always completes once started; rejected commands are reported
    /// in the [`TickReport`], not as errors. An `Err` means the bridge has
    /// halted.
    pub fn step<D: ActionDomain + ?Sized>(&mut self, domain: &mut D) -> CoreResult<TickReport> {
        if let Some(cause) = &self.halted {
            return Err(CoreError::Halted(cause.clone()));
        }
        match self.run_tick(domain) {
            Ok(report) => Ok(report),
            Err(e) => {
                let cause = format!("tick {}: {}", self.tick.next(), e);
                error!("TickBridge halted: {}", cause);
                self.halted = Some(cause.clone());
                Err(CoreError::Halted(cause))
            }
        }
    }

    fn run_tick<D: ActionDomain + ?Sized>(&mut self, domain: &mut D) -> CoreResult<TickReport> {
        let tick = self.tick.next();
        self.cycle.begin(tick)?;
        self.buffer.begin_tick(tick);

        let mut commands = self.channel.drain(tick);
        self.cycle.advance(TickPhase::CommandsDrained)?;

        let automated = if self.switches.automation_enabled {
            domain.automated_intent(tick)
        } else {
            None
        };
        self.cycle.advance(TickPhase::IntentsCollected)?;

        let outcome = self
            .arbiter
            .arbitrate(tick, &mut commands, automated, self.switches, &*domain);
        self.cycle.advance(TickPhase::ActionSelected)?;

        if let Some(selected) = &outcome.selected {
            domain.execute(&selected.intent, tick);
            self.ownership.record(selected);
        }
        self.cycle.advance(TickPhase::ActionExecuted)?;

        self.update_block(&outcome.selected, &outcome.rejections, tick);
        self.rejected_total += outcome.rejections.len() as u64;

        let heartbeat = self.heartbeat_due(tick);
        let epoch = frame_epoch(heartbeat, self.buffer.front().force_epoch());
        {
            let mut frame = FrameWriter::new(self.buffer.front_mut(), &self.schema, tick);
            domain.publish(&mut frame)?;
            write_shared(
                &mut frame,
                &self.slots,
                SharedState {
                    tick,
                    ownership: &self.ownership,
                    block: self.block,
                    switches: self.switches,
                    dropped: self.channel.stats().dropped_oldest,
                    rejected: self.rejected_total,
                    epoch,
                },
            )?;
        }
        if heartbeat {
            self.buffer.front_mut().mark_all_dirty();
            self.resync_requested = false;
            trace!("Tick {}: heartbeat, all slots marked dirty", tick);
        }
        self.cycle.advance(TickPhase::PublicationWritten)?;

        self.buffer.flip();
        self.tick = tick;

        let changed_slots = self.buffer.back().dirty_count();
        debug!("Tick {} published ({} dirty)", tick, changed_slots);
        Ok(TickReport {
            tick,
            drained: commands.len(),
            selected: outcome.selected,
            rejections: outcome.rejections,
            heartbeat,
            changed_slots,
        })
    }

    fn heartbeat_due(&self, tick: Tick) -> bool {
        let interval = self.config.heartbeat_interval_ticks;
        self.resync_requested || (interval > 0 && tick.get() % interval == 0)
    }

    /// A manual win clears the displayed block; a real rejection replaces it.
    /// Superseded commands are not displayed.
    fn update_block(&mut self, selected: &Option<SelectedAction>, rejections: &[Rejection], tick: Tick) {
        let shown = rejections
            .iter()
            .rev()
            .find(|r| r.reason != RejectionReason::Superseded);
        if let Some(rejection) = shown {
            self.block = Some((rejection.reason, tick));
        } else if selected.is_some_and(|s| s.source == SourceTag::Manual) {
            self.block = None;
        }
    }
}

fn frame_epoch(heartbeat: bool, current: u64) -> u64 {
    if heartbeat {
        current + 1
    } else {
        current
    }
}

struct SharedState<'a> {
    tick: Tick,
    ownership: &'a Ownership,
    block: Option<(RejectionReason, Tick)>,
    switches: ControlSwitches,
    dropped: u64,
    rejected: u64,
    epoch: u64,
}

fn write_shared(frame: &mut FrameWriter<'_>, slots: &SharedSlots, state: SharedState<'_>) -> CoreResult<()> {
    let ownership = state.ownership;
    let (reason, block_tick) = match state.block {
        Some((reason, tick)) => (reason, Some(tick.get() as i64)),
        None => (RejectionReason::None, None),
    };

    frame.write(slots.tick, state.tick.get() as i64)?;
    frame.write(
        slots.last_actor,
        ownership.last_actor.map_or(0, SourceTag::code),
    )?;
    frame.write(
        slots.last_actor_since,
        ownership.last_actor.map(|_| ownership.since.get() as i64),
    )?;
    frame.write(
        slots.last_action,
        ownership.last_action.map(|a| a.0 as i64),
    )?;
    frame.write(slots.block_reason, reason.code())?;
    frame.write(slots.block_tick, block_tick)?;
    frame.write(slots.manual_enabled, state.switches.manual_enabled)?;
    frame.write(slots.automation_enabled, state.switches.automation_enabled)?;
    frame.write(slots.commands_dropped, state.dropped as i64)?;
    frame.write(slots.commands_rejected, state.rejected as i64)?;
    frame.write(slots.heartbeat_epoch, state.epoch as i64)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitration::Intent;
    use crate::command::RawCommand;
    use crate::schema::{Namespace, SchemaBuilder, TableProvider};
    use crate::shared::{self, SharedSchema};
    use crate::value::ValueType;
    use crate::ids::ActionId;

    const BUMP: ActionId = ActionId(256);
    const COUNT: SlotId = SlotId(256);

    /// Counter domain: `bump` increments, ready every other tick.
    #[derive(Default)]
    struct Counter {
        count: i64,
        auto: bool,
        publish_wrong_type: bool,
    }

    impl ActionDomain for Counter {
        fn validate(&self, _: &Intent, _: Tick) -> Result<(), RejectionReason> {
            Ok(())
        }

        fn readiness(&self, _: &Intent, tick: Tick) -> Result<(), RejectionReason> {
            if tick.get() % 2 == 0 {
                Ok(())
            } else {
                Err(RejectionReason::NotReady)
            }
        }

        fn execute(&mut self, _: &Intent, _: Tick) {
            self.count += 1;
        }

        fn automated_intent(&mut self, _: Tick) -> Option<Intent> {
            self.auto.then(|| Intent::new(BUMP))
        }

        fn publish(&self, frame: &mut FrameWriter<'_>) -> CoreResult<()> {
            if self.publish_wrong_type {
                frame.write(COUNT, "oops")?;
            } else {
                frame.write(COUNT, self.count)?;
            }
            Ok(())
        }
    }

    fn bridge(config: BridgeConfig) -> TickBridge {
        let domain = TableProvider::new(Namespace::domain("counter"))
            .slot("counter.count", 256, ValueType::Int)
            .action("counter.bump", 256);
        let schema = SchemaBuilder::new()
            .with(&SharedSchema)
            .with(&domain)
            .build()
            .unwrap();
        TickBridge::new(config, Arc::new(schema)).unwrap()
    }

    fn slot(bridge: &TickBridge, path: &str) -> PropertyValue {
        bridge.published().read(bridge.schema().slot(path).unwrap())
    }

    #[test]
    fn test_step_publishes_after_flip() {
        let mut bridge = bridge(BridgeConfig::default());
        let mut domain = Counter {
            auto: true,
            ..Default::default()
        };

        let report = bridge.step(&mut domain).unwrap();
        assert_eq!(report.tick, Tick(1));
        assert!(report.selected.is_none());
        assert_eq!(slot(&bridge, shared::TICK), PropertyValue::Int(1));

        let report = bridge.step(&mut domain).unwrap();
        assert_eq!(report.selected.unwrap().source, SourceTag::Automated);
        assert_eq!(bridge.published().read(COUNT), PropertyValue::Int(1));
        assert_eq!(
            slot(&bridge, shared::LAST_ACTOR),
            PropertyValue::Int(SourceTag::Automated.code())
        );
        assert_eq!(slot(&bridge, shared::LAST_ACTOR_SINCE), PropertyValue::Int(2));
    }

    #[test]
    fn test_rejection_is_published_not_raised() {
        let mut bridge = bridge(BridgeConfig::default());
        let mut domain = Counter::default();
        let sender = bridge.sender();

        sender.submit(RawCommand::new(BUMP));
        let report = bridge.step(&mut domain).unwrap();
        assert_eq!(report.rejections[0].reason, RejectionReason::NotReady);
        assert_eq!(
            slot(&bridge, shared::BLOCK_REASON),
            PropertyValue::Int(RejectionReason::NotReady.code())
        );
        assert_eq!(slot(&bridge, shared::BLOCK_TICK), PropertyValue::Int(1));

        sender.submit(RawCommand::new(BUMP));
        let report = bridge.step(&mut domain).unwrap();
        assert_eq!(report.selected.unwrap().source, SourceTag::Manual);
        assert_eq!(slot(&bridge, shared::BLOCK_REASON), PropertyValue::Int(0));
        assert_eq!(slot(&bridge, shared::BLOCK_TICK), PropertyValue::Empty);
        assert_eq!(slot(&bridge, shared::COMMANDS_REJECTED), PropertyValue::Int(1));
    }

    #[test]
    fn test_heartbeat_interval_and_resync() {
        let mut bridge = bridge(BridgeConfig {
            heartbeat_interval_ticks: 3,
            ..Default::default()
        });
        let mut domain = Counter::default();
        let capacity = bridge.buffer().capacity();

        let beats: Vec<bool> = (0..6).map(|_| bridge.step(&mut domain).unwrap().heartbeat).collect();
        assert_eq!(beats, vec![false, false, true, false, false, true]);
        assert_eq!(slot(&bridge, shared::HEARTBEAT_EPOCH), PropertyValue::Int(2));
        assert_eq!(bridge.published().dirty_count(), capacity);

        bridge.request_resync();
        assert!(bridge.step(&mut domain).unwrap().heartbeat);
        assert!(!bridge.step(&mut domain).unwrap().heartbeat);
    }

    #[test]
    fn test_bad_publish_halts_bridge() {
        let mut bridge = bridge(BridgeConfig::default());
        let mut domain = Counter {
            publish_wrong_type: true,
            ..Default::default()
        };

        assert!(matches!(bridge.step(&mut domain), Err(CoreError::Halted(_))));
        assert!(bridge.halted().is_some());

        domain.publish_wrong_type = false;
        assert!(matches!(bridge.step(&mut domain), Err(CoreError::Halted(_))));
        // Nothing was published
        assert_eq!(bridge.published().read(SlotId(0)), PropertyValue::Empty);
    }

    #[test]
    fn test_missing_shared_schema_is_refused() {
        let schema = SchemaBuilder::new().build().unwrap();
        assert!(matches!(
            TickBridge::new(BridgeConfig::default(), Arc::new(schema)),
            Err(CoreError::MissingSharedSchema(_))
        ));
    }

    #[test]
    fn test_frame_writer_checks_schema() {
        let mut bridge = bridge(BridgeConfig::default());
        let schema = Arc::clone(bridge.schema());
        let mut frame = FrameWriter::new(bridge.buffer.front_mut(), &schema, Tick(1));

        assert!(frame.write_path("counter.count", 5i64).unwrap());
        assert!(frame.write(COUNT, PropertyValue::Empty).unwrap());
        assert!(matches!(
            frame.write(COUNT, true),
            Err(CoreError::TypeMismatch { expected: ValueType::Int, actual: ValueType::Bool, .. })
        ));
        assert!(matches!(
            frame.write_path("counter.nope", 1i64),
            Err(CoreError::UnknownPath(_))
        ));
        assert!(matches!(
            frame.write(SlotId(300), 1i64),
            Err(CoreError::UnregisteredSlot(SlotId(300)))
        ));
    }
}
