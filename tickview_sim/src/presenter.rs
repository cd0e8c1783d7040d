//! Simulated presentation layers.
//!
//! A [`Presenter`] binds to the bridge through a capability contract, wakes
//! up on its own cadence, mirrors whatever it sees change in the published
//! store and optionally submits scripted manual commands.

use std::collections::BTreeMap;

use tickview_core::{
    CapabilityContract, CapabilityReport, CommandSender, FeatureState, PropertyStore,
    PropertyValue, RawCommand, SchemaSnapshot, SlotId, SubmitStatus, VersionCursor,
};
use tickview_env::{EntityRef, Tick};
use tracing::{debug, info};

/// When a presenter wakes up: ticks where `tick % every == phase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub every: u64,
    pub phase: u64,
}

impl Cadence {
    pub const EVERY_TICK: Cadence = Cadence { every: 1, phase: 0 };

    pub fn new(every: u64, phase: u64) -> Self {
        let every = every.max(1);
        Self {
            every,
            phase: phase % every,
        }
    }

    pub fn is_due(&self, tick: Tick) -> bool {
        tick.get() % self.every == self.phase
    }
}

/// How a presenter discovers changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Dirty bitmask of the frame it happens to see. Misses skipped frames.
    Bitmask,
    /// Per-slot versions against its own cursor. Never misses a change.
    Versions,
}

/// A manual command submitted before a given tick runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptedCommand {
    pub tick: Tick,
    pub command: RawCommand,
}

/// What one observation found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    pub tick: Tick,
    pub changed: Vec<SlotId>,
}

pub struct Presenter {
    name: String,
    report: CapabilityReport,
    state: FeatureState,
    cadence: Cadence,
    scan: ScanMode,
    cursor: VersionCursor,
    mirror: BTreeMap<SlotId, PropertyValue>,
    sender: Option<CommandSender>,
    script: Vec<ScriptedCommand>,
    observations: u64,
    submitted: u64,
    last_seen: Option<Tick>,
}

impl Presenter {
    /// Validates `contract` and applies the degrade policy.
    pub fn bind(
        name: impl Into<String>,
        contract: &CapabilityContract,
        schema: &SchemaSnapshot,
        cadence: Cadence,
        scan: ScanMode,
    ) -> Self {
        let name = name.into();
        let report = contract.validate(schema);
        let state = report.log();
        info!("Presenter '{}' bound: {:?}", name, state);
        Self {
            name,
            report,
            state,
            cadence,
            scan,
            cursor: VersionCursor::new(),
            mirror: BTreeMap::new(),
            sender: None,
            script: Vec::new(),
            observations: 0,
            submitted: 0,
            last_seen: None,
        }
    }

    pub fn with_sender(mut self, sender: CommandSender) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_script(mut self, script: Vec<ScriptedCommand>) -> Self {
        self.script = script;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> FeatureState {
        self.state
    }

    pub fn report(&self) -> &CapabilityReport {
        &self.report
    }

    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    pub fn observations(&self) -> u64 {
        self.observations
    }

    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    pub fn last_seen(&self) -> Option<Tick> {
        self.last_seen
    }

    /// Sends the scripted commands meant for `tick`. Disabled presenters
    /// send nothing.
    pub fn submit_for(&mut self, tick: Tick) -> Vec<SubmitStatus> {
        let Some(sender) = &self.sender else {
            return Vec::new();
        };
        if self.state == FeatureState::Disabled {
            return Vec::new();
        }
        let statuses: Vec<SubmitStatus> = self
            .script
            .iter()
            .filter(|s| s.tick == tick)
            .map(|s| sender.submit(s.command))
            .collect();
        self.submitted += statuses.len() as u64;
        statuses
    }

    /// Reads the published store and updates the mirror.
    pub fn observe(&mut self, store: &PropertyStore) -> Observation {
        let changed: Vec<SlotId> = match self.scan {
            ScanMode::Bitmask => store.dirty_slots().collect(),
            ScanMode::Versions => self.cursor.poll(store),
        };
        for slot in &changed {
            self.mirror.insert(*slot, store.read(*slot));
        }
        self.observations += 1;
        self.last_seen = Some(store.tick());
        debug!(
            "Presenter '{}' saw {} change(s) at {}",
            self.name,
            changed.len(),
            store.tick()
        );
        Observation {
            tick: store.tick(),
            changed,
        }
    }

    /// Mirrored value; `Empty` if never seen.
    pub fn value(&self, slot: SlotId) -> PropertyValue {
        self.mirror.get(&slot).copied().unwrap_or_default()
    }

    /// Mirrored value of a contract slot, by path.
    pub fn value_of(&self, path: &str) -> Option<PropertyValue> {
        self.report.resolved_slot(path).map(|slot| self.value(slot))
    }

    pub fn entity(&self, slot: SlotId) -> Option<EntityRef> {
        self.value(slot).as_entity()
    }

    /// Renders an enum-coded slot through `schema`; unknown codes fall back
    /// to `<namespace>#<code>`.
    pub fn decode_enum(&self, schema: &SchemaSnapshot, namespace: &str, slot: SlotId) -> String {
        match self.value(slot).as_int() {
            Some(code) => schema.enum_label(namespace, code).to_string(),
            None => "-".to_string(),
        }
    }

    /// Slots whose mirrored value differs from `store`.
    pub fn divergence(&self, store: &PropertyStore) -> Vec<SlotId> {
        (0..store.capacity() as u32)
            .map(SlotId)
            .filter(|slot| self.value(*slot) != store.read(*slot))
            .collect()
    }

    /// Drops the mirror and cursor, as a freshly joined reader would have.
    pub fn forget(&mut self) {
        self.mirror.clear();
        self.cursor.reset();
        self.last_seen = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickview_core::{Namespace, SchemaBuilder, TableProvider, ValueType};

    fn schema() -> SchemaSnapshot {
        let p = TableProvider::new(Namespace::domain("ui"))
            .slot("ui.mode", 256, ValueType::Int)
            .enum_code("ui.mode_enum", 0, "calm");
        SchemaBuilder::new().with(&p).build().unwrap()
    }

    #[test]
    fn test_cadence() {
        let c = Cadence::new(3, 1);
        let due: Vec<u64> = (0..8).filter(|t| c.is_due(Tick(*t))).collect();
        assert_eq!(due, vec![1, 4, 7]);
        assert!(Cadence::new(0, 5).is_due(Tick(9)));
    }

    #[test]
    fn test_bitmask_reader_misses_skipped_frames() {
        let schema = schema();
        let contract = CapabilityContract::new("ui").require_slot("ui.mode", ValueType::Int);
        let mut bitmask = Presenter::bind("b", &contract, &schema, Cadence::EVERY_TICK, ScanMode::Bitmask);
        let mut versions = Presenter::bind("v", &contract, &schema, Cadence::EVERY_TICK, ScanMode::Versions);

        let mut store = PropertyStore::new(257, 8);
        store.write(SlotId(256), PropertyValue::Int(0)).unwrap();
        store.new_frame(); // frame nobody saw

        assert!(bitmask.observe(&store).changed.is_empty());
        assert_eq!(versions.observe(&store).changed, vec![SlotId(256)]);
        assert_eq!(bitmask.divergence(&store), vec![SlotId(256)]);
        assert!(versions.divergence(&store).is_empty());
    }

    #[test]
    fn test_enum_decode_falls_back() {
        let schema = schema();
        let contract = CapabilityContract::new("ui").require_slot("ui.mode", ValueType::Int);
        let mut p = Presenter::bind("p", &contract, &schema, Cadence::EVERY_TICK, ScanMode::Versions);

        let mut store = PropertyStore::new(257, 8);
        store.write(SlotId(256), PropertyValue::Int(7)).unwrap();
        p.observe(&store);
        assert_eq!(p.decode_enum(&schema, "ui.mode_enum", SlotId(256)), "ui.mode_enum#7");
        assert_eq!(p.decode_enum(&schema, "ui.mode_enum", SlotId(3)), "-");
    }
}
