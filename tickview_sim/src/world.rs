//! SimWorld - the simulation harness container.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tickview_core::{
    ActionId, BridgeConfig, CommandSender, SchemaBuilder, SchemaSnapshot, SharedSchema, SourceTag,
    TickBridge, TickReport,
};
use tickview_env::{Tick, TickContext};
use tracing::debug;

use crate::arena::ArenaDomain;
use crate::context::SimClock;
use crate::error::SimResult;
use crate::exporter::{FrameAction, FrameRejection, SimExport, SimFrame, SlotChange};
use crate::presenter::Presenter;

/// Configuration for a simulation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Simulation ticks per (virtual) second
    pub tick_rate_hz: u32,

    /// Tick budget for open-ended runs
    pub max_ticks: u64,

    /// Enemies spawned in the arena
    pub enemies: usize,

    pub bridge: BridgeConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            tick_rate_hz: 20,
            max_ticks: 200,
            enemies: 3,
            bridge: BridgeConfig::default(),
        }
    }
}

impl SimConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> SimResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.bridge.validate()?;
        Ok(config)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz.max(1) as f64)
    }
}

/// Counters accumulated over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorldStats {
    pub ticks: u64,
    pub manual_actions: u64,
    pub automated_actions: u64,
    pub rejections: u64,
    pub heartbeats: u64,
    pub observations: u64,
}

/// Bridge, domain and presenters driven by one virtual clock.
pub struct SimWorld {
    pub config: SimConfig,
    clock: Arc<SimClock>,
    bridge: TickBridge,
    domain: ArenaDomain,
    presenters: Vec<Presenter>,
    stats: WorldStats,
    export: Option<SimExport>,
}

impl SimWorld {
    /// Builds the standard schema (shared + arena) and a bridge over it.
    pub fn new(config: SimConfig) -> SimResult<Self> {
        let clock = SimClock::shared(config.seed);
        let domain = ArenaDomain::new(clock.derive_seed(1), config.enemies);
        let schema = SchemaBuilder::new()
            .with(&SharedSchema)
            .with(&domain)
            .build()?;
        Self::with_schema(config, clock, Arc::new(schema), domain)
    }

    /// Runs on a schema the caller built (extensions, isolating builds).
    pub fn with_schema(
        config: SimConfig,
        clock: Arc<SimClock>,
        schema: Arc<SchemaSnapshot>,
        domain: ArenaDomain,
    ) -> SimResult<Self> {
        let bridge = TickBridge::new(config.bridge.clone(), schema)?;
        Ok(Self {
            config,
            clock,
            bridge,
            domain,
            presenters: Vec::new(),
            stats: WorldStats::default(),
            export: None,
        })
    }

    pub fn clock(&self) -> &Arc<SimClock> {
        &self.clock
    }

    pub fn schema(&self) -> &Arc<SchemaSnapshot> {
        self.bridge.schema()
    }

    pub fn bridge(&self) -> &TickBridge {
        &self.bridge
    }

    pub fn bridge_mut(&mut self) -> &mut TickBridge {
        &mut self.bridge
    }

    pub fn domain(&self) -> &ArenaDomain {
        &self.domain
    }

    pub fn domain_mut(&mut self) -> &mut ArenaDomain {
        &mut self.domain
    }

    pub fn sender(&self) -> CommandSender {
        self.bridge.sender()
    }

    /// Last completed tick.
    pub fn now(&self) -> Tick {
        self.bridge.tick()
    }

    pub fn stats(&self) -> WorldStats {
        self.stats
    }

    pub fn add_presenter(&mut self, presenter: Presenter) -> usize {
        self.presenters.push(presenter);
        self.presenters.len() - 1
    }

    pub fn presenter(&self, index: usize) -> &Presenter {
        &self.presenters[index]
    }

    pub fn presenter_mut(&mut self, index: usize) -> &mut Presenter {
        &mut self.presenters[index]
    }

    pub fn presenters(&self) -> &[Presenter] {
        &self.presenters
    }

    /// Starts recording frames.
    pub fn enable_export(&mut self, scenario: &str) {
        self.export = Some(SimExport::new(scenario, self.config.seed));
    }

    pub fn take_export(&mut self) -> Option<SimExport> {
        self.export.take()
    }

    /// Presenter submissions for the next tick, then one bridge step.
    pub fn step(&mut self) -> SimResult<TickReport> {
        let next = self.bridge.tick().next();
        for presenter in &mut self.presenters {
            presenter.submit_for(next);
        }

        let report = self.bridge.step(&mut self.domain)?;

        self.stats.ticks += 1;
        self.stats.rejections += report.rejections.len() as u64;
        if report.heartbeat {
            self.stats.heartbeats += 1;
        }
        match report.selected.map(|s| s.source) {
            Some(SourceTag::Manual) => self.stats.manual_actions += 1,
            Some(SourceTag::Automated) => self.stats.automated_actions += 1,
            None => {}
        }

        if self.export.is_some() {
            let frame = self.frame(&report);
            if let Some(export) = &mut self.export {
                export.add_frame(frame);
            }
        }
        Ok(report)
    }

    /// Lets every presenter whose cadence is due read the published store.
    pub fn observe_due(&mut self) {
        let tick = self.bridge.tick();
        let store = self.bridge.published();
        for presenter in self.presenters.iter_mut().filter(|p| p.cadence().is_due(tick)) {
            presenter.observe(store);
            self.stats.observations += 1;
        }
    }

    /// Lets every presenter read, regardless of cadence.
    pub fn observe_all(&mut self) {
        let store = self.bridge.published();
        for presenter in &mut self.presenters {
            presenter.observe(store);
            self.stats.observations += 1;
        }
    }

    /// One full simulated tick: submit, step, observe, advance the clock.
    pub fn tick(&mut self) -> SimResult<TickReport> {
        let report = self.step()?;
        self.observe_due();
        self.clock.advance_time(self.config.tick_duration());
        Ok(report)
    }

    pub fn run(&mut self, ticks: u64) -> SimResult<Vec<TickReport>> {
        (0..ticks).map(|_| self.tick()).collect()
    }

    fn frame(&self, report: &TickReport) -> SimFrame {
        let schema = self.bridge.schema();
        let store = self.bridge.published();
        let action_name = |id: ActionId| {
            schema
                .action_path(id)
                .map_or_else(|| id.to_string(), str::to_string)
        };

        let changes = store
            .dirty_slots()
            .map(|slot| SlotChange {
                path: schema
                    .slot_path(slot)
                    .map_or_else(|| slot.to_string(), str::to_string),
                value: store.read(slot).to_string(),
            })
            .collect();

        let frame = SimFrame {
            tick: report.tick.get(),
            time_sec: (self.clock.now() + self.config.tick_duration()).as_secs_f64(),
            heartbeat: report.heartbeat,
            selected: report.selected.map(|s| FrameAction {
                action: action_name(s.intent.action),
                source: s.source.to_string(),
                target: s.intent.target.map(|t| t.to_string()),
            }),
            rejections: report
                .rejections
                .iter()
                .map(|r| FrameRejection {
                    sequence: r.sequence,
                    action: action_name(r.action),
                    reason: r.reason.to_string(),
                })
                .collect(),
            changes,
        };
        debug!("Recorded frame {}", frame.tick);
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{self, HERO_ATTACKS};
    use tickview_core::PropertyValue;

    #[test]
    fn test_world_runs_automation() {
        let mut world = SimWorld::new(SimConfig::default()).unwrap();
        world.run(25).unwrap();

        // Attacks at ticks 1, 11, 21
        assert_eq!(world.stats().automated_actions, 3);
        assert_eq!(world.bridge().published().read(HERO_ATTACKS), PropertyValue::Int(3));
        assert_eq!(world.now(), Tick(25));
        assert_eq!(world.clock().now(), world.config.tick_duration() * 25);
    }

    #[test]
    fn test_export_records_every_tick() {
        let mut world = SimWorld::new(SimConfig::default()).unwrap();
        world.enable_export("test");
        world.run(3).unwrap();
        let export = world.take_export().unwrap();
        assert_eq!(export.frames.len(), 3);
        assert_eq!(export.frames[0].selected.as_ref().unwrap().action, "arena.attack");
        assert!(export.frames[0]
            .changes
            .iter()
            .any(|c| c.path == "shared.tick" && c.value == "1"));
    }

    #[test]
    fn test_same_seed_same_world() {
        let run = || {
            let mut world = SimWorld::new(SimConfig { seed: 9, ..Default::default() }).unwrap();
            world.run(40).unwrap();
            world.domain().enemies().to_vec()
        };
        assert_eq!(run(), run());
        assert_eq!(
            SimWorld::new(SimConfig::default()).unwrap().domain().enemies().len(),
            3.min(arena::MAX_ENEMIES)
        );
    }
}
