//! Scenario runner - drives the named scenarios and checks their outcomes.

use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use thiserror::Error;
use tickview_core::shared::{self, SharedSchema};
use tickview_core::{
    ActionDomain, ActionId, CapabilityContract, CoreError, FeatureState, FrameWriter, Namespace,
    OverflowPolicy, PropertyStore, PropertyValue, RawCommand, RejectionReason, SchemaBuilder,
    SchemaKind, SchemaSnapshot, SlotId, SourceTag, SubmitStatus, TableProvider, TickReport,
    ValueType,
};
use tickview_env::{EntityRef, Tick, TickContext};
use tracing::{debug, info, warn};

use crate::arena::{self, hud_contract, ArenaDomain, ATTACK, GUARD, HERO_COOLDOWN, HERO_STANCE};
use crate::context::SimClock;
use crate::error::SimError;
use crate::exporter::SimExport;
use crate::presenter::{Cadence, Presenter, ScanMode, ScriptedCommand};
use crate::scenarios::ScenarioId;
use crate::world::{SimConfig, SimWorld};

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    #[serde(serialize_with = "serialize_scenario")]
    pub scenario: ScenarioId,

    pub seed: u64,

    /// Whether every check held
    pub passed: bool,

    /// Ticks executed across all worlds of the scenario
    pub total_ticks: u64,

    /// Virtual time of the primary world at the end
    pub final_time_secs: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    pub metrics: ScenarioMetrics,
}

fn serialize_scenario<S: serde::Serializer>(id: &ScenarioId, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(id.name())
}

/// Counters collected during a scenario.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScenarioMetrics {
    pub ticks: u64,
    pub manual_actions: u64,
    pub automated_actions: u64,
    pub rejections: u64,
    pub commands_dropped: u64,
    pub commands_rejected: u64,
    pub heartbeats: u64,
    pub observations: u64,
    /// Registry violations reported while building schemas
    pub schema_errors: u64,
}

/// Why a scenario did not pass.
#[derive(Debug, Error)]
enum Failure {
    #[error("{0}")]
    Check(String),

    #[error(transparent)]
    Sim(#[from] SimError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

macro_rules! check {
    ($cond:expr, $($msg:tt)+) => {
        if !$cond {
            return Err(Failure::Check(format!($($msg)+)));
        }
    };
}

/// Bookkeeping shared by every scenario: merged metrics and the export of
/// the first world created.
struct Session {
    scenario: ScenarioId,
    want_export: bool,
    primary_claimed: bool,
    metrics: ScenarioMetrics,
    final_time_secs: f64,
    export: Option<SimExport>,
}

impl Session {
    fn new(scenario: ScenarioId, want_export: bool) -> Self {
        Self {
            scenario,
            want_export,
            primary_claimed: false,
            metrics: ScenarioMetrics::default(),
            final_time_secs: 0.0,
            export: None,
        }
    }

    /// Registers a world; the first one becomes the exported primary.
    fn track(&mut self, world: &mut SimWorld) {
        if !self.primary_claimed {
            self.primary_claimed = true;
            if self.want_export {
                world.enable_export(self.scenario.name());
            }
        }
    }

    /// Folds a finished world's counters into the scenario metrics.
    fn absorb(&mut self, world: &mut SimWorld) {
        let stats = world.stats();
        let channel = world.bridge().channel_stats();
        self.metrics.ticks += stats.ticks;
        self.metrics.manual_actions += stats.manual_actions;
        self.metrics.automated_actions += stats.automated_actions;
        self.metrics.rejections += stats.rejections;
        self.metrics.heartbeats += stats.heartbeats;
        self.metrics.observations += stats.observations;
        self.metrics.commands_dropped += channel.dropped_oldest;
        self.metrics.commands_rejected += channel.rejected_newest;
        if let Some(export) = world.take_export() {
            self.final_time_secs = world.clock().now().as_secs_f64();
            self.export = Some(export);
        } else if self.export.is_none() {
            self.final_time_secs = self.final_time_secs.max(world.clock().now().as_secs_f64());
        }
    }
}

/// Runs scenarios against fresh worlds.
pub struct ScenarioRunner {
    seed: u64,

    /// Overrides the length of open-ended scenarios
    ticks: Option<u64>,

    /// Base for every world's configuration
    config: SimConfig,
}

impl ScenarioRunner {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            ticks: None,
            config: SimConfig::default(),
        }
    }

    /// Sets the length of open-ended scenarios.
    pub fn with_ticks(mut self, ticks: u64) -> Self {
        self.ticks = Some(ticks);
        self
    }

    /// Uses `config` as the base world configuration. Its seed is replaced
    /// by the runner's.
    pub fn with_config(mut self, config: SimConfig) -> Self {
        self.config = config;
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.execute(scenario, false).0
    }

    /// Runs a scenario and records the primary world's frames.
    pub fn run_exported(&self, scenario: ScenarioId) -> (ScenarioResult, SimExport) {
        let (result, export) = self.execute(scenario, true);
        let mut export = export.unwrap_or_else(|| SimExport::new(scenario.name(), self.seed));
        export.finalize(result.passed, result.failure_reason.clone());
        (result, export)
    }

    fn execute(&self, scenario: ScenarioId, want_export: bool) -> (ScenarioResult, Option<SimExport>) {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        if want_export && scenario.is_registry_only() {
            warn!("{} builds no world; the export will have no frames", scenario);
        }

        let mut session = Session::new(scenario, want_export);
        let outcome = match scenario {
            ScenarioId::CooldownOverride => self.run_cooldown_override(&mut session),
            ScenarioId::IdCollision => self.run_id_collision(&mut session),
            ScenarioId::MissingCapability => self.run_missing_capability(&mut session),
            ScenarioId::HeartbeatResync => self.run_heartbeat_resync(&mut session),
            ScenarioId::FlipAtomicity => self.run_flip_atomicity(&mut session),
            ScenarioId::CommandOrdering => self.run_command_ordering(&mut session),
            ScenarioId::QueueOverflow => self.run_queue_overflow(&mut session),
            ScenarioId::EnumFallback => self.run_enum_fallback(&mut session),
            ScenarioId::IsolatedBuild => self.run_isolated_build(&mut session),
        };

        let failure_reason = outcome.err().map(|f| f.to_string());
        let passed = failure_reason.is_none();
        match &failure_reason {
            None => info!("Scenario {} passed ({} ticks)", scenario, session.metrics.ticks),
            Some(reason) => warn!("Scenario {} failed: {}", scenario, reason),
        }

        let result = ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            total_ticks: session.metrics.ticks,
            final_time_secs: session.final_time_secs,
            failure_reason,
            metrics: session.metrics,
        };
        (result, session.export)
    }

    fn sim_config(&self) -> SimConfig {
        SimConfig {
            seed: self.seed,
            ..self.config.clone()
        }
    }

    fn world(&self, session: &mut Session, config: SimConfig) -> Result<SimWorld, Failure> {
        let mut world = SimWorld::new(config)?;
        session.track(&mut world);
        Ok(world)
    }

    /// Automation attacks at t10 and the cooldown runs 10 ticks. A manual
    /// attack submitted for t15 is rejected; the same attack at t20 wins.
    fn run_cooldown_override(&self, session: &mut Session) -> Result<(), Failure> {
        let mut config = self.sim_config();
        config.enemies = config.enemies.max(1);
        config.bridge.manual_enabled = false;
        config.bridge.automation_enabled = false;
        let mut world = self.world(session, config)?;

        let target = world
            .domain()
            .first_living()
            .ok_or_else(|| Failure::Check("arena spawned no enemies".into()))?;
        let attack = RawCommand::new(ATTACK).with_target(target);
        let hud = Presenter::bind(
            "hud",
            &hud_contract(),
            world.schema(),
            Cadence::EVERY_TICK,
            ScanMode::Versions,
        )
        .with_sender(world.sender())
        .with_script(vec![
            ScriptedCommand { tick: Tick(15), command: attack },
            ScriptedCommand { tick: Tick(20), command: attack },
        ]);
        let hud = world.add_presenter(hud);
        let schema = Arc::clone(world.schema());
        let block_slot = slot(&schema, shared::BLOCK_REASON)?;
        let actor_slot = slot(&schema, shared::LAST_ACTOR)?;
        let since_slot = slot(&schema, shared::LAST_ACTOR_SINCE)?;

        for t in 1..=25u64 {
            match t {
                10 => world.bridge_mut().set_automation_enabled(true),
                11 => world.bridge_mut().set_manual_enabled(true),
                _ => {}
            }
            let report = world.tick()?;
            let published = world.bridge().published();
            let cooldown = published.read(HERO_COOLDOWN).as_int();

            match t {
                1..=9 => check!(
                    report.selected.is_none(),
                    "t{t}: something acted with both sources disabled"
                ),
                10 => {
                    check!(
                        source_of(&report) == Some(SourceTag::Automated),
                        "t10: expected the automated attack, got {:?}",
                        report.selected
                    );
                    check!(cooldown == Some(10), "t10: cooldown published as {:?}", cooldown);
                }
                11 => check!(
                    cooldown == Some(9),
                    "t11: enabling manual control disturbed the cooldown ({:?})",
                    cooldown
                ),
                15 => {
                    let reasons: Vec<RejectionReason> =
                        report.rejections.iter().map(|r| r.reason).collect();
                    check!(
                        reasons == vec![RejectionReason::Cooldown],
                        "t15: expected one cooldown rejection, got {:?}",
                        reasons
                    );
                    check!(report.selected.is_none(), "t15: an action was selected during cooldown");
                    check!(cooldown == Some(5), "t15: cooldown published as {:?}", cooldown);
                    let shown = world
                        .presenter(hud)
                        .decode_enum(&schema, shared::BLOCK_REASON_ENUM, block_slot);
                    check!(shown == "cooldown", "t15: hud shows block reason '{shown}'");
                }
                20 => {
                    check!(
                        source_of(&report) == Some(SourceTag::Manual),
                        "t20: expected the manual attack, got {:?}",
                        report.selected
                    );
                    check!(cooldown == Some(10), "t20: cooldown restarted as {:?}", cooldown);
                    check!(
                        published.read(actor_slot) == PropertyValue::Int(SourceTag::Manual.code()),
                        "t20: last actor is {}",
                        published.read(actor_slot)
                    );
                    check!(
                        published.read(since_slot) == PropertyValue::Int(20),
                        "t20: owner since {}",
                        published.read(since_slot)
                    );
                    check!(
                        published.read(block_slot) == PropertyValue::Int(RejectionReason::None.code()),
                        "t20: block reason not cleared by the manual win"
                    );
                }
                12..=14 | 16..=19 => check!(
                    report.selected.is_none(),
                    "t{t}: unexpected action {:?}",
                    report.selected
                ),
                _ => {}
            }
        }

        let history: Vec<(u64, ActionId)> = world
            .domain()
            .history()
            .iter()
            .map(|e| (e.tick.get(), e.action))
            .collect();
        check!(
            history == vec![(10, ATTACK), (20, ATTACK)],
            "domain executed {:?}",
            history
        );
        check!(world.presenter(hud).submitted() == 2, "hud submitted {} commands", world.presenter(hud).submitted());

        session.absorb(&mut world);
        Ok(())
    }

    /// Two domain providers claim slot id 300: the strict build reports both
    /// paths and yields no snapshot.
    fn run_id_collision(&self, session: &mut Session) -> Result<(), Failure> {
        let domain = ArenaDomain::new(self.seed, self.config.enemies);
        let loot = TableProvider::new(Namespace::domain("loot")).slot("loot.gold", 300, ValueType::Int);
        let quest = TableProvider::new(Namespace::domain("quest")).slot("quest.step", 300, ValueType::Int);

        let builder = SchemaBuilder::new()
            .with(&SharedSchema)
            .with(&domain)
            .with(&loot)
            .with(&quest);
        match builder.build() {
            Ok(snapshot) => {
                return Err(Failure::Check(format!(
                    "colliding build produced a snapshot with {} entries",
                    snapshot.len()
                )))
            }
            Err(report) => {
                session.metrics.schema_errors += report.errors.len() as u64;
                check!(report.errors.len() == 1, "expected one violation, got {:?}", report.errors);
                check!(
                    report.contains_path("loot.gold") && report.contains_path("quest.step"),
                    "report does not name both paths: {}",
                    report
                );
                check!(
                    report.providers() == vec!["loot", "quest"],
                    "offenders reported as {:?}",
                    report.providers()
                );
                debug!("Collision reported: {}", report.errors[0]);
            }
        }

        // Either provider alone is fine
        let alone = SchemaBuilder::new()
            .with(&SharedSchema)
            .with(&domain)
            .with(&loot)
            .build();
        check!(alone.is_ok(), "loot alone failed to build");
        Ok(())
    }

    /// A contract requiring the retired mana slot disables only its own
    /// presenter; the rest of the world keeps running.
    fn run_missing_capability(&self, session: &mut Session) -> Result<(), Failure> {
        let mut world = self.world(session, self.sim_config())?;
        let ticks = self.ticks.unwrap_or(30);

        let mana_contract = CapabilityContract::new("mana_bar")
            .require_slot("arena.hero.mana", ValueType::Int)
            .require_slot("arena.hero.cooldown", ValueType::Int)
            .optional_slot("arena.hero.target", ValueType::Entity);
        let mana_bar = Presenter::bind(
            "mana_bar",
            &mana_contract,
            world.schema(),
            Cadence::EVERY_TICK,
            ScanMode::Versions,
        )
        .with_sender(world.sender())
        .with_script(vec![ScriptedCommand {
            tick: Tick(3),
            command: RawCommand::new(GUARD),
        }]);

        let taunt_contract = hud_contract().optional_action("arena.taunt");
        let hud = Presenter::bind(
            "hud",
            &taunt_contract,
            world.schema(),
            Cadence::EVERY_TICK,
            ScanMode::Versions,
        );

        let report = mana_bar.report();
        check!(
            report.results() == vec![false, true, true],
            "mana_bar capability results {:?}",
            report.results()
        );
        check!(
            report.missing_required() == vec!["arena.hero.mana"],
            "missing required {:?}",
            report.missing_required()
        );
        check!(mana_bar.state() == FeatureState::Disabled, "mana_bar is {:?}", mana_bar.state());
        check!(hud.state() == FeatureState::Degraded, "hud is {:?}", hud.state());
        check!(
            hud.report().missing_optional() == vec!["arena.taunt"],
            "hud missing optional {:?}",
            hud.report().missing_optional()
        );

        let mana_bar = world.add_presenter(mana_bar);
        let hud = world.add_presenter(hud);
        world.run(ticks)?;

        check!(world.presenter(mana_bar).submitted() == 0, "disabled presenter submitted commands");
        check!(
            world.bridge().channel_stats().submitted == 0,
            "the channel received {} commands",
            world.bridge().channel_stats().submitted
        );
        check!(
            world.stats().automated_actions > 0,
            "the world stopped acting after a presenter was disabled"
        );
        let cooldown = world.presenter(hud).value_of("arena.hero.cooldown");
        check!(
            cooldown == Some(world.bridge().published().read(HERO_COOLDOWN)),
            "hud mirror is stale: {:?}",
            cooldown
        );

        session.absorb(&mut world);
        Ok(())
    }

    /// A 1/3-rate bitmask reader drifts between heartbeats and converges on
    /// each one. A late joiner converges after a requested resync. A version
    /// reader never drifts.
    fn run_heartbeat_resync(&self, session: &mut Session) -> Result<(), Failure> {
        const INTERVAL: u64 = 30;
        let mut config = self.sim_config();
        config.bridge.heartbeat_interval_ticks = INTERVAL;
        let mut world = self.world(session, config)?;
        let ticks = self.ticks.unwrap_or(3 * INTERVAL).max(INTERVAL + 20);

        let contract = hud_contract();
        let slow_cadence = Cadence::new(3, 0);
        let lagging = world.add_presenter(Presenter::bind(
            "lagging",
            &contract,
            world.schema(),
            slow_cadence,
            ScanMode::Bitmask,
        ));
        let versioned = world.add_presenter(Presenter::bind(
            "versioned",
            &contract,
            world.schema(),
            slow_cadence,
            ScanMode::Versions,
        ));
        let mut drifted = false;
        let mut late: Option<usize> = None;
        let join_at = INTERVAL + 15;

        for _ in 0..ticks {
            let report = world.tick()?;
            let tick = report.tick;
            let published = world.bridge().published();

            if slow_cadence.is_due(tick) {
                let lag = world.presenter(lagging).divergence(published);
                let ver = world.presenter(versioned).divergence(published);
                check!(ver.is_empty(), "{tick}: version reader diverged on {:?}", ver);
                if report.heartbeat {
                    check!(lag.is_empty(), "{tick}: bitmask reader still diverged after heartbeat on {:?}", lag);
                } else if !lag.is_empty() {
                    drifted = true;
                }
            }
            if tick.get() % INTERVAL == 0 {
                check!(report.heartbeat, "{tick}: heartbeat did not fire");
            }

            if let Some(late) = late {
                let lag = world.presenter(late).divergence(world.bridge().published());
                check!(lag.is_empty(), "{tick}: late joiner still diverged on {:?}", lag);
            }

            if tick.get() == join_at {
                // A bitmask reader joining now sees only this frame's changes
                let mut joiner = Presenter::bind(
                    "late",
                    &contract,
                    world.schema(),
                    Cadence::EVERY_TICK,
                    ScanMode::Bitmask,
                );
                joiner.forget();
                joiner.observe(world.bridge().published());
                check!(
                    !joiner.divergence(world.bridge().published()).is_empty(),
                    "{tick}: late joiner converged without a resync"
                );
                late = Some(world.add_presenter(joiner));
                world.bridge_mut().request_resync();
            }
        }

        check!(drifted, "bitmask reader never drifted between heartbeats");
        check!(late.is_some(), "late joiner never joined");
        check!(
            world.stats().heartbeats >= ticks / INTERVAL + 1,
            "only {} heartbeats",
            world.stats().heartbeats
        );
        session.absorb(&mut world);
        Ok(())
    }

    /// After every flip the published domain slots equal a fresh publication
    /// of the domain at that tick, and the shared tick slot agrees.
    fn run_flip_atomicity(&self, session: &mut Session) -> Result<(), Failure> {
        let mut world = self.world(session, self.sim_config())?;
        let ticks = self.ticks.unwrap_or(120);

        let mut rng = ChaCha8Rng::seed_from_u64(world.clock().derive_seed(2));
        let enemies: Vec<EntityRef> = world.domain().enemies().iter().map(|e| e.id).collect();
        let mut script = Vec::new();
        for t in 1..=ticks {
            if rng.gen_bool(0.3) {
                script.push(ScriptedCommand {
                    tick: Tick(t),
                    command: random_command(&mut rng, &enemies),
                });
            }
        }
        let driver = Presenter::bind(
            "driver",
            &hud_contract(),
            world.schema(),
            Cadence::new(5, 0),
            ScanMode::Bitmask,
        )
        .with_sender(world.sender())
        .with_script(script);
        world.add_presenter(driver);

        let schema = Arc::clone(world.schema());
        let tick_slot = slot(&schema, shared::TICK)?;
        let domain_slots: Vec<SlotId> = schema
            .slots()
            .filter(|e| e.namespace == arena::NAMESPACE)
            .filter_map(|e| e.slot_id())
            .collect();

        for _ in 0..ticks {
            let report = world.tick()?;
            let published = world.bridge().published();
            check!(
                published.tick() == report.tick,
                "published store is at {} after tick {}",
                published.tick(),
                report.tick
            );
            check!(
                published.read(tick_slot) == PropertyValue::Int(report.tick.get() as i64),
                "shared.tick reads {} at {}",
                published.read(tick_slot),
                report.tick
            );

            let mut scratch = PropertyStore::new(schema.slot_capacity(), 1);
            {
                let mut frame = FrameWriter::new(&mut scratch, &schema, report.tick);
                world.domain().publish(&mut frame)?;
            }
            for slot in &domain_slots {
                check!(
                    published.read(*slot) == scratch.read(*slot),
                    "{}: slot {} published {} but the domain holds {}",
                    report.tick,
                    schema.slot_path(*slot).unwrap_or("?"),
                    published.read(*slot),
                    scratch.read(*slot)
                );
            }
        }

        session.absorb(&mut world);
        Ok(())
    }

    /// The same per-sender command lists, delivered in two different
    /// interleavings, stamp and arbitrate identically.
    fn run_command_ordering(&self, session: &mut Session) -> Result<(), Failure> {
        const SENDERS: usize = 3;
        let ticks = self.ticks.unwrap_or(30);

        let config = self.sim_config();
        let mut first = self.world(session, config.clone())?;
        let mut second = self.world(session, config)?;

        let enemies: Vec<EntityRef> = first.domain().enemies().iter().map(|e| e.id).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(first.clock().derive_seed(3));
        // plan[tick][sender] = commands in that sender's own order
        let mut plan: Vec<Vec<Vec<RawCommand>>> = Vec::new();
        for _ in 0..ticks {
            let mut per_sender = Vec::with_capacity(SENDERS);
            for _ in 0..SENDERS {
                let n = rng.gen_range(0..=3);
                let mut commands = Vec::with_capacity(n);
                for _ in 0..n {
                    commands.push(random_command(&mut rng, &enemies));
                }
                per_sender.push(commands);
            }
            plan.push(per_sender);
        }

        let mut first_log = Vec::new();
        let mut second_log = Vec::new();
        let mut reordered = false;
        for (world, log, stream) in [(&mut first, &mut first_log, 10), (&mut second, &mut second_log, 11)] {
            let senders: Vec<_> = (0..SENDERS).map(|_| world.sender()).collect();
            let mut shuffle = ChaCha8Rng::seed_from_u64(world.clock().derive_seed(stream));
            for per_sender in &plan {
                let mut arrival: Vec<usize> = per_sender
                    .iter()
                    .enumerate()
                    .flat_map(|(sender, cmds)| std::iter::repeat(sender).take(cmds.len()))
                    .collect();
                let natural = arrival.clone();
                arrival.shuffle(&mut shuffle);
                reordered |= arrival != natural;

                let mut cursor = [0usize; SENDERS];
                for sender in arrival {
                    senders[sender].submit(per_sender[sender][cursor[sender]]);
                    cursor[sender] += 1;
                }
                let report = world.tick()?;
                log.push(arbitration_log(&report));
            }
        }

        if !reordered {
            debug!("No interleaving differed from submission order for this seed");
        }
        for (tick, (a, b)) in first_log.iter().zip(&second_log).enumerate() {
            check!(a == b, "t{}: interleavings disagree: {:?} vs {:?}", tick + 1, a, b);
        }
        check!(
            first.domain().history() == second.domain().history(),
            "domains executed different histories"
        );

        session.absorb(&mut first);
        session.absorb(&mut second);
        Ok(())
    }

    /// Ten commands into a four-slot queue under each overflow policy.
    fn run_queue_overflow(&self, session: &mut Session) -> Result<(), Failure> {
        const CAPACITY: usize = 4;
        const FLOOD: i64 = 10;
        let dropped_expected = (FLOOD as usize - CAPACITY) as u64;

        for policy in [OverflowPolicy::DropOldest, OverflowPolicy::RejectNewest] {
            let mut config = self.sim_config();
            config.bridge.command_capacity = CAPACITY;
            config.bridge.overflow_policy = policy;
            let mut world = self.world(session, config)?;
            let sender = world.sender();

            let statuses: Vec<SubmitStatus> = (0..FLOOD)
                .map(|i| sender.submit(RawCommand::new(GUARD).with_payload(i)))
                .collect();
            let report = world.tick()?;
            let stats = world.bridge().channel_stats();
            let schema = Arc::clone(world.schema());
            let published = world.bridge().published();

            check!(report.drained == CAPACITY, "{policy}: drained {}", report.drained);
            let winner = report.selected.and_then(|s| s.intent.payload.as_int());
            check!(
                report.rejections.len() == CAPACITY - 1
                    && report
                        .rejections
                        .iter()
                        .all(|r| r.reason == RejectionReason::Superseded),
                "{policy}: rejections {:?}",
                report.rejections
            );

            match policy {
                OverflowPolicy::DropOldest => {
                    check!(
                        statuses.iter().all(|s| *s != SubmitStatus::Rejected),
                        "drop_oldest rejected a submission"
                    );
                    check!(stats.dropped_oldest == dropped_expected, "dropped {}", stats.dropped_oldest);
                    // Oldest survivor wins the tick
                    check!(winner == Some(FLOOD - CAPACITY as i64), "winner payload {:?}", winner);
                    let dropped = published.read(slot(&schema, shared::COMMANDS_DROPPED)?);
                    check!(
                        dropped == PropertyValue::Int(dropped_expected as i64),
                        "shared.commands.dropped reads {}",
                        dropped
                    );
                }
                OverflowPolicy::RejectNewest => {
                    let rejected = statuses.iter().filter(|s| **s == SubmitStatus::Rejected).count();
                    check!(
                        statuses[..CAPACITY].iter().all(|s| *s == SubmitStatus::Queued),
                        "reject_newest refused an early submission: {:?}",
                        statuses
                    );
                    check!(rejected as u64 == dropped_expected, "rejected {rejected} submissions");
                    check!(stats.rejected_newest == dropped_expected, "rejected_newest {}", stats.rejected_newest);
                    check!(winner == Some(0), "winner payload {:?}", winner);
                }
            }
            session.absorb(&mut world);
        }
        Ok(())
    }

    /// A presenter built against an older arena schema decodes the newer
    /// guarding stance as `arena.stance#2`.
    fn run_enum_fallback(&self, session: &mut Session) -> Result<(), Failure> {
        let mut world = self.world(session, self.sim_config())?;

        let previous = TableProvider::new(Namespace::domain(arena::NAMESPACE))
            .slot("arena.hero.cooldown", HERO_COOLDOWN.0, ValueType::Int)
            .slot("arena.hero.stance", HERO_STANCE.0, ValueType::Int)
            .action("arena.attack", ATTACK.0)
            .action("arena.guard", GUARD.0)
            .enum_code(arena::STANCE_ENUM, arena::Stance::Idle.code(), "idle")
            .enum_code(arena::STANCE_ENUM, arena::Stance::Attacking.code(), "attacking");
        let old_schema = SchemaBuilder::new()
            .with(&SharedSchema)
            .with(&previous)
            .build()
            .map_err(SimError::from)?;
        let lineage = world.schema().check_lineage(&old_schema);
        check!(lineage.is_empty(), "current schema breaks lineage: {:?}", lineage);

        let contract = CapabilityContract::new("old_hud")
            .require_slot("arena.hero.stance", ValueType::Int)
            .require_action("arena.guard");
        let old_hud = Presenter::bind(
            "old_hud",
            &contract,
            &old_schema,
            Cadence::EVERY_TICK,
            ScanMode::Versions,
        )
        .with_sender(world.sender())
        .with_script(vec![ScriptedCommand {
            tick: Tick(2),
            command: RawCommand::new(GUARD),
        }]);
        check!(old_hud.state() == FeatureState::Enabled, "old_hud is {:?}", old_hud.state());
        let old_hud = world.add_presenter(old_hud);

        world.tick()?;
        let shown = world.presenter(old_hud).decode_enum(&old_schema, arena::STANCE_ENUM, HERO_STANCE);
        check!(shown == "attacking", "t1: old hud shows '{shown}'");

        world.tick()?;
        let hud = world.presenter(old_hud);
        let old_view = hud.decode_enum(&old_schema, arena::STANCE_ENUM, HERO_STANCE);
        let new_view = hud.decode_enum(world.schema(), arena::STANCE_ENUM, HERO_STANCE);
        let expected = format!("{}#{}", arena::STANCE_ENUM, arena::Stance::Guarding.code());
        check!(old_view == expected, "t2: old hud shows '{old_view}', wanted '{expected}'");
        check!(new_view == "guarding", "t2: current schema shows '{new_view}'");
        check!(
            !old_schema.enum_label(arena::STANCE_ENUM, 2).is_known(),
            "old schema knows code 2"
        );

        session.absorb(&mut world);
        Ok(())
    }

    /// An extension using a domain-tier id is excluded by the isolating
    /// build; the world runs on what remains.
    fn run_isolated_build(&self, session: &mut Session) -> Result<(), Failure> {
        let config = self.sim_config();
        let clock = SimClock::shared(config.seed);
        let domain = ArenaDomain::new(clock.derive_seed(1), config.enemies);
        let quest = TableProvider::new(Namespace::extension("quest"))
            .slot("quest.step", 4096, ValueType::Int)
            .enum_code("quest.phase", 0, "start");
        let rogue = TableProvider::new(Namespace::extension("rogue")).slot("rogue.hp", 300, ValueType::Int);

        let builder = SchemaBuilder::new()
            .with(&SharedSchema)
            .with(&domain)
            .with(&quest)
            .with(&rogue);
        check!(builder.build().is_err(), "strict build accepted the rogue extension");

        let (snapshot, errors) = builder.build_isolating();
        session.metrics.schema_errors += errors.len() as u64;
        check!(errors.len() == 1, "expected one violation, got {:?}", errors);
        check!(
            errors[0].providers() == vec!["rogue"],
            "blamed {:?}",
            errors[0].providers()
        );
        check!(snapshot.slot("rogue.hp").is_none(), "rogue slot survived isolation");
        check!(snapshot.slot("quest.step").is_some(), "quest extension was lost");
        check!(snapshot.action("arena.attack") == Some(ATTACK), "arena actions were lost");
        check!(
            snapshot.providers().iter().all(|p| p.name != "rogue"),
            "rogue still listed as a provider"
        );
        check!(
            !snapshot.is_retired(SchemaKind::Slot, 300),
            "isolation retired the rogue id"
        );

        let schema = Arc::new(snapshot);
        let quest_log = Presenter::bind(
            "quest_log",
            &CapabilityContract::new("quest_log").require_slot("quest.step", ValueType::Int),
            &schema,
            Cadence::EVERY_TICK,
            ScanMode::Versions,
        );
        let rogue_bar = Presenter::bind(
            "rogue_bar",
            &CapabilityContract::new("rogue_bar").require_slot("rogue.hp", ValueType::Int),
            &schema,
            Cadence::EVERY_TICK,
            ScanMode::Versions,
        );
        check!(quest_log.state() == FeatureState::Enabled, "quest_log is {:?}", quest_log.state());
        check!(rogue_bar.state() == FeatureState::Disabled, "rogue_bar is {:?}", rogue_bar.state());

        let mut world = SimWorld::with_schema(config, clock, schema, domain)?;
        session.track(&mut world);
        world.add_presenter(quest_log);
        world.add_presenter(rogue_bar);
        world.run(self.ticks.unwrap_or(20))?;
        check!(world.bridge().halted().is_none(), "bridge halted");
        check!(world.stats().automated_actions > 0, "world never acted");

        session.absorb(&mut world);
        Ok(())
    }
}

fn slot(schema: &SchemaSnapshot, path: &str) -> Result<SlotId, Failure> {
    schema
        .slot(path)
        .ok_or_else(|| Failure::Check(format!("schema has no slot '{path}'")))
}

fn source_of(report: &TickReport) -> Option<SourceTag> {
    report.selected.map(|s| s.source)
}

/// Guard, a valid attack, an attack on a stranger or an unregistered action.
fn random_command(rng: &mut ChaCha8Rng, enemies: &[EntityRef]) -> RawCommand {
    match rng.gen_range(0..4) {
        0 => RawCommand::new(GUARD),
        1 => match enemies.choose(rng) {
            Some(target) => RawCommand::new(ATTACK).with_target(*target),
            None => RawCommand::new(ATTACK),
        },
        2 => RawCommand::new(ATTACK).with_target(EntityRef(1)),
        _ => RawCommand::new(ActionId(999)),
    }
}

/// (sequence, action, reason) for everything a tick decided. The winner is
/// listed with reason `none`.
fn arbitration_log(report: &TickReport) -> Vec<(Option<u64>, ActionId, RejectionReason)> {
    report
        .selected
        .iter()
        .map(|s| (s.sequence, s.intent.action, RejectionReason::None))
        .chain(
            report
                .rejections
                .iter()
                .map(|r| (Some(r.sequence), r.action, r.reason)),
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_override_passes() {
        let result = ScenarioRunner::new(42).run(ScenarioId::CooldownOverride);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.total_ticks, 25);
        assert_eq!(result.metrics.manual_actions, 1);
        assert_eq!(result.metrics.automated_actions, 1);
    }

    #[test]
    fn test_registry_only_scenario_counts_errors() {
        let result = ScenarioRunner::new(7).run(ScenarioId::IdCollision);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.total_ticks, 0);
        assert_eq!(result.metrics.schema_errors, 1);
    }

    #[test]
    fn test_queue_overflow_metrics() {
        let result = ScenarioRunner::new(3).run(ScenarioId::QueueOverflow);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.commands_dropped, 6);
        assert_eq!(result.metrics.commands_rejected, 6);
    }

    #[test]
    fn test_export_has_frames_of_primary_world() {
        let (result, export) = ScenarioRunner::new(11).run_exported(ScenarioId::CooldownOverride);
        assert!(export.passed);
        assert_eq!(export.frames.len() as u64, result.total_ticks);
        assert_eq!(export.frames[9].selected.as_ref().unwrap().source, "automated");
        assert_eq!(export.frames[14].rejections[0].reason, "cooldown");
    }

    #[test]
    fn test_same_seed_same_metrics() {
        let a = ScenarioRunner::new(5).with_ticks(60).run(ScenarioId::FlipAtomicity);
        let b = ScenarioRunner::new(5).with_ticks(60).run(ScenarioId::FlipAtomicity);
        assert!(a.passed, "{:?}", a.failure_reason);
        assert_eq!(a.metrics, b.metrics);
    }
}
