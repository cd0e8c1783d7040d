//! Every named scenario, across several seeds.

use proptest::prelude::*;
use tickview_sim::{ScenarioId, ScenarioRunner, SimConfig, SimWorld};

const SEEDS: [u64; 4] = [1, 42, 1337, 0xDEAD_BEEF];

#[test]
fn test_all_scenarios_pass_across_seeds() {
    for seed in SEEDS {
        let runner = ScenarioRunner::new(seed);
        for scenario in ScenarioId::all() {
            let result = runner.run(scenario);
            assert!(
                result.passed,
                "{} (seed={}) failed: {:?}",
                scenario,
                seed,
                result.failure_reason
            );
        }
    }
}

#[test]
fn test_scenarios_are_deterministic() {
    for scenario in ScenarioId::all() {
        let a = ScenarioRunner::new(77).run(scenario);
        let b = ScenarioRunner::new(77).run(scenario);
        assert_eq!(a.metrics, b.metrics, "{} diverged between runs", scenario);
        assert_eq!(a.total_ticks, b.total_ticks);
    }
}

#[test]
fn test_longer_heartbeat_run() {
    let result = ScenarioRunner::new(5).with_ticks(200).run(ScenarioId::HeartbeatResync);
    assert!(result.passed, "{:?}", result.failure_reason);
    assert!(result.metrics.heartbeats >= 7);
}

#[test]
fn test_export_serializes() {
    let (result, export) = ScenarioRunner::new(9).run_exported(ScenarioId::QueueOverflow);
    assert!(result.passed, "{:?}", result.failure_reason);
    let json = serde_json::to_value(&export).unwrap();
    assert_eq!(json["scenario"], "queue_overflow");
    assert_eq!(json["passed"], true);
    assert_eq!(json["frames"].as_array().unwrap().len(), 1);
}

#[test]
fn test_result_json_names_scenario() {
    let result = ScenarioRunner::new(2).run(ScenarioId::EnumFallback);
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["scenario"], "enum_fallback");
    assert!(json.get("failure_reason").is_none());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_core_scenarios_hold_for_any_seed(seed in any::<u64>()) {
        let runner = ScenarioRunner::new(seed);
        for scenario in [ScenarioId::FlipAtomicity, ScenarioId::CommandOrdering, ScenarioId::CooldownOverride] {
            let result = runner.run(scenario);
            prop_assert!(result.passed, "{} failed: {:?}", scenario, result.failure_reason);
        }
    }

    #[test]
    fn prop_worlds_replay_identically(seed in any::<u64>(), ticks in 1u64..80) {
        let run = || {
            let mut world = SimWorld::new(SimConfig { seed, ..Default::default() }).unwrap();
            let reports = world.run(ticks).unwrap();
            (reports, world.domain().history().to_vec())
        };
        prop_assert_eq!(run(), run());
    }
}
