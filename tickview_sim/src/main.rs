//! TickView simulator CLI
//!
//! Runs the named bridge scenarios deterministically, or drives the arena
//! in real time with `--live`.

use std::path::PathBuf;

use clap::Parser;
use tickview_sim::{run_live, ScenarioId, ScenarioResult, ScenarioRunner, SimConfig};
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "tickview-sim")]
#[command(about = "Run deterministic scenarios against the TickView bridge", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (cooldown_override, id_collision, ..., all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Length of open-ended scenarios, or of the live run
    #[arg(short, long)]
    ticks: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export per-tick frames of a single scenario to a JSON file
    #[arg(long)]
    export: Option<PathBuf>,

    /// SimConfig JSON file (bridge settings, tick rate, enemies)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run the arena in real time instead of scenarios
    #[arg(long)]
    live: bool,

    /// Presenter frame rate in live mode
    #[arg(long, default_value = "30")]
    frame_hz: u32,
}

fn main() {
    let args = Args::parse();

    // RUST_LOG wins over --verbose
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Warning: a tracing subscriber was already installed");
    }

    if !args.json {
        info!("TickView Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let mut config = match &args.config {
        Some(path) => SimConfig::from_json_file(path).unwrap_or_else(|e| {
            eprintln!("Error: cannot load {}: {}", path.display(), e);
            std::process::exit(1);
        }),
        None => SimConfig::default(),
    };

    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(1, |d| d.as_nanos() as u64)
    } else {
        args.seed
    };
    config.seed = base_seed;

    if args.live {
        run_live_mode(&args, config);
        return;
    }

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            let names: Vec<&str> = ScenarioId::all().iter().map(|s| s.name()).collect();
            eprintln!("Available scenarios: {}, all", names.join(", "));
            std::process::exit(1);
        })]
    };

    let runner_for = |seed: u64| {
        let runner = ScenarioRunner::new(seed).with_config(config.clone());
        match args.ticks {
            Some(ticks) => runner.with_ticks(ticks),
            None => runner,
        }
    };

    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            eprintln!("Error: --export only supports a single scenario, not 'all'");
            std::process::exit(1);
        }
        let scenario = scenarios[0];
        info!("Running with export to: {}", export_path.display());

        let (result, export) = runner_for(base_seed).run_exported(scenario);
        if let Err(e) = export.write_to_file(export_path) {
            error!("Export failed: {}", e);
            std::process::exit(1);
        }
        if result.passed {
            info!(
                "✓ {} (seed={}) PASSED - {} frames exported to {}",
                scenario,
                base_seed,
                export.frames.len(),
                export_path.display()
            );
        } else {
            error!(
                "✗ {} FAILED: {}",
                scenario,
                result.failure_reason.as_deref().unwrap_or("unknown")
            );
            std::process::exit(1);
        }
        return;
    }

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = runner_for(seed);

        for scenario in &scenarios {
            let result = runner.run(*scenario);
            if !args.json {
                if result.passed {
                    info!("✓ {} (seed={}) PASSED", scenario, seed);
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario,
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }
            all_results.push(result);
        }
    }

    let total = all_results.len();
    let failed_count = all_results.iter().filter(|r| !r.passed).count();
    let passed = total - failed_count;

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results,
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: cannot render summary: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed", failed_count, total);
        }
    }

    if failed_count > 0 {
        std::process::exit(1);
    }
}

fn run_live_mode(args: &Args, config: SimConfig) {
    let ticks = args.ticks.unwrap_or(config.max_ticks);
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: cannot start tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    match runtime.block_on(run_live(config, args.frame_hz, ticks)) {
        Ok(summary) if args.json => match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Error: cannot render summary: {}", e),
        },
        Ok(summary) => info!(
            "Live: {} ticks, {} HUD frames in {:.2}s ({} manual / {} automated actions)",
            summary.ticks,
            summary.frames,
            summary.elapsed_secs,
            summary.stats.manual_actions,
            summary.stats.automated_actions
        ),
        Err(e) => {
            error!("Live run failed: {}", e);
            std::process::exit(1);
        }
    }
}
