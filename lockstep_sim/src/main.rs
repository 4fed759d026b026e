//! Lockstep Simulator CLI
//!
//! Runs N replicas of the arena over a simulated network and checks that
//! they stay in lockstep under each fault scenario.

use clap::Parser;
use lockstep_sim::scenarios::ScenarioId;
use lockstep_sim::{ScenarioResult, ScenarioRunner};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Lockstep deterministic simulation CLI
#[derive(Parser, Debug)]
#[command(name = "lockstep-sim")]
#[command(about = "Run deterministic lockstep scenarios across simulated replicas", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of replicas
    #[arg(short, long, default_value = "4")]
    replicas: usize,

    /// Scenario to run (steady, jitter, partition, spawn_storm, divergence, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Input frames per run
    #[arg(short, long, default_value = "600")]
    ticks: u32,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export the checksum trace of a single scenario to a JSON file
    #[arg(long)]
    export: Option<String>,
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    if !args.json {
        info!("Lockstep Simulator v{}", env!("CARGO_PKG_VERSION"));
    }

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(scenario) => vec![scenario],
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!("Available scenarios: steady, jitter, partition, spawn_storm, divergence, all");
                std::process::exit(1);
            }
        }
    };

    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1)
    } else {
        args.seed
    };

    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            eprintln!("Error: --export only supports a single scenario, not 'all'");
            std::process::exit(1);
        }

        let runner = ScenarioRunner::new(base_seed, args.replicas).with_ticks(args.ticks);
        let (result, trace) = match runner.run_traced(scenarios[0]) {
            Ok(traced) => traced,
            Err(e) => {
                error!("Failed to run {}: {}", scenarios[0], e);
                std::process::exit(1);
            }
        };
        match trace.write_to_file(export_path) {
            Ok(()) => info!(
                "Exported {} checkpoints to {}",
                trace.checkpoints.len(),
                export_path
            ),
            Err(e) => error!("Failed to write export: {}", e),
        }
        report(&result);
        if !result.passed {
            std::process::exit(1);
        }
        return;
    }

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = ScenarioRunner::new(seed, args.replicas).with_ticks(args.ticks);

        for scenario in &scenarios {
            let result = match runner.run(*scenario) {
                Ok(result) => result,
                Err(e) => {
                    error!("Failed to run {} (seed={}): {}", scenario, seed, e);
                    std::process::exit(1);
                }
            };
            if !args.json {
                report(&result);
            }
            all_results.push(result);
        }
    }

    let total = all_results.len();
    let failed = all_results.iter().filter(|r| !r.passed).count();

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed,
            "failed": failed,
            "results": all_results,
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to serialize summary: {}", e),
        }
    } else if failed == 0 {
        info!("All {} scenario runs passed", total);
    } else {
        error!("{}/{} scenario runs failed", failed, total);
        for result in all_results.iter().filter(|r| !r.passed) {
            error!(
                "  - {} seed={}: {}",
                result.scenario.name(),
                result.seed,
                result.failure_reason.as_deref().unwrap_or("unknown")
            );
        }
    }

    // Exit with proper code for CI
    if failed > 0 {
        std::process::exit(1);
    }
}

fn report(result: &ScenarioResult) {
    if result.passed {
        info!(
            "PASS {} (seed={}) frames={} entities={} checksum={:#018x}",
            result.scenario.name(),
            result.seed,
            result.frames_consumed,
            result.final_entity_count,
            result.final_checksum
        );
    } else {
        error!(
            "FAIL {} (seed={}): {}",
            result.scenario.name(),
            result.seed,
            result.failure_reason.as_deref().unwrap_or("unknown")
        );
    }
}
