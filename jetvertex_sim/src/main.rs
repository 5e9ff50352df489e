//! JetVertex Simulator CLI
//!
//! Run the secondary-vertex finder on synthetic jets and score it against
//! the generator truth.

use clap::Parser;
use jetvertex_core::VertexingConfig;
use jetvertex_sim::scenarios::ScenarioId;
use jetvertex_sim::{JetExport, ScenarioResult, ScenarioRunner, SimError};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// JetVertex simulation and validation CLI
#[derive(Parser, Debug)]
#[command(name = "jetvertex-sim")]
#[command(about = "Validate secondary vertex finding on synthetic jets", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of jets per scenario
    #[arg(short, long, default_value = "100")]
    jets: usize,

    /// Scenario to run (b_jet, charm_cascade, light_jet, v0_jet, conversion_jet, busy_b_jet, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// JSON file with finder configuration overrides
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export every jet of a single scenario to a JSON file
    #[arg(long)]
    export: Option<String>,
}

fn load_config(path: Option<&str>) -> Result<VertexingConfig, SimError> {
    match path {
        Some(path) => Ok(VertexingConfig::from_json(&std::fs::read_to_string(path)?)?),
        None => Ok(VertexingConfig::default()),
    }
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    if !args.json {
        info!("JetVertex Simulator v0.1.0");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let config = load_config(args.config.as_deref()).unwrap_or_else(|e| fail(e));

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Available scenarios: b_jet, charm_cascade, light_jet, v0_jet, conversion_jet, busy_b_jet, all");
            fail(e)
        })]
    };

    // Determine seed
    let seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    let runner = ScenarioRunner::new(seed).with_jets(args.jets).with_config(config);

    // Handle --export mode
    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            fail("--export only supports a single scenario, not 'all'");
        }
        let scenario = scenarios[0];
        let mut export = JetExport::new(scenario.name(), seed);
        let result = runner
            .run_with_export(scenario, &mut export)
            .unwrap_or_else(|e| fail(e));
        if let Err(e) = export.write_to_file(export_path) {
            fail(e);
        }
        info!("Exported {} jets to {}", export.jets.len(), export_path);
        if !result.passed {
            error!("✗ {} FAILED: {}", scenario.name(), result.failure_reason.as_deref().unwrap_or("unknown"));
            std::process::exit(1);
        }
        info!("✓ {} (seed={}) PASSED", scenario.name(), seed);
        return;
    }

    // Run scenarios
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for scenario in &scenarios {
        let result = runner.run(*scenario).unwrap_or_else(|e| fail(e));
        if !args.json {
            let m = &result.metrics;
            if result.passed {
                info!(
                    "✓ {} PASSED | eff={:.2} fakes/jet={:.2} purity={:.2} rms={:.3}mm",
                    scenario.name(),
                    m.vertex_efficiency,
                    m.fakes_per_jet,
                    m.track_purity,
                    m.position_rms
                );
            } else {
                error!(
                    "✗ {} FAILED: {}",
                    scenario.name(),
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
        all_results.push(result);
    }

    // Summary
    let total = all_results.len();
    let failed_count = all_results.iter().filter(|r| !r.passed).count();

    if args.json {
        let summary = serde_json::json!({
            "seed": seed,
            "jets": args.jets,
            "total": total,
            "passed": total - failed_count,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "passed": r.passed,
                    "vertex_efficiency": r.metrics.vertex_efficiency,
                    "fake_rate": r.metrics.fake_rate,
                    "fakes_per_jet": r.metrics.fakes_per_jet,
                    "track_purity": r.metrics.track_purity,
                    "vertices_per_jet": r.metrics.vertices_per_jet,
                    "inclusive_rate": r.metrics.inclusive_rate,
                    "position_rms": r.metrics.position_rms,
                    "shared_track_violations": r.metrics.shared_track_violations,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => fail(e),
        }
    } else {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed_count == 0 {
            info!("✅ All {} scenarios passed!", total);
        } else {
            error!("❌ {}/{} scenarios failed!", failed_count, total);
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
