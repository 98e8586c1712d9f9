//! Countervalues Simulator
//!
//! Runs the countervalues engine against a simulated rate provider.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use countervalues::{config::parse_pairs, Countervalues, EngineConfig, RawSnapshot};

mod controller;
mod feed;
mod metrics;
mod report;
mod scenario;

use controller::SimulationController;
use feed::SimulatedFeed;
use scenario::Scenario;

/// Countervalues Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Countervalues engine simulation environment")]
struct Args {
    /// Tracked pairs, comma-separated (overrides COUNTERVALUES_PAIRS)
    #[arg(short, long)]
    pairs: Option<String>,

    /// Autopoll interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Delay before the first automatic poll in milliseconds
    #[arg(long)]
    init_delay_ms: Option<u64>,

    /// Run duration in seconds (0 = until Ctrl+C)
    #[arg(long, default_value = "10")]
    duration: u64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Probability that a single pair fetch fails
    #[arg(long, default_value = "0.0")]
    failure_rate: f64,

    /// Snapshot file, imported at start and written back at the end
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Scenario to run (steady, settings-change, wipe, or a JSON file)
    #[arg(short, long)]
    scenario: Option<String>,

    /// Log as JSON
    #[arg(long)]
    json: bool,
}

const DEFAULT_PAIRS: &str = "BTC/USD,ETH/USD,ETH/BTC";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(args.json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!args.json).then(tracing_subscriber::fmt::layer))
        .init();

    info!("Starting Countervalues Simulator");

    let config = load_config(&args)?;
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    info!(
        pairs = config.tracked_pairs.len(),
        interval_ms = config.autopoll_interval.as_millis() as u64,
        init_delay_ms = config.poll_init_delay.as_millis() as u64,
        "Configuration loaded"
    );

    let feed = Arc::new(SimulatedFeed::new(args.seed));
    feed.set_failure_rate(args.failure_rate);

    let snapshot = match &args.snapshot {
        Some(path) if path.exists() => {
            let json = tokio::fs::read_to_string(path).await?;
            info!(path = %path.display(), "Loading snapshot");
            RawSnapshot::from_json(&json)?
        }
        _ => RawSnapshot::default(),
    };

    let engine = Countervalues::with_snapshot(feed.clone(), config.settings(), &snapshot);
    let controller = SimulationController::new(engine, feed);

    if let Some(name) = &args.scenario {
        let scenario = Scenario::load(name)?;
        controller.run_scenario(&scenario).await?;
    } else {
        info!("Running in continuous mode, press Ctrl+C to stop");
        let duration = (args.duration > 0).then(|| Duration::from_secs(args.duration));
        controller.run(duration).await?;
    }

    controller.report();

    if let Some(path) = &args.snapshot {
        let json = controller.engine().export().to_json()?;
        tokio::fs::write(path, json).await?;
        info!(path = %path.display(), "Snapshot written");
    }

    let metrics = controller.shutdown().await;
    info!("Simulation complete");
    info!("Load cycles: {}", metrics.cycles);
    info!("Failed cycles: {}", metrics.failed_cycles);
    info!("Cycle failure rate: {:.2}", metrics.failure_rate());
    info!("State updates: {}", metrics.state_updates);
    info!("Cached points: {}", metrics.points);
    info!("Errored pairs: {}", metrics.errored_pairs);
    info!("Average cycle: {}ms", metrics.average_cycle_ms());
    info!("p99 cycle: {}ms", metrics.p99_cycle_ms());

    Ok(())
}

/// Environment configuration with command-line overrides.
fn load_config(args: &Args) -> anyhow::Result<EngineConfig> {
    let mut config = EngineConfig::from_env();
    config.autostart = false;

    if let Some(pairs) = &args.pairs {
        config.tracked_pairs = parse_pairs(pairs)?;
    } else if config.tracked_pairs.is_empty() {
        config.tracked_pairs = parse_pairs(DEFAULT_PAIRS)?;
    }
    if let Some(ms) = args.interval_ms {
        config.autopoll_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = args.init_delay_ms {
        config.poll_init_delay = Duration::from_millis(ms);
    }

    Ok(config)
}
