//! durasim
//!
//! Runs Monte Carlo iterations of the storage durability simulator and writes
//! one JSON record per iteration.
//!
//! # Architecture
//!
//! ```text
//! config.yaml ──▶ Simulation(seed + i) × --jobs ──▶ JSON lines
//!                          │
//!                          └──▶ Prometheus text (--metrics-out)
//! ```

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use durasim::{
    JsonLinesSink, ResultSink, RunMetrics, RunMode, RunRecord, RunReport, Simulation,
    SimulationConfig,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Durability and availability simulator for erasure-coded storage
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML run configuration
    #[arg(long, env = "DURASIM_CONFIG")]
    config: PathBuf,

    /// Number of Monte Carlo iterations
    #[arg(long, env = "DURASIM_ITERATIONS", default_value = "1")]
    iterations: usize,

    /// Iterations run concurrently
    #[arg(long, env = "DURASIM_JOBS", default_value = "4")]
    jobs: usize,

    /// Seed of the first iteration; iteration i uses seed + i
    #[arg(long, env = "DURASIM_SEED", default_value = "0")]
    seed: u64,

    /// Simulation mode
    #[arg(long, env = "DURASIM_MODE", value_enum, default_value = "events")]
    mode: RunMode,

    /// JSON lines output file (stdout when omitted)
    #[arg(long, env = "DURASIM_OUTPUT")]
    output: Option<PathBuf>,

    /// Write Prometheus text metrics to this file
    #[arg(long, env = "DURASIM_METRICS_OUT")]
    metrics_out: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

/// Running totals across finished iterations
#[derive(Debug, Default)]
struct Summary {
    runs: usize,
    lost_stripes: u64,
    pdl_sum: f64,
    pua_sum: f64,
}

impl Summary {
    fn add(&mut self, report: &RunReport) {
        self.runs += 1;
        match report {
            RunReport::Events(r) => {
                self.lost_stripes += r.undurable_count;
                self.pdl_sum += r.pdl;
                self.pua_sum += r.pua;
            }
            RunReport::Durations(r) => {
                self.lost_stripes += r.lost_count;
                self.pdl_sum += r.pdl;
                self.pua_sum += r.pua;
            }
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let config = SimulationConfig::from_file(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;

    info!("Starting durasim");
    info!("  Scheme: {}", config.redundancy);
    info!("  Mission: {} hours", config.total_time);
    info!("  Stripes: {}", config.total_slices());
    info!("  Mode: {}", args.mode);
    info!("  Iterations: {} ({} concurrent)", args.iterations, args.jobs);

    let writer: Box<dyn Write + Send> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout())),
    };
    let mut sink = JsonLinesSink::new(writer);

    let metrics = Arc::new(RunMetrics::new().context("failed to build metrics registry")?);
    let summary = Arc::new(Mutex::new(Summary::default()));
    let config = Arc::new(config);
    let semaphore = Arc::new(Semaphore::new(args.jobs.max(1)));

    let mut tasks = JoinSet::new();
    for iteration in 0..args.iterations {
        let permit = semaphore.clone().acquire_owned().await?;
        let config = config.clone();
        let metrics = metrics.clone();
        let summary = summary.clone();
        let seed = args.seed.wrapping_add(iteration as u64);
        let mode = args.mode;

        tasks.spawn_blocking(move || {
            let _permit = permit;
            let started_at = Utc::now();
            let report = Simulation::new((*config).clone(), seed)
                .and_then(|sim| sim.run(mode))
                .with_context(|| format!("iteration {} (seed {}) failed", iteration, seed))?;

            let record = RunRecord::new(iteration, seed, mode, started_at, report);
            metrics.observe(&record);
            summary.lock().add(&record.report);
            info!(iteration, seed, "Iteration finished");
            Ok::<_, anyhow::Error>(record)
        });

        // write what has finished while waiting for permits
        while let Some(joined) = tasks.try_join_next() {
            sink.record(&joined??)?;
        }
    }

    while let Some(joined) = tasks.join_next().await {
        match joined? {
            Ok(record) => sink.record(&record)?,
            Err(e) => {
                error!("{:#}", e);
                return Err(e);
            }
        }
    }
    sink.flush()?;

    if let Some(path) = &args.metrics_out {
        std::fs::write(path, metrics.encode()?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("Metrics written to {}", path.display());
    }

    let summary = summary.lock();
    if summary.runs > 0 {
        info!(
            runs = summary.runs,
            lost_stripes = summary.lost_stripes,
            mean_pdl = summary.pdl_sum / summary.runs as f64,
            mean_pua = summary.pua_sum / summary.runs as f64,
            "Simulation complete"
        );
    }
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // logs go to stderr so stdout stays JSON lines
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(io::stderr))
            .init();
    }
}
