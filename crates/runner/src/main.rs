//! wearwatch - disk-wear experiment runner
//!
//! Runs one experiment end to end: supervises the workload and its
//! telemetry collectors, normalizes the collected data, writes the summary
//! and exits with the run's exit code.

use anyhow::{Context, Result};
use runner_lib::{
    report::RunExit, ComponentStatus, Experiment, Normalizer, RunMetrics, RunnerError,
    StructuredLogger, SummaryReporter,
};
use std::collections::HashSet;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const RUNNER_VERSION: &str = env!("CARGO_PKG_VERSION");
const SUMMARY_FILE: &str = "summary.json";
const METRICS_FILE: &str = "metrics.prom";

#[tokio::main]
async fn main() {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let exit = match run().await {
        Ok(exit) => exit,
        Err(e) => {
            error!(error = format!("{:#}", e), "Run aborted");
            exit_for_error(&e)
        }
    };
    std::process::exit(exit.code());
}

/// Workload spawn failures are start failures; anything else that aborts
/// the run happens before it starts and is a configuration problem.
fn exit_for_error(err: &anyhow::Error) -> RunExit {
    match err.downcast_ref::<RunnerError>() {
        Some(RunnerError::ProcessSpawn { .. }) => RunExit::StartFailure,
        _ => RunExit::ConfigError,
    }
}

async fn run() -> Result<RunExit> {
    let path = config::config_path(std::env::args().nth(1));
    let config = config::load(&path)?;
    info!(config = %path.display(), log_dir = %config.log_dir.display(), "Experiment configured");

    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
    let logger = StructuredLogger::new(host);
    let metrics = RunMetrics::new();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(());
    });

    let outcome = Experiment::new(&config)
        .with_logger(logger.clone())
        .run(shutdown_rx)
        .await
        .context("experiment could not be run")?;

    let reports = Normalizer::from_config(&config, outcome.window())
        .context("failed to set up metric sources")?
        .run()
        .await;
    let summary = SummaryReporter::build(&outcome, &reports);

    let mut flagged = HashSet::new();
    for source in summary.sources.iter().filter(|s| s.status != ComponentStatus::Healthy) {
        if flagged.insert(source.source.as_str()) {
            logger.log_source_degraded(&source.source, source.reason.as_deref().unwrap_or("unknown"));
        }
    }

    println!("{}", summary.render_text());

    let summary_path = config.log_dir.join(SUMMARY_FILE);
    if let Err(e) = summary.write_json(&summary_path) {
        warn!(path = %summary_path.display(), error = %e, "Failed to write summary");
    }
    let metrics_path = config.log_dir.join(METRICS_FILE);
    if let Err(e) = metrics.write_textfile(&metrics_path) {
        warn!(path = %metrics_path.display(), error = %e, "Failed to write metrics textfile");
    }

    logger.log_summary(summary.warning_count, summary.exit_code, summary.duration_seconds);
    info!(version = RUNNER_VERSION, exit_code = summary.exit_code, "Experiment finished");
    Ok(summary.exit)
}

/// Resolves on SIGINT or SIGTERM
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
        _ = terminate.recv() => info!("SIGTERM received"),
    }
}
