//! wearwatch CLI
//!
//! Post-run tooling for wearwatch experiments: normalize a log directory,
//! inspect a saved summary, diff a diskstats log, and query the wattmeter API.

mod commands;
mod output;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use commands::{disk, normalize, power, summary};
use runner_lib::config::DeviceMatch;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// wearwatch CLI
#[derive(Parser)]
#[command(name = "wwctl")]
#[command(author, version, about = "Post-run tooling for wearwatch experiments", long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Normalize the collector logs of a finished run
    Normalize {
        /// Directory holding pidstat.log, iotop.log and scaphandre.json
        log_dir: PathBuf,

        /// Token selecting the workload's processes
        #[arg(long)]
        filter: String,

        /// Match the token against whole command words instead of substrings
        #[arg(long)]
        exact: bool,

        /// Match case-sensitively
        #[arg(long)]
        case_sensitive: bool,

        /// Seconds between iotop samples
        #[arg(long, default_value_t = 1.0)]
        iotop_interval: f64,

        /// Seconds between Scaphandre samples
        #[arg(long, default_value_t = 2.0)]
        scaphandre_interval: f64,
    },

    /// Show a saved run summary
    Summary {
        /// summary.json, or the log directory containing it
        path: PathBuf,
    },

    /// Diff the first and last entries of a diskstats log
    Diskstats {
        /// Log written by the diskstats collector, or a /proc/diskstats copy
        log: PathBuf,

        /// Block device name
        #[arg(long, short)]
        device: String,

        /// Fall back to the first device whose name starts with --device
        #[arg(long)]
        prefix: bool,
    },

    /// Fetch power samples from the wattmeter API and integrate them
    FetchPower {
        /// Metrics endpoint URL (can also be set via WEARWATCH_WATTMETER_URL)
        #[arg(long, env = "WEARWATCH_WATTMETER_URL")]
        endpoint: String,

        /// Job identifier
        #[arg(long)]
        job_id: String,

        /// Window start (RFC 3339)
        #[arg(long)]
        start: DateTime<Utc>,

        /// Window end (RFC 3339)
        #[arg(long)]
        end: DateTime<Utc>,

        /// Metric name
        #[arg(long, default_value = "wattmetre_power_watt")]
        metric: String,

        /// Seconds between samples
        #[arg(long, default_value_t = 0.01)]
        interval: f64,

        /// Save the raw response to this file
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(EnvFilter::new(level))
        .with_writer(std::io::stderr)
        .init();

    // Execute command
    match cli.command {
        Commands::Normalize {
            log_dir,
            filter,
            exact,
            case_sensitive,
            iotop_interval,
            scaphandre_interval,
        } => {
            let options = normalize::NormalizeOptions {
                filter,
                exact,
                case_sensitive,
                iotop_interval,
                scaphandre_interval,
            };
            normalize::normalize_logs(&log_dir, options, cli.format).await?;
        }
        Commands::Summary { path } => {
            summary::show_summary(&path, cli.format)?;
        }
        Commands::Diskstats { log, device, prefix } => {
            let match_mode = if prefix {
                DeviceMatch::Prefix
            } else {
                DeviceMatch::Exact
            };
            disk::show_delta(&log, &device, match_mode, cli.format)?;
        }
        Commands::FetchPower {
            endpoint,
            job_id,
            start,
            end,
            metric,
            interval,
            output,
        } => {
            let query = power::PowerQuery {
                endpoint,
                job_id,
                start,
                end,
                metric,
                interval,
            };
            power::fetch_power(query, output, cli.format).await?;
        }
    }

    Ok(())
}
