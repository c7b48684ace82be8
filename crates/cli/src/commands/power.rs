//! Wattmeter API queries

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use runner_lib::config::{IntegrationMode, WattmeterConfig};
use runner_lib::normalizer::units::integrate_power;
use runner_lib::normalizer::{parse_response, WattmeterClient};
use runner_lib::TimeWindow;
use serde::Serialize;
use std::path::PathBuf;

use crate::output::{format_energy, print_success, print_warning, OutputFormat};

pub struct PowerQuery {
    pub endpoint: String,
    pub job_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub metric: String,
    pub interval: f64,
}

#[derive(Serialize)]
struct PowerReport {
    job_id: String,
    metric: String,
    window: TimeWindow,
    samples: usize,
    skipped: u64,
    mean_watts: f64,
    joules: f64,
}

/// Reject windows and intervals the wattmeter query cannot use
pub fn check_query(query: &PowerQuery) -> Result<()> {
    if query.end <= query.start {
        anyhow::bail!("--end must be after --start");
    }
    if !(query.interval.is_finite() && query.interval > 0.0) {
        anyhow::bail!("--interval must be a positive number of seconds");
    }
    Ok(())
}

pub async fn fetch_power(query: PowerQuery, output: Option<PathBuf>, format: OutputFormat) -> Result<()> {
    check_query(&query)?;

    let mut config = WattmeterConfig::new(query.endpoint, query.job_id.clone());
    config.metric = query.metric.clone();
    config.sample_interval_secs = query.interval;

    let window = TimeWindow {
        start: query.start,
        end: query.end,
    };
    let client = WattmeterClient::new(config.clone())?;
    let body = client
        .fetch_with_retry(&window)
        .await
        .context("wattmeter API query failed")?;

    if let Some(path) = &output {
        std::fs::write(path, &body).with_context(|| format!("failed to write {}", path.display()))?;
    }

    let (samples, skipped) = parse_response(&body, &query.metric)?;
    let joules = integrate_power(&samples, IntegrationMode::FixedInterval, config.sample_interval());
    let mean_watts = if samples.is_empty() {
        0.0
    } else {
        samples.iter().map(|s| s.watts).sum::<f64>() / samples.len() as f64
    };

    let report = PowerReport {
        job_id: query.job_id,
        metric: query.metric,
        window,
        samples: samples.len(),
        skipped,
        mean_watts,
        joules,
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Table => {
            println!("{}", "Wattmeter Energy".bold());
            println!("{}", "=".repeat(50));
            println!("Job:          {}", report.job_id.cyan());
            println!("Metric:       {}", report.metric);
            println!(
                "Window:       {} .. {}",
                report.window.start.to_rfc3339(),
                report.window.end.to_rfc3339()
            );
            println!("Samples:      {}", report.samples);
            println!("Mean power:   {:.2} W", report.mean_watts);
            println!("Energy:       {}", format_energy(report.joules).green());
            if report.skipped > 0 {
                print_warning(&format!("{} records skipped", report.skipped));
            }
            if let Some(path) = &output {
                print_success(&format!("Raw response saved to {}", path.display()));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(interval: f64) -> PowerQuery {
        PowerQuery {
            endpoint: "http://wattmeter.local/metrics".to_string(),
            job_id: "42".to_string(),
            start: "2024-01-15T10:00:00Z".parse().unwrap(),
            end: "2024-01-15T11:00:00Z".parse().unwrap(),
            metric: "wattmetre_power_watt".to_string(),
            interval,
        }
    }

    #[test]
    fn test_check_query_intervals() {
        assert!(check_query(&query(0.01)).is_ok());
        for secs in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(check_query(&query(secs)).is_err());
        }
    }

    #[test]
    fn test_check_query_window() {
        let mut reversed = query(1.0);
        std::mem::swap(&mut reversed.start, &mut reversed.end);
        assert!(check_query(&reversed).is_err());
    }
}
