//! Normalize the collector logs of a finished run

use anyhow::{bail, Result};
use colored::Colorize;
use runner_lib::config::{FilterMode, NormalizerConfig, ProcessFilter};
use runner_lib::{Normalizer, SourceReport};
use std::path::Path;
use tabled::Tabled;

use crate::output::{color_status, format_total, print_table, print_warning, OutputFormat};

pub struct NormalizeOptions {
    pub filter: String,
    pub exact: bool,
    pub case_sensitive: bool,
    pub iotop_interval: f64,
    pub scaphandre_interval: f64,
}

/// Row for source reports table
#[derive(Tabled)]
struct SourceRow {
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Total")]
    total: String,
    #[tabled(rename = "Records")]
    records: u64,
    #[tabled(rename = "Warnings")]
    warnings: u64,
    #[tabled(rename = "Status")]
    status: String,
}

impl From<&SourceReport> for SourceRow {
    fn from(report: &SourceReport) -> Self {
        Self {
            source: report.source.clone(),
            metric: report.kind.to_string(),
            total: format_total(report.total(), report.kind.unit()),
            records: report.records,
            warnings: report.warnings,
            status: color_status(report.health.status),
        }
    }
}

/// Build the normalizer settings the options describe
pub fn settings(options: &NormalizeOptions) -> Result<(NormalizerConfig, ProcessFilter)> {
    if options.filter.trim().is_empty() {
        bail!("--filter must not be empty");
    }
    let positive = |secs: f64| secs.is_finite() && secs > 0.0;
    if !(positive(options.iotop_interval) && positive(options.scaphandre_interval)) {
        bail!("sample intervals must be positive");
    }

    let mut config = NormalizerConfig::default();
    config.iotop.sample_interval_secs = options.iotop_interval;
    config.scaphandre.sample_interval_secs = options.scaphandre_interval;

    let filter = ProcessFilter {
        token: options.filter.clone(),
        mode: if options.exact {
            FilterMode::ExactToken
        } else {
            FilterMode::Substring
        },
        case_sensitive: options.case_sensitive,
    };
    Ok((config, filter))
}

/// Normalize every log found in `log_dir` and print the per-source totals
pub async fn normalize_logs(log_dir: &Path, options: NormalizeOptions, format: OutputFormat) -> Result<()> {
    if !log_dir.is_dir() {
        bail!("{} is not a directory", log_dir.display());
    }

    let (config, filter) = settings(&options)?;
    let reports = Normalizer::for_log_dir(log_dir, &config, &filter, None)?
        .run()
        .await;

    if let OutputFormat::Table = format {
        println!("{}", format!("Normalized logs in {}", log_dir.display()).bold());
    }
    let rows: Vec<SourceRow> = reports.iter().map(SourceRow::from).collect();
    print_table(rows, &reports, format)?;

    if let OutputFormat::Table = format {
        for report in reports.iter().filter(|r| !r.is_healthy()) {
            print_warning(&format!(
                "{}: {}",
                report.source,
                report.health.message.as_deref().unwrap_or("not healthy")
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(filter: &str) -> NormalizeOptions {
        NormalizeOptions {
            filter: filter.to_string(),
            exact: true,
            case_sensitive: false,
            iotop_interval: 2.0,
            scaphandre_interval: 1.0,
        }
    }

    #[test]
    fn test_settings_from_options() {
        let (config, filter) = settings(&options("chia")).unwrap();
        assert_eq!(config.iotop.sample_interval_secs, 2.0);
        assert_eq!(config.scaphandre.sample_interval_secs, 1.0);
        assert!(config.wattmeter.is_none());
        assert_eq!(filter.mode, FilterMode::ExactToken);
        assert!(filter.matches("/usr/bin/chia plots create"));
    }

    #[test]
    fn test_settings_reject_invalid_intervals() {
        for secs in [0.0, -2.0, f64::NAN, f64::INFINITY] {
            let mut bad_iotop = options("chia");
            bad_iotop.iotop_interval = secs;
            assert!(settings(&bad_iotop).is_err());

            let mut bad_scaphandre = options("chia");
            bad_scaphandre.scaphandre_interval = secs;
            assert!(settings(&bad_scaphandre).is_err());
        }
    }

    #[test]
    fn test_settings_reject_empty_filter() {
        assert!(settings(&options(" ")).is_err());
    }
}
