//! Show a saved run summary

use anyhow::{Context, Result};
use colored::Colorize;
use runner_lib::report::SourceSummary;
use runner_lib::ExperimentSummary;
use std::path::{Path, PathBuf};
use tabled::Tabled;

use crate::output::{
    color_exit_code, color_status, format_total, print_info, print_table, print_warning, OutputFormat,
};

const SUMMARY_FILE: &str = "summary.json";

/// Row for summary sources table
#[derive(Tabled)]
struct SourceRow {
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Total")]
    total: String,
    #[tabled(rename = "Warnings")]
    warnings: u64,
    #[tabled(rename = "Status")]
    status: String,
}

impl From<&SourceSummary> for SourceRow {
    fn from(s: &SourceSummary) -> Self {
        Self {
            source: s.source.clone(),
            metric: s.kind.to_string(),
            total: format_total(s.total, s.unit),
            warnings: s.warnings,
            status: color_status(s.status),
        }
    }
}

/// Row for collectors table
#[derive(Tabled)]
struct CollectorRow {
    #[tabled(rename = "Collector")]
    name: String,
    #[tabled(rename = "Restarts")]
    restarts: u32,
    #[tabled(rename = "Final State")]
    status: String,
}

/// A summary file, or the log directory holding one
pub fn summary_path(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(SUMMARY_FILE)
    } else {
        path.to_path_buf()
    }
}

pub fn load_summary(path: &Path) -> Result<ExperimentSummary> {
    let path = summary_path(path);
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    ExperimentSummary::from_json(&json).with_context(|| format!("{} is not a run summary", path.display()))
}

pub fn show_summary(path: &Path, format: OutputFormat) -> Result<()> {
    let summary = load_summary(path)?;

    if let OutputFormat::Json = format {
        println!("{}", summary.to_json()?);
        return Ok(());
    }

    println!("{}", "Experiment Summary".bold());
    println!("{}", "=".repeat(60));
    println!("Device:      {}", summary.device.cyan());
    println!(
        "Workload:    {} after {:.1} s{}",
        summary.workload_state,
        summary.duration_seconds,
        summary
            .workload_exit_code
            .map(|code| format!(" (exit {})", code))
            .unwrap_or_default()
    );
    if let Some(started) = summary.started_at {
        println!("Started:     {}", started.format("%Y-%m-%d %H:%M:%S"));
    }
    println!("Status:      {}", color_status(summary.status));
    println!("Warnings:    {}", summary.warning_count);
    println!("Exit code:   {}", color_exit_code(summary.exit_code));
    println!();

    let rows: Vec<SourceRow> = summary.sources.iter().map(SourceRow::from).collect();
    print_table(rows, &summary.sources, format)?;

    if !summary.collectors.is_empty() {
        println!();
        let rows: Vec<CollectorRow> = summary
            .collectors
            .iter()
            .map(|c| CollectorRow {
                name: c.name.clone(),
                restarts: c.restart_count,
                status: if c.fatal_at_start {
                    "failed at start".red().to_string()
                } else {
                    c.status.to_string()
                },
            })
            .collect();
        print_table(rows, &summary.collectors, format)?;
    }

    for source in summary.sources.iter().filter(|s| s.reason.is_some()) {
        print_warning(&format!(
            "{} ({}): {}",
            source.source,
            source.kind,
            source.reason.as_deref().unwrap_or_default()
        ));
    }
    if summary.interrupted {
        print_info("The run was interrupted before the workload finished");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_path_for_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(summary_path(dir.path()), dir.path().join("summary.json"));

        let file = dir.path().join("other.json");
        assert_eq!(summary_path(&file), file);
    }

    #[test]
    fn test_load_rejects_non_summary() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("summary.json"), r#"{"hello": "world"}"#).unwrap();
        assert!(load_summary(dir.path()).is_err());
    }
}
