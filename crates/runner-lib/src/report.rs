//! Experiment summary
//!
//! Combines the run outcome (workload, collectors, disk counters) with the
//! normalized source reports into one [`ExperimentSummary`], which decides
//! the run's exit code and renders as text or JSON.

use crate::experiment::RunOutcome;
use crate::health::{compute_status, ComponentHealth, ComponentStatus};
use crate::launcher::WorkloadState;
use crate::models::{CanonicalUnit, CounterDelta, CounterWarning, MetricKind, TimeWindow};
use crate::normalizer::units::{bytes_to_gib, bytes_to_mib, joules_to_watt_hours};
use crate::normalizer::SourceReport;
use crate::sampler;
use crate::supervisor::{CollectorReport, StartFailure};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// Source name of the block-device counter metrics
pub const DISK_SOURCE: &str = "diskstats";

/// Process exit codes of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunExit {
    Success,
    ConfigError,
    StartFailure,
    /// Completed, but some source or collector did not fully work
    Degraded,
}

impl RunExit {
    pub fn code(self) -> i32 {
        match self {
            RunExit::Success => 0,
            RunExit::ConfigError => 1,
            RunExit::StartFailure => 2,
            RunExit::Degraded => 3,
        }
    }
}

/// One row of the summary: the total of one metric from one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub source: String,
    pub kind: MetricKind,
    pub total: f64,
    pub unit: CanonicalUnit,
    pub warnings: u64,
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<TimeWindow>,
}

impl SourceSummary {
    fn from_report(report: &SourceReport) -> Self {
        Self {
            source: report.source.clone(),
            kind: report.kind,
            total: report.total(),
            unit: report.kind.unit(),
            warnings: report.warnings,
            status: report.health.status,
            reason: report.health.message.clone(),
            window: report.metrics.iter().find_map(|m| m.window),
        }
    }

    /// Total in the unit people read: MiB/GiB for bytes, Wh for energy
    pub fn derived(&self) -> String {
        match self.kind {
            MetricKind::BytesWritten => format!(
                "{:.2} MiB / {:.3} GiB",
                bytes_to_mib(self.total),
                bytes_to_gib(self.total)
            ),
            MetricKind::EnergyJoules => format!("{:.3} Wh", joules_to_watt_hours(self.total)),
            MetricKind::OpCount => format!("{:.0} ops", self.total),
        }
    }
}

/// Final report of one experiment run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSummary {
    pub device: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
    pub workload_state: WorkloadState,
    pub workload_exit_code: Option<i32>,
    pub interrupted: bool,
    pub counter_delta: Option<CounterDelta>,
    pub counter_warnings: Vec<CounterWarning>,
    pub disk_status: ComponentHealth,
    pub sources: Vec<SourceSummary>,
    pub collectors: Vec<CollectorReport>,
    pub start_failures: Vec<StartFailure>,
    pub warning_count: u64,
    pub status: ComponentStatus,
    pub exit: RunExit,
    pub exit_code: i32,
}

impl ExperimentSummary {
    /// Restart counts in collector registration order
    pub fn restart_counts(&self) -> Vec<(&str, u32)> {
        self.collectors
            .iter()
            .map(|c| (c.name.as_str(), c.restart_count))
            .collect()
    }

    pub fn source(&self, source: &str, kind: MetricKind) -> Option<&SourceSummary> {
        self.sources
            .iter()
            .find(|s| s.source == source && s.kind == kind)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let json = self.to_json().map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Human-readable report; every source is listed, non-healthy ones flagged
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let exit = self
            .workload_exit_code
            .map(|code| format!(" (exit {})", code))
            .unwrap_or_default();

        out.push_str("Experiment summary\n");
        out.push_str(&format!(
            "  workload   {}{} after {:.1} s{}\n",
            self.workload_state,
            exit,
            self.duration_seconds,
            if self.interrupted { ", interrupted" } else { "" }
        ));
        out.push_str(&format!("  device     {}\n", self.device));
        out.push_str(&format!(
            "  status     {} ({} warnings, exit code {})\n\n",
            self.status, self.warning_count, self.exit_code
        ));

        let rows: Vec<SourceRow> = self.sources.iter().map(SourceRow::from).collect();
        out.push_str(&Table::new(rows).with(Style::sharp()).to_string());
        out.push('\n');

        if !self.collectors.is_empty() {
            let rows: Vec<CollectorRow> = self.collectors.iter().map(CollectorRow::from).collect();
            out.push('\n');
            out.push_str(&Table::new(rows).with(Style::sharp()).to_string());
            out.push('\n');
        }

        for warning in &self.counter_warnings {
            out.push_str(&format!("  warning: {}\n", warning));
        }
        for failure in &self.start_failures {
            out.push_str(&format!(
                "  collector '{}' failed to start: {}\n",
                failure.collector, failure.error
            ));
        }
        out
    }
}

#[derive(Tabled)]
struct SourceRow {
    #[tabled(rename = "SOURCE")]
    source: String,
    #[tabled(rename = "METRIC")]
    metric: String,
    #[tabled(rename = "TOTAL")]
    total: String,
    #[tabled(rename = "DERIVED")]
    derived: String,
    #[tabled(rename = "WARNINGS")]
    warnings: u64,
    #[tabled(rename = "STATUS")]
    status: String,
}

impl From<&SourceSummary> for SourceRow {
    fn from(s: &SourceSummary) -> Self {
        let status = match (&s.status, &s.reason) {
            (ComponentStatus::Healthy, _) => "ok".to_string(),
            (status, Some(reason)) => format!("{}: {}", status.to_string().to_uppercase(), reason),
            (status, None) => status.to_string().to_uppercase(),
        };
        Self {
            source: s.source.clone(),
            metric: s.kind.to_string(),
            total: format!("{:.0} {}", s.total, s.unit),
            derived: s.derived(),
            warnings: s.warnings,
            status,
        }
    }
}

#[derive(Tabled)]
struct CollectorRow {
    #[tabled(rename = "COLLECTOR")]
    name: String,
    #[tabled(rename = "RESTARTS")]
    restarts: u32,
    #[tabled(rename = "STATUS")]
    status: String,
}

impl From<&CollectorReport> for CollectorRow {
    fn from(c: &CollectorReport) -> Self {
        Self {
            name: c.name.clone(),
            restarts: c.restart_count,
            status: if c.fatal_at_start {
                "FAILED AT START".to_string()
            } else {
                c.status.to_string()
            },
        }
    }
}

/// Builds the [`ExperimentSummary`]
pub struct SummaryReporter;

impl SummaryReporter {
    pub fn build(outcome: &RunOutcome, reports: &[SourceReport]) -> ExperimentSummary {
        let (counter_delta, counter_warnings, disk_status, disk_window) =
            match (&outcome.initial_snapshot, &outcome.final_snapshot) {
                (Ok(initial), Ok(last)) => {
                    let (delta, warnings) = sampler::delta(initial, last);
                    let health = if warnings.is_empty() {
                        ComponentHealth::healthy()
                    } else {
                        ComponentHealth::degraded(format!("{} counter(s) went backwards", warnings.len()))
                    };
                    let window = TimeWindow {
                        start: initial.timestamp,
                        end: last.timestamp,
                    };
                    (Some(delta), warnings, health, Some(window))
                }
                (Err(reason), _) | (_, Err(reason)) => {
                    (None, Vec::new(), ComponentHealth::unhealthy(reason.clone()), None)
                }
            };

        let disk_row = |kind: MetricKind, total: f64, warnings: u64| SourceSummary {
            source: DISK_SOURCE.to_string(),
            kind,
            total,
            unit: kind.unit(),
            warnings,
            status: disk_status.status,
            reason: disk_status.message.clone(),
            window: disk_window,
        };
        let bytes = counter_delta.map_or(0.0, |d| d.bytes_written() as f64);
        let ops = counter_delta.map_or(0.0, |d| d.writes_delta.max(0) as f64);

        let mut sources = vec![
            disk_row(MetricKind::BytesWritten, bytes, counter_warnings.len() as u64),
            disk_row(MetricKind::OpCount, ops, 0),
        ];
        sources.extend(reports.iter().map(SourceSummary::from_report));

        let warning_count = reports.iter().map(|r| r.warnings).sum::<u64>()
            + counter_warnings.len() as u64
            + outcome.start_failures.len() as u64;

        let mut status =
            compute_status(std::iter::once(&disk_status).chain(reports.iter().map(|r| &r.health)));
        if status == ComponentStatus::Healthy && !outcome.start_failures.is_empty() {
            status = ComponentStatus::Degraded;
        }
        let exit = if status == ComponentStatus::Healthy {
            RunExit::Success
        } else {
            RunExit::Degraded
        };

        ExperimentSummary {
            device: outcome.device.clone(),
            started_at: outcome.started_at,
            ended_at: outcome.ended_at,
            duration_seconds: outcome.duration_seconds,
            workload_state: outcome.workload_state,
            workload_exit_code: outcome.workload_exit_code,
            interrupted: outcome.interrupted,
            counter_delta,
            counter_warnings,
            disk_status,
            sources,
            collectors: outcome.collectors.clone(),
            start_failures: outcome.start_failures.clone(),
            warning_count,
            status,
            exit,
            exit_code: exit.code(),
        }
    }
}
