//! Post-run metric normalization
//!
//! This module turns raw collector logs and the wattmeter API response into
//! [`CanonicalMetric`]s:
//! - [`LogFormat`] parsers, one per raw format, sharing the [`units`] table
//! - [`MetricSource`]s that fetch the raw input (file or HTTP) and never fail
//!   the run: a broken source yields a zero total, a warning and a non-healthy
//!   status
//! - [`Normalizer`], which runs all configured sources in parallel

mod iotop;
mod pidstat;
mod scaphandre;
pub mod units;
mod wattmeter;

pub use iotop::IotopFormat;
pub use pidstat::PidstatFormat;
pub use scaphandre::{ScaphandreHostFormat, ScaphandreProcessFormat};
pub use wattmeter::{parse_response, WattmeterClient, WattmeterSource};

use crate::config::{ExperimentConfig, NormalizerConfig, ProcessFilter};
use crate::error::Result;
use crate::health::{ComponentHealth, ComponentStatus};
use crate::models::{CanonicalMetric, MetricKind, TimeWindow};
use crate::observability::RunMetrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Result of parsing one raw input
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutcome {
    pub metrics: Vec<CanonicalMetric>,
    /// Records that were skipped as unparsable
    pub warnings: u64,
    /// Records that parsed, whether or not they matched the process filter
    pub records: u64,
}

impl ParseOutcome {
    pub fn total(&self, kind: MetricKind) -> f64 {
        self.metrics
            .iter()
            .filter(|m| m.kind == kind)
            .map(|m| m.value)
            .sum()
    }

    pub(crate) fn skip(&mut self, source: &str, line: usize, reason: &str) {
        self.warnings += 1;
        debug!(source = %source, line = line, reason = %reason, "Skipping unparsable record");
    }
}

/// A raw telemetry format
pub trait LogFormat: Send + Sync {
    /// Name of the source this format produces metrics for
    fn source(&self) -> &str;

    /// The metric this format aggregates into
    fn kind(&self) -> MetricKind;

    fn parse(&self, content: &str) -> ParseOutcome;
}

/// Normalized output of one source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceReport {
    pub source: String,
    pub kind: MetricKind,
    pub metrics: Vec<CanonicalMetric>,
    pub warnings: u64,
    pub records: u64,
    pub health: ComponentHealth,
}

impl SourceReport {
    /// Report for a source that could not be read at all
    pub fn failed(source: impl Into<String>, kind: MetricKind, reason: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            metrics: vec![CanonicalMetric::new(source.clone(), kind, 0.0)],
            source,
            kind,
            warnings: 1,
            records: 0,
            health: ComponentHealth::unhealthy(reason),
        }
    }

    pub fn from_outcome(source: impl Into<String>, kind: MetricKind, outcome: ParseOutcome) -> Self {
        let health = match (outcome.records, outcome.warnings) {
            (0, 0) => ComponentHealth::degraded("no data records"),
            (0, n) => ComponentHealth::unhealthy(format!("all {} records were unparsable", n)),
            _ => ComponentHealth::healthy(),
        };

        Self {
            source: source.into(),
            kind,
            metrics: outcome.metrics,
            warnings: outcome.warnings,
            records: outcome.records,
            health,
        }
    }

    pub fn total(&self) -> f64 {
        self.metrics
            .iter()
            .filter(|m| m.kind == self.kind)
            .map(|m| m.value)
            .sum()
    }

    pub fn is_healthy(&self) -> bool {
        self.health.status == ComponentStatus::Healthy
    }
}

/// Somewhere canonical metrics can be collected from after a run
#[async_trait]
pub trait MetricSource: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> MetricKind;

    /// Never fails: problems are reflected in the report's health
    async fn collect(&self) -> SourceReport;
}

/// A log file read from disk and parsed with a [`LogFormat`]
pub struct FileSource<F> {
    path: PathBuf,
    format: F,
}

impl<F: LogFormat> FileSource<F> {
    pub fn new(path: impl Into<PathBuf>, format: F) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }
}

#[async_trait]
impl<F: LogFormat + 'static> MetricSource for FileSource<F> {
    fn name(&self) -> &str {
        self.format.source()
    }

    fn kind(&self) -> MetricKind {
        self.format.kind()
    }

    async fn collect(&self) -> SourceReport {
        let source = self.format.source();
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) => {
                return SourceReport::failed(
                    source,
                    self.kind(),
                    format!("cannot read {}: {}", self.path.display(), e),
                )
            }
        };

        if content.trim().is_empty() {
            return SourceReport::failed(
                source,
                self.kind(),
                format!("{} is empty", self.path.display()),
            );
        }

        SourceReport::from_outcome(source, self.kind(), self.format.parse(&content))
    }
}

/// Runs every configured metric source and gathers their reports
pub struct Normalizer {
    sources: Vec<Arc<dyn MetricSource>>,
    metrics: RunMetrics,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            metrics: RunMetrics::new(),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn MetricSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Build the sources enabled in `config`, reading logs from its log
    /// directory. `window` is the run's own time span, used by the wattmeter
    /// when no explicit query window is configured.
    pub fn from_config(config: &ExperimentConfig, window: Option<TimeWindow>) -> Result<Self> {
        Self::for_log_dir(
            &config.log_dir,
            &config.normalizer,
            &config.process_filter,
            window,
        )
    }

    /// Build the sources enabled in `settings` over the logs in `log_dir`
    pub fn for_log_dir(
        log_dir: &Path,
        settings: &NormalizerConfig,
        filter: &ProcessFilter,
        window: Option<TimeWindow>,
    ) -> Result<Self> {
        let mut normalizer = Self::new();

        if settings.pidstat.enabled {
            normalizer = normalizer.with_source(Arc::new(FileSource::new(
                log_dir.join(&settings.pidstat.file),
                PidstatFormat::new(&settings.pidstat, filter.clone()),
            )));
        }
        if settings.iotop.enabled {
            normalizer = normalizer.with_source(Arc::new(FileSource::new(
                log_dir.join(&settings.iotop.file),
                IotopFormat::new(&settings.iotop, filter.clone()),
            )));
        }
        if settings.scaphandre.enabled {
            let path = log_dir.join(&settings.scaphandre.file);
            normalizer = normalizer
                .with_source(Arc::new(FileSource::new(
                    path.clone(),
                    ScaphandreHostFormat::new(&settings.scaphandre),
                )))
                .with_source(Arc::new(FileSource::new(
                    path,
                    ScaphandreProcessFormat::new(&settings.scaphandre, filter.clone()),
                )));
        }
        if let Some(wattmeter) = &settings.wattmeter {
            let client = WattmeterClient::new(wattmeter.clone())?;
            let source = WattmeterSource::new(client, window)
                .save_response_to(log_dir.join(&wattmeter.response_file));
            normalizer = normalizer.with_source(Arc::new(source));
        }

        Ok(normalizer)
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    /// Collect every source concurrently; reports come back in source order
    pub async fn run(&self) -> Vec<SourceReport> {
        let mut set = JoinSet::new();
        for (index, source) in self.sources.iter().cloned().enumerate() {
            set.spawn(async move { (index, source.collect().await) });
        }

        let mut reports: Vec<Option<SourceReport>> = vec![None; self.sources.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, report)) => reports[index] = Some(report),
                Err(e) => warn!(error = %e, "Metric source task failed"),
            }
        }

        let reports: Vec<SourceReport> = reports
            .into_iter()
            .zip(&self.sources)
            .map(|(report, source)| {
                report.unwrap_or_else(|| {
                    SourceReport::failed(source.name(), source.kind(), "collection task panicked")
                })
            })
            .collect();

        for report in &reports {
            if report.warnings > 0 {
                self.metrics.add_parse_warnings(&report.source, report.warnings);
            }
            if report.is_healthy() {
                info!(
                    source = %report.source,
                    total = report.total(),
                    unit = %report.kind.unit(),
                    warnings = report.warnings,
                    "Source normalized"
                );
            } else {
                self.metrics.inc_degraded_sources(&report.source);
                warn!(
                    source = %report.source,
                    status = %report.health.status,
                    reason = report.health.message.as_deref().unwrap_or(""),
                    "Source degraded"
                );
            }
        }

        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PidstatConfig, ProcessFilter, ScaphandreConfig};

    const PIDSTAT_LOG: &str = "\
Linux 6.1.0 (farmer)  01/15/2024  _x86_64_  (16 CPU)

# Time        UID       PID   kB_rd/s   kB_wr/s kB_ccwr/s iodelay  Command
12:00:01     1000      4242      0.00  102400.00      0.00       0  chia
12:00:02     1000      4242      0.00  102400.00      0.00       0  chia
";

    #[tokio::test]
    async fn test_file_source_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSource::new(
            dir.path().join("scaphandre.json"),
            ScaphandreHostFormat::new(&ScaphandreConfig::default()),
        );

        let report = source.collect().await;

        assert_eq!(report.source, "scaphandre_host");
        assert_eq!(report.total(), 0.0);
        assert_eq!(report.warnings, 1);
        assert_eq!(report.health.status, ComponentStatus::Unhealthy);
        assert_eq!(report.metrics.len(), 1);
    }

    #[tokio::test]
    async fn test_file_source_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pidstat.log");
        std::fs::write(&path, "\n\n").unwrap();

        let source = FileSource::new(
            &path,
            PidstatFormat::new(&PidstatConfig::default(), ProcessFilter::new("chia")),
        );
        let report = source.collect().await;

        assert_eq!(report.total(), 0.0);
        assert_eq!(report.warnings, 1);
        assert!(!report.is_healthy());
    }

    #[tokio::test]
    async fn test_normalizer_keeps_source_order() {
        let dir = tempfile::tempdir().unwrap();
        let pidstat_path = dir.path().join("pidstat.log");
        std::fs::write(&pidstat_path, PIDSTAT_LOG).unwrap();

        let normalizer = Normalizer::new()
            .with_source(Arc::new(FileSource::new(
                dir.path().join("missing.json"),
                ScaphandreHostFormat::new(&ScaphandreConfig::default()),
            )))
            .with_source(Arc::new(FileSource::new(
                &pidstat_path,
                PidstatFormat::new(&PidstatConfig::default(), ProcessFilter::new("chia")),
            )));

        assert_eq!(normalizer.source_names(), ["scaphandre_host", "pidstat"]);

        let reports = normalizer.run().await;
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].source, "scaphandre_host");
        assert!(!reports[0].is_healthy());
        assert_eq!(reports[1].source, "pidstat");
        assert!(reports[1].is_healthy());
        assert_eq!(reports[1].total(), 204800.0 * 1024.0);
    }

    #[test]
    fn test_report_health_from_outcome() {
        let headers_only = ParseOutcome {
            metrics: vec![CanonicalMetric::new("iotop", MetricKind::BytesWritten, 0.0)],
            warnings: 0,
            records: 0,
        };
        let report = SourceReport::from_outcome("iotop", MetricKind::BytesWritten, headers_only);
        assert_eq!(report.health.status, ComponentStatus::Degraded);

        let garbage = ParseOutcome {
            metrics: vec![],
            warnings: 4,
            records: 0,
        };
        let report = SourceReport::from_outcome("iotop", MetricKind::BytesWritten, garbage);
        assert_eq!(report.health.status, ComponentStatus::Unhealthy);
    }
}
