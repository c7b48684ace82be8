//! Observability infrastructure for the experiment runner
//!
//! Provides:
//! - Prometheus counters for restarts, parse warnings and poll latency,
//!   dumped to a textfile at the end of a run
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter_vec, register_int_gauge, Encoder, Histogram,
    IntCounterVec, IntGauge, TextEncoder,
};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for poll-cycle latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<RunMetricsInner> = OnceLock::new();

struct RunMetricsInner {
    collector_restarts: IntCounterVec,
    parse_warnings: IntCounterVec,
    degraded_sources: IntCounterVec,
    live_collectors: IntGauge,
    poll_latency_seconds: Histogram,
}

impl RunMetricsInner {
    fn new() -> Self {
        Self {
            collector_restarts: register_int_counter_vec!(
                "wearwatch_collector_restarts_total",
                "Number of times a collector was restarted after dying",
                &["collector"]
            )
            .expect("Failed to register collector_restarts"),

            parse_warnings: register_int_counter_vec!(
                "wearwatch_parse_warnings_total",
                "Records skipped while normalizing a telemetry source",
                &["source"]
            )
            .expect("Failed to register parse_warnings"),

            degraded_sources: register_int_counter_vec!(
                "wearwatch_degraded_sources_total",
                "Telemetry sources that produced no usable data",
                &["source"]
            )
            .expect("Failed to register degraded_sources"),

            live_collectors: register_int_gauge!(
                "wearwatch_live_collectors",
                "Collectors alive at the last supervision poll"
            )
            .expect("Failed to register live_collectors"),

            poll_latency_seconds: register_histogram!(
                "wearwatch_poll_latency_seconds",
                "Time spent in one supervision poll",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register poll_latency_seconds"),
        }
    }
}

/// Handle to the run's Prometheus metrics.
///
/// Clones share the same underlying global metrics.
#[derive(Clone)]
pub struct RunMetrics {
    _private: (),
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RunMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(RunMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &RunMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn inc_collector_restarts(&self, collector: &str) {
        self.inner()
            .collector_restarts
            .with_label_values(&[collector])
            .inc();
    }

    pub fn add_parse_warnings(&self, source: &str, count: u64) {
        self.inner()
            .parse_warnings
            .with_label_values(&[source])
            .inc_by(count);
    }

    pub fn inc_degraded_sources(&self, source: &str) {
        self.inner()
            .degraded_sources
            .with_label_values(&[source])
            .inc();
    }

    pub fn set_live_collectors(&self, count: i64) {
        self.inner().live_collectors.set(count);
    }

    pub fn observe_poll_latency(&self, duration_secs: f64) {
        self.inner().poll_latency_seconds.observe(duration_secs);
    }

    /// Render all registered metrics in the Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Write the metrics for a node-exporter textfile collector
    pub fn write_textfile(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.render())
    }
}

/// Structured logger for run lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    host: String,
}

impl StructuredLogger {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    pub fn log_startup(&self, version: &str, workload: &str, collectors: usize) {
        info!(
            event = "run_started",
            host = %self.host,
            version = %version,
            workload = %workload,
            collectors = collectors,
            "Experiment run started"
        );
    }

    pub fn log_start_failure(&self, collector: &str, error: &str) {
        warn!(
            event = "collector_start_failed",
            host = %self.host,
            collector = %collector,
            error = %error,
            "Collector could not be started and will not be supervised"
        );
    }

    pub fn log_workload_finished(&self, state: &str, exit_code: Option<i32>, duration_secs: f64) {
        info!(
            event = "workload_finished",
            host = %self.host,
            state = %state,
            exit_code = ?exit_code,
            duration_secs = duration_secs,
            "Workload finished"
        );
    }

    pub fn log_source_degraded(&self, source: &str, reason: &str) {
        warn!(
            event = "source_degraded",
            host = %self.host,
            source = %source,
            reason = %reason,
            "Telemetry source degraded"
        );
    }

    pub fn log_summary(&self, warning_count: u64, exit_code: i32, duration_secs: f64) {
        if exit_code == 0 {
            info!(
                event = "run_summary",
                host = %self.host,
                warnings = warning_count,
                exit_code = exit_code,
                duration_secs = duration_secs,
                "Experiment completed"
            );
        } else {
            warn!(
                event = "run_summary",
                host = %self.host,
                warnings = warning_count,
                exit_code = exit_code,
                duration_secs = duration_secs,
                "Experiment completed with degraded sources"
            );
        }
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "run_shutdown",
            host = %self.host,
            reason = %reason,
            "Shutting down collectors"
        );
    }
}
