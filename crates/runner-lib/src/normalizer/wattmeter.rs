//! External wattmeter metrics API
//!
//! The API is queried once per run for the experiment's time window:
//!
//! ```text
//! GET <endpoint>?job_id=<id>&start_time=<rfc3339>&end_time=<rfc3339>&metrics=<name>
//! ```
//!
//! and answers with a JSON array of records, either keyed by metric name
//! (`{"timestamp": ..., "wattmetre_power_watt": 98.5}`) or in long form
//! (`{"timestamp": ..., "metric_id": "wattmetre_power_watt", "value": 98.5}`).

use super::units::{integrate_power, PowerSample};
use super::{MetricSource, SourceReport};
use crate::config::{IntegrationMode, WattmeterConfig};
use crate::error::{Result, RunnerError};
use crate::health::ComponentHealth;
use crate::models::{CanonicalMetric, MetricKind, TimeWindow};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use url::Url;

const SOURCE: &str = "wattmeter";

/// HTTP client for the wattmeter API
pub struct WattmeterClient {
    http: reqwest::Client,
    config: WattmeterConfig,
}

impl WattmeterClient {
    pub fn new(config: WattmeterConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &WattmeterConfig {
        &self.config
    }

    /// Query window: configured bounds override the run's own window
    pub fn window(&self, run_window: Option<TimeWindow>) -> Option<TimeWindow> {
        match (self.config.start_time, self.config.end_time, run_window) {
            (Some(start), Some(end), _) => Some(TimeWindow { start, end }),
            (start, end, Some(run)) => Some(TimeWindow {
                start: start.unwrap_or(run.start),
                end: end.unwrap_or(run.end),
            }),
            _ => None,
        }
    }

    /// Build the request URL with every parameter form-encoded
    pub fn request_url(&self, window: &TimeWindow) -> Result<Url> {
        let mut url = Url::parse(&self.config.endpoint)
            .map_err(|e| RunnerError::Config(format!("invalid wattmeter endpoint: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("job_id", &self.config.job_id)
            .append_pair(
                "start_time",
                &window.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            )
            .append_pair(
                "end_time",
                &window.end.to_rfc3339_opts(SecondsFormat::Secs, true),
            )
            .append_pair("metrics", &self.config.metric);
        Ok(url)
    }

    /// One request; non-2xx answers become [`RunnerError::Http`]
    pub async fn fetch(&self, window: &TimeWindow) -> Result<String> {
        let url = self.request_url(window)?;
        debug!(url = %url, "Querying wattmeter API");

        let response = self.http.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(RunnerError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    /// Fetch with exponential backoff on transient failures
    pub async fn fetch_with_retry(&self, window: &TimeWindow) -> Result<String> {
        let attempts = self.config.max_attempts.max(1);
        let mut backoff = self.config.initial_backoff();

        let mut attempt = 1;
        loop {
            match self.fetch(window).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(
                        error = %e,
                        attempt = attempt,
                        next_backoff_ms = backoff.as_millis() as u64,
                        "Wattmeter request failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, self.config.max_backoff());
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn parse_timestamp(value: &Value) -> Option<f64> {
    if let Some(secs) = value.as_f64() {
        return Some(secs);
    }
    let text = value.as_str()?;
    let parsed = DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").map(|naive| naive.and_utc())
        })
        .ok()?;
    Some(parsed.timestamp_millis() as f64 / 1000.0)
}

fn record_value(record: &Value, metric: &str) -> Option<f64> {
    if let Some(value) = record.get(metric).and_then(Value::as_f64) {
        return Some(value);
    }
    match record.get("metric_id").and_then(Value::as_str) {
        Some(id) if id == metric => record.get("value").and_then(Value::as_f64),
        _ => None,
    }
}

/// Extract power samples for `metric` from an API response body.
///
/// Returns the samples and the number of skipped records. A body that is
/// not a JSON array is an error.
pub fn parse_response(body: &str, metric: &str) -> Result<(Vec<PowerSample>, u64)> {
    let records = match serde_json::from_str::<Value>(body)? {
        Value::Array(records) => records,
        other => {
            return Err(RunnerError::Parse(format!(
                "expected a JSON array of records, got {}",
                match other {
                    Value::Object(_) => "an object",
                    _ => "a scalar",
                }
            )))
        }
    };

    let mut samples = Vec::with_capacity(records.len());
    let mut skipped = 0;
    for record in &records {
        let Some(watts) = record_value(record, metric).filter(|w| w.is_finite()) else {
            skipped += 1;
            continue;
        };
        samples.push(match record.get("timestamp").and_then(parse_timestamp) {
            Some(ts) => PowerSample::at(ts, watts),
            None => PowerSample::new(watts),
        });
    }

    Ok((samples, skipped))
}

/// Wattmeter energy over the run, as a [`MetricSource`]
pub struct WattmeterSource {
    client: WattmeterClient,
    run_window: Option<TimeWindow>,
    response_path: Option<PathBuf>,
}

impl WattmeterSource {
    pub fn new(client: WattmeterClient, run_window: Option<TimeWindow>) -> Self {
        Self {
            client,
            run_window,
            response_path: None,
        }
    }

    /// Keep the raw response body next to the collector logs
    pub fn save_response_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.response_path = Some(path.into());
        self
    }
}

#[async_trait]
impl MetricSource for WattmeterSource {
    fn name(&self) -> &str {
        SOURCE
    }

    fn kind(&self) -> MetricKind {
        MetricKind::EnergyJoules
    }

    async fn collect(&self) -> SourceReport {
        let Some(window) = self.client.window(self.run_window) else {
            return SourceReport::failed(SOURCE, self.kind(), "no time window to query");
        };

        let body = match self.client.fetch_with_retry(&window).await {
            Ok(body) => body,
            Err(e) => {
                return SourceReport::failed(SOURCE, self.kind(), format!("wattmeter API: {}", e))
            }
        };

        if let Some(path) = &self.response_path {
            match tokio::fs::write(path, &body).await {
                Ok(()) => debug!(path = %path.display(), "Saved wattmeter response"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to save wattmeter response"),
            }
        }

        let (samples, skipped) = match parse_response(&body, &self.client.config().metric) {
            Ok(parsed) => parsed,
            Err(e) => {
                return SourceReport::failed(SOURCE, self.kind(), format!("bad wattmeter response: {}", e))
            }
        };

        let joules = integrate_power(
            &samples,
            IntegrationMode::FixedInterval,
            self.client.config().sample_interval(),
        );
        info!(samples = samples.len(), skipped = skipped, joules = joules, "Wattmeter data fetched");

        let mut report = SourceReport {
            source: SOURCE.to_string(),
            kind: self.kind(),
            metrics: vec![CanonicalMetric::new(SOURCE, MetricKind::EnergyJoules, joules).with_window(window)],
            warnings: skipped,
            records: samples.len() as u64,
            health: ComponentHealth::healthy(),
        };
        if samples.is_empty() {
            report.health = if skipped > 0 {
                ComponentHealth::unhealthy(format!("all {} records were unusable", skipped))
            } else {
                ComponentHealth::degraded("no samples in the queried window")
            };
        }
        report
    }
}
