//! Scaphandre JSON exporter output
//!
//! Each record is one sampling step:
//!
//! ```json
//! {"host": {"consumption": 100000000.0, "timestamp": 1700000000.5},
//!  "consumers": [{"exe": "/usr/bin/chia", "cmdline": "chia plots create", "consumption": 2000000.0}]}
//! ```
//!
//! The file may hold newline-delimited records or one JSON array. Host-level
//! and process-level energy are reported as two separate sources; process
//! consumers may also be given as a `{"name": consumption}` map.

use super::units::{integrate_power, PowerSample, RawUnit};
use super::{LogFormat, ParseOutcome};
use crate::config::{IntegrationMode, ProcessFilter, ScaphandreConfig};
use crate::models::{CanonicalMetric, MetricKind, TimeWindow};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

const HOST_SOURCE: &str = "scaphandre_host";
const PROCESS_SOURCE: &str = "scaphandre_process";

/// Split the content into records, counting lines that are not valid JSON
fn records(content: &str, source: &str, outcome: &mut ParseOutcome) -> Vec<Value> {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Array(items)) => return items,
        Ok(value @ Value::Object(_)) => return vec![value],
        _ => {}
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(index, line)| match serde_json::from_str::<Value>(line) {
            Ok(value) => Some(value),
            Err(_) => {
                outcome.skip(source, index + 1, "invalid JSON record");
                None
            }
        })
        .collect()
}

fn window_of(samples: &[PowerSample]) -> Option<TimeWindow> {
    let mut stamps = samples.iter().filter_map(|s| s.timestamp);
    let first = stamps.next()?;
    let last = stamps.last().unwrap_or(first);
    let to_utc = |secs: f64| DateTime::<Utc>::from_timestamp_millis((secs * 1000.0) as i64);
    Some(TimeWindow {
        start: to_utc(first)?,
        end: to_utc(last)?,
    })
}

fn energy_metric(source: &str, samples: &[PowerSample], mode: IntegrationMode, interval: Duration) -> CanonicalMetric {
    let metric = CanonicalMetric::new(
        source,
        MetricKind::EnergyJoules,
        integrate_power(samples, mode, interval),
    );
    match window_of(samples) {
        Some(window) => metric.with_window(window),
        None => metric,
    }
}

/// Whole-host energy from `host.consumption`
pub struct ScaphandreHostFormat {
    unit: RawUnit,
    mode: IntegrationMode,
    interval: Duration,
}

impl ScaphandreHostFormat {
    pub fn new(config: &ScaphandreConfig) -> Self {
        Self {
            unit: config.power_unit.into(),
            mode: config.host_integration,
            interval: config.sample_interval(),
        }
    }
}

impl LogFormat for ScaphandreHostFormat {
    fn source(&self) -> &str {
        HOST_SOURCE
    }

    fn kind(&self) -> MetricKind {
        MetricKind::EnergyJoules
    }

    fn parse(&self, content: &str) -> ParseOutcome {
        let mut outcome = ParseOutcome::default();
        let mut samples = Vec::new();

        for (index, record) in records(content, HOST_SOURCE, &mut outcome).iter().enumerate() {
            let host = record.get("host");
            let Some(consumption) = host.and_then(|h| h.get("consumption")).and_then(Value::as_f64) else {
                outcome.skip(HOST_SOURCE, index + 1, "record has no host consumption");
                continue;
            };

            outcome.records += 1;
            let watts = self.unit.to_canonical(consumption);
            samples.push(match host.and_then(|h| h.get("timestamp")).and_then(Value::as_f64) {
                Some(ts) => PowerSample::at(ts, watts),
                None => PowerSample::new(watts),
            });
        }

        outcome
            .metrics
            .push(energy_metric(HOST_SOURCE, &samples, self.mode, self.interval));
        outcome
    }
}

/// Energy of the workload's processes from `consumers`
pub struct ScaphandreProcessFormat {
    filter: ProcessFilter,
    unit: RawUnit,
    interval: Duration,
}

impl ScaphandreProcessFormat {
    pub fn new(config: &ScaphandreConfig, filter: ProcessFilter) -> Self {
        Self {
            filter,
            unit: config.power_unit.into(),
            interval: config.sample_interval(),
        }
    }

    /// Summed consumption of matching consumers, None if the shape is wrong
    fn matching_consumption(&self, consumers: &Value) -> Option<f64> {
        match consumers {
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter(|c| {
                        ["cmdline", "exe"].iter().any(|key| {
                            c.get(key)
                                .and_then(Value::as_str)
                                .is_some_and(|text| self.filter.matches(text))
                        })
                    })
                    .filter_map(|c| c.get("consumption").and_then(Value::as_f64))
                    .sum(),
            ),
            Value::Object(map) => Some(
                map.iter()
                    .filter(|(name, _)| self.filter.matches(name))
                    .filter_map(|(_, value)| value.as_f64())
                    .sum(),
            ),
            _ => None,
        }
    }
}

impl LogFormat for ScaphandreProcessFormat {
    fn source(&self) -> &str {
        PROCESS_SOURCE
    }

    fn kind(&self) -> MetricKind {
        MetricKind::EnergyJoules
    }

    fn parse(&self, content: &str) -> ParseOutcome {
        let mut outcome = ParseOutcome::default();
        let mut samples = Vec::new();

        for (index, record) in records(content, PROCESS_SOURCE, &mut outcome).iter().enumerate() {
            let Some(consumption) = record
                .get("consumers")
                .and_then(|c| self.matching_consumption(c))
            else {
                outcome.skip(PROCESS_SOURCE, index + 1, "record has no consumers");
                continue;
            };

            outcome.records += 1;
            let watts = self.unit.to_canonical(consumption);
            let timestamp = record
                .get("host")
                .and_then(|h| h.get("timestamp"))
                .and_then(Value::as_f64);
            samples.push(match timestamp {
                Some(ts) => PowerSample::at(ts, watts),
                None => PowerSample::new(watts),
            });
        }

        outcome.metrics.push(energy_metric(
            PROCESS_SOURCE,
            &samples,
            IntegrationMode::FixedInterval,
            self.interval,
        ));
        outcome
    }
}
