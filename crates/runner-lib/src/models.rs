//! Core data models for the experiment runner

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bytes per sector as reported by /proc/diskstats
pub const SECTOR_SIZE_BYTES: u64 = 512;

/// Point-in-time read of cumulative block-device counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub device: String,
    pub timestamp: DateTime<Utc>,
    pub reads: u64,
    pub writes: u64,
    pub sectors_read: u64,
    pub sectors_written: u64,
}

/// Difference between two counter snapshots of the same device.
///
/// Fields are signed so a counter that went backwards stays visible
/// instead of being clamped away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterDelta {
    pub reads_delta: i64,
    pub writes_delta: i64,
    pub sectors_written_delta: i64,
}

impl CounterDelta {
    /// Bytes written over the window, zero if the sector counter wrapped
    pub fn bytes_written(&self) -> u64 {
        u64::try_from(self.sectors_written_delta).unwrap_or(0) * SECTOR_SIZE_BYTES
    }

    /// Whether every component is non-negative
    pub fn is_monotonic(&self) -> bool {
        self.reads_delta >= 0 && self.writes_delta >= 0 && self.sectors_written_delta >= 0
    }
}

/// Warning raised while diffing counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CounterWarning {
    CounterWraparound {
        counter: String,
        initial: u64,
        r#final: u64,
    },
}

impl std::fmt::Display for CounterWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CounterWarning::CounterWraparound {
                counter,
                initial,
                r#final,
            } => write!(
                f,
                "counter '{}' went backwards ({} -> {})",
                counter, initial, r#final
            ),
        }
    }
}

/// What a canonical metric measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    BytesWritten,
    EnergyJoules,
    OpCount,
}

impl MetricKind {
    /// The fixed canonical unit for this kind
    pub fn unit(&self) -> CanonicalUnit {
        match self {
            MetricKind::BytesWritten => CanonicalUnit::Bytes,
            MetricKind::EnergyJoules => CanonicalUnit::Joules,
            MetricKind::OpCount => CanonicalUnit::Operations,
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::BytesWritten => write!(f, "bytes_written"),
            MetricKind::EnergyJoules => write!(f, "energy"),
            MetricKind::OpCount => write!(f, "op_count"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalUnit {
    Bytes,
    Joules,
    Operations,
}

impl std::fmt::Display for CanonicalUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CanonicalUnit::Bytes => write!(f, "B"),
            CanonicalUnit::Joules => write!(f, "J"),
            CanonicalUnit::Operations => write!(f, "ops"),
        }
    }
}

/// Wall-clock interval a metric covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A unit-normalized measurement comparable across sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMetric {
    pub source: String,
    pub kind: MetricKind,
    pub value: f64,
    pub unit: CanonicalUnit,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<TimeWindow>,
}

impl CanonicalMetric {
    pub fn new(source: impl Into<String>, kind: MetricKind, value: f64) -> Self {
        Self {
            source: source.into(),
            kind,
            value,
            unit: kind.unit(),
            window: None,
        }
    }

    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.window = Some(window);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_unit_follows_kind() {
        let metric = CanonicalMetric::new("pidstat", MetricKind::BytesWritten, 1024.0);
        assert_eq!(metric.unit, CanonicalUnit::Bytes);

        let metric = CanonicalMetric::new("scaphandre_host", MetricKind::EnergyJoules, 3600.0);
        assert_eq!(metric.unit, CanonicalUnit::Joules);
    }

    #[test]
    fn test_delta_bytes_written() {
        let delta = CounterDelta {
            reads_delta: 10,
            writes_delta: 400,
            sectors_written_delta: 2048,
        };
        assert_eq!(delta.bytes_written(), 1_048_576);
        assert!(delta.is_monotonic());

        let wrapped = CounterDelta {
            sectors_written_delta: -5,
            ..delta
        };
        assert_eq!(wrapped.bytes_written(), 0);
        assert!(!wrapped.is_monotonic());
    }
}
