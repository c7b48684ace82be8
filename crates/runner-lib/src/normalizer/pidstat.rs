//! pidstat -d log format
//!
//! ```text
//! # Time        UID       PID   kB_rd/s   kB_wr/s kB_ccwr/s iodelay  Command
//! 12:00:01     1000      4242      0.00  102400.00      0.00       0  chia
//! ```
//!
//! Each data row reports kB written by one process during one interval, so
//! the bytes written by the workload are the sum over its matching rows.

use super::units::RawUnit;
use super::{LogFormat, ParseOutcome};
use crate::config::{PidstatConfig, ProcessFilter};
use crate::models::{CanonicalMetric, MetricKind};

const SOURCE: &str = "pidstat";

pub struct PidstatFormat {
    filter: ProcessFilter,
    expected_columns: usize,
    value_column: usize,
}

impl PidstatFormat {
    pub fn new(config: &PidstatConfig, filter: ProcessFilter) -> Self {
        Self {
            filter,
            expected_columns: config.expected_columns,
            value_column: config.value_column,
        }
    }
}

/// Banner, header, summary and blank lines carry no per-interval data
fn is_noise(line: &str) -> bool {
    let line = line.trim();
    line.is_empty()
        || line.starts_with('#')
        || line.starts_with("Linux")
        || line.starts_with("Average")
        || (line.contains("UID") && line.contains("Command"))
}

impl LogFormat for PidstatFormat {
    fn source(&self) -> &str {
        SOURCE
    }

    fn kind(&self) -> MetricKind {
        MetricKind::BytesWritten
    }

    fn parse(&self, content: &str) -> ParseOutcome {
        let mut outcome = ParseOutcome::default();
        let mut kib_written = 0.0;

        for (index, line) in content.lines().enumerate() {
            if is_noise(line) {
                continue;
            }

            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != self.expected_columns {
                outcome.skip(
                    SOURCE,
                    index + 1,
                    &format!("expected {} columns, found {}", self.expected_columns, fields.len()),
                );
                continue;
            }

            let value = match fields[self.value_column].parse::<f64>() {
                Ok(v) if v.is_finite() && v >= 0.0 => v,
                _ => {
                    outcome.skip(SOURCE, index + 1, "invalid kB_wr/s value");
                    continue;
                }
            };

            outcome.records += 1;
            let command = fields[fields.len() - 1];
            if self.filter.matches(command) {
                kib_written += value;
            }
        }

        outcome.metrics.push(CanonicalMetric::new(
            SOURCE,
            MetricKind::BytesWritten,
            RawUnit::Kibibytes.to_canonical(kib_written),
        ));
        outcome
    }
}
