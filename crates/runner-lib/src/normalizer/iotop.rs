//! iotop batch-mode log format (`iotop -b -o -k -qqq`)
//!
//! ```text
//!  4242 be/4 chia        0.00 K/s  1024.00 K/s  0.00 %  12.00 % chia plots create
//! ```
//!
//! Rows carry per-process write rates; each row stands for one sampling
//! interval, so bytes written are rate times interval summed over rows.

use super::units::RawUnit;
use super::{LogFormat, ParseOutcome};
use crate::config::{IotopConfig, ProcessFilter};
use crate::models::{CanonicalMetric, MetricKind};

const SOURCE: &str = "iotop";

pub struct IotopFormat {
    filter: ProcessFilter,
    value_column: usize,
    command_column: usize,
    interval_secs: f64,
}

impl IotopFormat {
    pub fn new(config: &IotopConfig, filter: ProcessFilter) -> Self {
        Self {
            filter,
            value_column: config.value_column,
            command_column: config.command_column,
            interval_secs: config.sample_interval().as_secs_f64(),
        }
    }
}

fn is_noise(line: &str) -> bool {
    let line = line.trim();
    line.is_empty()
        || line.starts_with("Total")
        || line.starts_with("Actual")
        || (line.contains("TID") && line.contains("PRIO"))
}

impl LogFormat for IotopFormat {
    fn source(&self) -> &str {
        SOURCE
    }

    fn kind(&self) -> MetricKind {
        MetricKind::BytesWritten
    }

    fn parse(&self, content: &str) -> ParseOutcome {
        let mut outcome = ParseOutcome::default();
        let mut bytes_per_sec = 0.0;

        for (index, line) in content.lines().enumerate() {
            if is_noise(line) {
                continue;
            }

            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() <= self.command_column {
                outcome.skip(SOURCE, index + 1, "row has no command column");
                continue;
            }

            let value = match fields[self.value_column].parse::<f64>() {
                Ok(v) if v.is_finite() && v >= 0.0 => v,
                _ => {
                    outcome.skip(SOURCE, index + 1, "invalid write rate");
                    continue;
                }
            };
            let Some(unit) = RawUnit::from_rate_token(fields[self.value_column + 1]) else {
                outcome.skip(SOURCE, index + 1, "unknown rate unit");
                continue;
            };

            outcome.records += 1;
            let command = fields[self.command_column..].join(" ");
            if self.filter.matches(&command) {
                bytes_per_sec += unit.to_canonical(value);
            }
        }

        outcome.metrics.push(CanonicalMetric::new(
            SOURCE,
            MetricKind::BytesWritten,
            bytes_per_sec * self.interval_secs,
        ));
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::units::{bytes_to_mib, BYTES_PER_GIB, BYTES_PER_KIB, BYTES_PER_MIB};

    const LOG: &str = "\
Total DISK READ :       0.00 K/s | Total DISK WRITE :    1049.00 M/s
Actual DISK READ:       0.00 K/s | Actual DISK WRITE:    1049.00 M/s
    TID  PRIO  USER     DISK READ  DISK WRITE  SWAPIN     IO>    COMMAND
   4242 be/4 chia        0.00 K/s     5.00 K/s  0.00 %  1.00 % chia plots create -k 32
   4243 be/4 chia        0.00 K/s     2.00 M/s  0.00 %  3.00 % chia plots create -k 32
   4244 be/4 chia        0.00 K/s     1.00 G/s  0.00 % 90.00 % chia plots create -k 32
    812 be/4 postgres    0.00 K/s    64.00 M/s  0.00 %  5.00 % postgres: checkpointer
";

    fn format() -> IotopFormat {
        IotopFormat::new(&IotopConfig::default(), ProcessFilter::new("chia"))
    }

    #[test]
    fn test_mixed_rate_units() {
        let outcome = format().parse(LOG);
        let bytes = outcome.total(MetricKind::BytesWritten);

        assert_eq!(outcome.records, 4);
        assert_eq!(outcome.warnings, 0);
        assert_eq!(bytes, 5.0 * BYTES_PER_KIB + 2.0 * BYTES_PER_MIB + BYTES_PER_GIB);
        assert!((bytes_to_mib(bytes) - 1026.0048828125).abs() < 1e-9);
    }

    #[test]
    fn test_interval_scales_total() {
        let config = IotopConfig {
            sample_interval_secs: 2.0,
            ..IotopConfig::default()
        };
        let outcome = IotopFormat::new(&config, ProcessFilter::new("postgres")).parse(LOG);
        assert_eq!(outcome.total(MetricKind::BytesWritten), 128.0 * BYTES_PER_MIB);
    }

    #[test]
    fn test_malformed_rows() {
        let log = "\
   4242 be/4 chia        0.00 K/s     5.00 X/s  0.00 %  1.00 % chia
   4242 be/4 chia        0.00 K/s     n/a K/s  0.00 %  1.00 % chia
   4242 be/4 chia
   4242 be/4 chia        0.00 K/s     7.00 B/s  0.00 %  1.00 % chia
";
        let outcome = format().parse(log);
        assert_eq!(outcome.warnings, 3);
        assert_eq!(outcome.records, 1);
        assert_eq!(outcome.total(MetricKind::BytesWritten), 7.0);
    }
}
