//! Block-device counter snapshots
//!
//! Reads cumulative counters from a source in /proc/diskstats format:
//!
//! ```text
//!    8       0 sda 1200 30 96000 500 3400 120 812000 9000 0 7000 9500
//!    |       | |   |       |          |          |
//!  major minor dev reads  sectors_read writes  sectors_written
//! ```

use crate::config::DeviceMatch;
use crate::error::{Result, RunnerError};
use crate::models::{CounterDelta, CounterSnapshot, CounterWarning};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Counter offsets relative to the device-name field
const READS_OFFSET: usize = 1;
const SECTORS_READ_OFFSET: usize = 3;
const WRITES_OFFSET: usize = 5;
const SECTORS_WRITTEN_OFFSET: usize = 7;

/// Position of the device name in a raw /proc/diskstats line
const DEVICE_FIELD: usize = 2;

/// Samples block-device counters for one device
#[derive(Debug, Clone)]
pub struct SnapshotSampler {
    source: PathBuf,
    match_mode: DeviceMatch,
}

impl SnapshotSampler {
    pub fn new(source: impl Into<PathBuf>, match_mode: DeviceMatch) -> Self {
        Self {
            source: source.into(),
            match_mode,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Read the counter source now and extract the counters of `device`
    pub async fn sample(&self, device: &str) -> Result<CounterSnapshot> {
        let content = fs::read_to_string(&self.source).await?;
        let timestamp = Utc::now();

        parse_diskstats(&content, device, self.match_mode, timestamp).ok_or_else(|| {
            RunnerError::DeviceNotFound {
                device: device.to_string(),
                path: self.source.clone(),
            }
        })
    }
}

/// Find the device's line in diskstats content and read its counters
pub fn parse_diskstats(
    content: &str,
    device: &str,
    match_mode: DeviceMatch,
    timestamp: DateTime<Utc>,
) -> Option<CounterSnapshot> {
    let rows: Vec<Vec<&str>> = content
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .filter(|fields| fields.len() > DEVICE_FIELD + SECTORS_WRITTEN_OFFSET)
        .collect();

    let exact = rows.iter().find(|fields| fields[DEVICE_FIELD] == device);
    let row = match (exact, match_mode) {
        (Some(row), _) => Some(row),
        (None, DeviceMatch::Prefix) => rows
            .iter()
            .find(|fields| fields[DEVICE_FIELD].starts_with(device)),
        (None, DeviceMatch::Exact) => None,
    }?;

    read_counters(row, DEVICE_FIELD, timestamp)
}

fn read_counters(
    fields: &[&str],
    device_index: usize,
    timestamp: DateTime<Utc>,
) -> Option<CounterSnapshot> {
    let counter = |offset: usize| -> Option<u64> { fields.get(device_index + offset)?.parse().ok() };

    Some(CounterSnapshot {
        device: fields.get(device_index)?.to_string(),
        timestamp,
        reads: counter(READS_OFFSET)?,
        writes: counter(WRITES_OFFSET)?,
        sectors_read: counter(SECTORS_READ_OFFSET)?,
        sectors_written: counter(SECTORS_WRITTEN_OFFSET)?,
    })
}

/// Diff two snapshots of the same device.
///
/// Counters are assumed monotonic; any counter that went backwards is
/// returned as a [`CounterWarning::CounterWraparound`].
pub fn delta(
    initial: &CounterSnapshot,
    last: &CounterSnapshot,
) -> (CounterDelta, Vec<CounterWarning>) {
    let mut warnings = Vec::new();
    let mut diff = |counter: &str, before: u64, after: u64| -> i64 {
        if after >= before {
            i64::try_from(after - before).unwrap_or(i64::MAX)
        } else {
            warnings.push(CounterWarning::CounterWraparound {
                counter: counter.to_string(),
                initial: before,
                r#final: after,
            });
            -i64::try_from(before - after).unwrap_or(i64::MAX)
        }
    };

    let delta = CounterDelta {
        reads_delta: diff("reads", initial.reads, last.reads),
        writes_delta: diff("writes", initial.writes, last.writes),
        sectors_written_delta: diff(
            "sectors_written",
            initial.sectors_written,
            last.sectors_written,
        ),
    };

    (delta, warnings)
}

/// Diff the first and last entries for `device` in a periodic diskstats log.
///
/// Log lines may carry leading fields such as a UNIX timestamp; the device
/// name is located by value and counters are read at fixed offsets after it.
/// A leading integer timestamp, when present, becomes the snapshot time.
/// Device resolution follows [`parse_diskstats`]: an exact name wins, and in
/// prefix mode the first logged device starting with `device` is used.
pub fn delta_from_log(
    content: &str,
    device: &str,
    match_mode: DeviceMatch,
) -> Result<(CounterSnapshot, CounterSnapshot, CounterDelta, Vec<CounterWarning>)> {
    let mut snapshots = log_snapshots(content, device);
    if snapshots.is_empty() && match_mode == DeviceMatch::Prefix {
        if let Some(resolved) = prefixed_device(content, device) {
            snapshots = log_snapshots(content, resolved);
        }
    }

    let mut snapshots = snapshots.into_iter();
    let first = snapshots.next().ok_or_else(|| {
        RunnerError::Parse(format!("no diskstats entries for device '{}'", device))
    })?;
    let last = snapshots.last().unwrap_or_else(|| first.clone());
    let (delta, warnings) = delta(&first, &last);

    Ok((first, last, delta, warnings))
}

fn log_snapshots(content: &str, device: &str) -> Vec<CounterSnapshot> {
    content
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let index = fields.iter().position(|f| *f == device)?;
            let timestamp = fields
                .first()
                .and_then(|f| f.parse::<i64>().ok())
                .filter(|_| index > DEVICE_FIELD)
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
                .unwrap_or_else(Utc::now);
            read_counters(&fields, index, timestamp)
        })
        .collect()
}

/// First non-numeric field starting with `device` that is followed by counters
fn prefixed_device<'a>(content: &'a str, device: &str) -> Option<&'a str> {
    content.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        fields.iter().enumerate().find_map(|(index, field)| {
            let candidate = field.starts_with(device)
                && field.parse::<u64>().is_err()
                && read_counters(&fields, index, Utc::now()).is_some();
            candidate.then_some(*field)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISKSTATS: &str = "\
   8       0 sda 1200 30 96000 500 100 120 812000 9000 0 7000 9500
   8       1 sda1 1100 28 90000 450 90 110 800000 8800 0 6800 9200
   8      16 sdb 50 0 400 10 5 0 40 2 0 12 12
 259       0 nvme0n1 7000 0 560000 900 8000 0 1200000 4000 0 3000 4900
";

    fn snapshot(writes: u64, sectors_written: u64) -> CounterSnapshot {
        CounterSnapshot {
            device: "sda".to_string(),
            timestamp: Utc::now(),
            reads: 10,
            writes,
            sectors_read: 80,
            sectors_written,
        }
    }

    #[test]
    fn test_parse_exact_device() {
        let snap = parse_diskstats(DISKSTATS, "sda", DeviceMatch::Exact, Utc::now()).unwrap();
        assert_eq!(snap.device, "sda");
        assert_eq!(snap.reads, 1200);
        assert_eq!(snap.sectors_read, 96000);
        assert_eq!(snap.writes, 100);
        assert_eq!(snap.sectors_written, 812000);
    }

    #[test]
    fn test_exact_match_wins_over_prefix() {
        let snap = parse_diskstats(DISKSTATS, "sda", DeviceMatch::Prefix, Utc::now()).unwrap();
        assert_eq!(snap.device, "sda");
    }

    #[test]
    fn test_prefix_match() {
        let snap = parse_diskstats(DISKSTATS, "nvme0", DeviceMatch::Prefix, Utc::now()).unwrap();
        assert_eq!(snap.device, "nvme0n1");
        assert_eq!(snap.writes, 8000);

        assert!(parse_diskstats(DISKSTATS, "nvme0", DeviceMatch::Exact, Utc::now()).is_none());
    }

    #[test]
    fn test_unknown_device() {
        assert!(parse_diskstats(DISKSTATS, "sdz", DeviceMatch::Prefix, Utc::now()).is_none());
    }

    #[tokio::test]
    async fn test_sample_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diskstats");
        std::fs::write(&path, DISKSTATS).unwrap();

        let sampler = SnapshotSampler::new(&path, DeviceMatch::Exact);
        let snap = sampler.sample("sdb").await.unwrap();
        assert_eq!(snap.writes, 5);

        let missing = sampler.sample("sdz").await;
        assert!(matches!(missing, Err(RunnerError::DeviceNotFound { .. })));
    }

    #[test]
    fn test_delta_writes() {
        let (delta, warnings) = delta(&snapshot(100, 1000), &snapshot(500, 3048));
        assert_eq!(delta.writes_delta, 400);
        assert_eq!(delta.reads_delta, 0);
        assert_eq!(delta.bytes_written(), 2048 * 512);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_delta_non_negative_for_monotonic_pairs() {
        for (before, after) in [(0u64, 0u64), (1, 2), (100, 500), (u64::MAX - 1, u64::MAX)] {
            let (delta, warnings) = delta(&snapshot(before, 0), &snapshot(after, 0));
            assert_eq!(delta.writes_delta as u64, after - before);
            assert!(delta.writes_delta >= 0);
            assert!(warnings.is_empty());
        }
    }

    #[test]
    fn test_delta_reports_wraparound() {
        let (delta, warnings) = delta(&snapshot(500, 10), &snapshot(100, 20));
        assert_eq!(delta.writes_delta, -400);
        assert_eq!(
            warnings,
            vec![CounterWarning::CounterWraparound {
                counter: "writes".to_string(),
                initial: 500,
                r#final: 100,
            }]
        );
    }

    #[test]
    fn test_delta_from_log_with_timestamps() {
        let log = "\
1700000000    8       0 sda 1200 30 96000 500 100 120 812000 9000 0 7000 9500
1700000005    8       0 sda 1250 30 96400 520 180 130 900000 9100 0 7100 9600
1700000010    8       0 sda 1300 31 96800 540 260 140 1000000 9200 0 7200 9700
";
        let (first, last, delta, warnings) = delta_from_log(log, "sda", DeviceMatch::Exact).unwrap();
        assert_eq!(first.timestamp.timestamp(), 1_700_000_000);
        assert_eq!(last.timestamp.timestamp(), 1_700_000_010);
        assert_eq!(delta.writes_delta, 160);
        assert_eq!(delta.sectors_written_delta, 188000);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_delta_from_log_prefix_resolution() {
        let log = "\
1700000000  259       0 nvme0n1 7000 0 560000 900 8000 0 1200000 4000 0 3000 4900
1700000005  259       0 nvme0n1 7010 0 560800 910 8400 0 1300000 4100 0 3100 5000
";
        let (first, last, delta, _) = delta_from_log(log, "nvme0", DeviceMatch::Prefix).unwrap();
        assert_eq!(first.device, "nvme0n1");
        assert_eq!(last.device, "nvme0n1");
        assert_eq!(delta.writes_delta, 400);

        let exact = delta_from_log(log, "nvme0", DeviceMatch::Exact);
        assert!(matches!(exact, Err(RunnerError::Parse(_))));
    }

    #[test]
    fn test_delta_from_log_exact_wins_in_prefix_mode() {
        let log = "\
1700000000    8       1 sda1 1100 28 90000 450 90 110 800000 8800 0 6800 9200
1700000000    8       0 sda 1200 30 96000 500 100 120 812000 9000 0 7000 9500
1700000005    8       1 sda1 1100 28 90000 450 95 110 800100 8800 0 6800 9200
1700000005    8       0 sda 1250 30 96400 520 180 130 900000 9100 0 7100 9600
";
        let (first, _, delta, _) = delta_from_log(log, "sda", DeviceMatch::Prefix).unwrap();
        assert_eq!(first.device, "sda");
        assert_eq!(delta.writes_delta, 80);
    }

    #[test]
    fn test_delta_from_log_without_entries() {
        let result = delta_from_log("garbage\n\n", "sda", DeviceMatch::Prefix);
        assert!(matches!(result, Err(RunnerError::Parse(_))));
    }
}
