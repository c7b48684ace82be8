//! Canonical unit conversion table
//!
//! Every format parser maps its raw values through this table, so adding a
//! source only means naming the raw unit it reports.

use crate::config::{IntegrationMode, PowerUnit};
use crate::models::SECTOR_SIZE_BYTES;
use std::time::Duration;

pub const BYTES_PER_KIB: f64 = 1024.0;
pub const BYTES_PER_MIB: f64 = BYTES_PER_KIB * 1024.0;
pub const BYTES_PER_GIB: f64 = BYTES_PER_MIB * 1024.0;
pub const BYTES_PER_TIB: f64 = BYTES_PER_GIB * 1024.0;

pub const JOULES_PER_WATT_HOUR: f64 = 3600.0;

/// A unit as it appears in raw collector output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawUnit {
    Bytes,
    Kibibytes,
    Mebibytes,
    Gibibytes,
    Tebibytes,
    Sectors,
    Microwatts,
    Milliwatts,
    Watts,
    Joules,
    WattHours,
}

impl RawUnit {
    /// Factor taking a raw value to bytes, watts or joules
    pub fn canonical_factor(self) -> f64 {
        match self {
            RawUnit::Bytes => 1.0,
            RawUnit::Kibibytes => BYTES_PER_KIB,
            RawUnit::Mebibytes => BYTES_PER_MIB,
            RawUnit::Gibibytes => BYTES_PER_GIB,
            RawUnit::Tebibytes => BYTES_PER_TIB,
            RawUnit::Sectors => SECTOR_SIZE_BYTES as f64,
            RawUnit::Microwatts => 1e-6,
            RawUnit::Milliwatts => 1e-3,
            RawUnit::Watts => 1.0,
            RawUnit::Joules => 1.0,
            RawUnit::WattHours => JOULES_PER_WATT_HOUR,
        }
    }

    pub fn to_canonical(self, value: f64) -> f64 {
        value * self.canonical_factor()
    }

    /// Parse an iotop-style rate token (`B/s`, `K/s`, `M/s`, `G/s`, `T/s`)
    pub fn from_rate_token(token: &str) -> Option<RawUnit> {
        match token {
            "B/s" => Some(RawUnit::Bytes),
            "K/s" => Some(RawUnit::Kibibytes),
            "M/s" => Some(RawUnit::Mebibytes),
            "G/s" => Some(RawUnit::Gibibytes),
            "T/s" => Some(RawUnit::Tebibytes),
            _ => None,
        }
    }
}

impl From<PowerUnit> for RawUnit {
    fn from(unit: PowerUnit) -> Self {
        match unit {
            PowerUnit::Microwatts => RawUnit::Microwatts,
            PowerUnit::Milliwatts => RawUnit::Milliwatts,
            PowerUnit::Watts => RawUnit::Watts,
        }
    }
}

/// One power reading, already in watts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerSample {
    /// Seconds since the UNIX epoch, when known
    pub timestamp: Option<f64>,
    pub watts: f64,
}

impl PowerSample {
    pub fn new(watts: f64) -> Self {
        Self {
            timestamp: None,
            watts,
        }
    }

    pub fn at(timestamp: f64, watts: f64) -> Self {
        Self {
            timestamp: Some(timestamp),
            watts,
        }
    }
}

/// Integrate power samples into joules.
///
/// `FixedInterval` gives every sample the same duration. `TimestampDelta`
/// weights each sample by the time since the previous one; the first sample
/// and samples without a timestamp contribute nothing, and neither does a
/// step backwards in time.
pub fn integrate_power(samples: &[PowerSample], mode: IntegrationMode, interval: Duration) -> f64 {
    match mode {
        IntegrationMode::FixedInterval => {
            let step = interval.as_secs_f64();
            samples.iter().map(|s| s.watts * step).sum()
        }
        IntegrationMode::TimestampDelta => {
            let mut total = 0.0;
            let mut previous: Option<f64> = None;
            for sample in samples {
                let Some(ts) = sample.timestamp else {
                    continue;
                };
                if let Some(prev) = previous {
                    if ts > prev {
                        total += sample.watts * (ts - prev);
                    }
                }
                previous = Some(ts);
            }
            total
        }
    }
}

pub fn joules_to_watt_hours(joules: f64) -> f64 {
    joules / JOULES_PER_WATT_HOUR
}

pub fn bytes_to_mib(bytes: f64) -> f64 {
    bytes / BYTES_PER_MIB
}

pub fn bytes_to_gib(bytes: f64) -> f64 {
    bytes / BYTES_PER_GIB
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_tokens() {
        assert_eq!(RawUnit::from_rate_token("K/s"), Some(RawUnit::Kibibytes));
        assert_eq!(RawUnit::from_rate_token("T/s"), Some(RawUnit::Tebibytes));
        assert_eq!(RawUnit::from_rate_token("KB/s"), None);
        assert_eq!(RawUnit::Gibibytes.to_canonical(1.0), 1_073_741_824.0);
    }

    #[test]
    fn test_power_units() {
        assert_eq!(RawUnit::from(PowerUnit::Microwatts).to_canonical(100_000_000.0), 100.0);
        assert_eq!(RawUnit::WattHours.to_canonical(100.0), 360_000.0);
        assert_eq!(RawUnit::Sectors.to_canonical(2.0), 1024.0);
    }

    #[test]
    fn test_fixed_interval_integration() {
        let samples = vec![PowerSample::new(100.0); 3600];
        let joules = integrate_power(&samples, IntegrationMode::FixedInterval, Duration::from_secs(1));
        assert!((joules - 360_000.0).abs() < 1e-6);
        assert!((joules_to_watt_hours(joules) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_timestamp_delta_integration() {
        let samples = [
            PowerSample::at(10.0, 50.0),
            PowerSample::at(12.0, 100.0),
            PowerSample::new(999.0),
            PowerSample::at(13.0, 40.0),
            PowerSample::at(11.0, 500.0),
        ];
        let joules = integrate_power(&samples, IntegrationMode::TimestampDelta, Duration::ZERO);
        // 100 W for 2 s, 40 W for 1 s; the untimed sample and the step back are ignored
        assert!((joules - 240.0).abs() < 1e-9);
    }
}
