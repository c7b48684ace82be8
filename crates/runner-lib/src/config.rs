//! Experiment configuration
//!
//! One [`ExperimentConfig`] is built and validated at startup, then passed
//! by reference into every component. Nothing in the library reads paths,
//! device names or job parameters from anywhere else.

use crate::error::{Result, RunnerError};
use crate::supervisor::{CollectorSpec, CommandSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Complete configuration for one supervised run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Directory receiving collector logs and the run summary
    pub log_dir: PathBuf,

    /// Block device whose counters are diffed
    pub device: DeviceSelector,

    /// Counter source in /proc/diskstats format
    #[serde(default = "default_counter_source")]
    pub counter_source: PathBuf,

    /// Filter applied to per-process rows
    pub process_filter: ProcessFilter,

    /// The monitored workload
    pub workload: CommandSpec,

    #[serde(default)]
    pub run_mode: RunModeConfig,

    /// Supervision poll interval; defaults depend on the run mode
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,

    /// Time collectors get to exit after SIGINT before being killed
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,

    /// Built-in collectors to run
    #[serde(default)]
    pub presets: Vec<CollectorPreset>,

    /// Additional user-defined collectors
    #[serde(default)]
    pub collectors: Vec<CollectorConfig>,

    #[serde(default)]
    pub normalizer: NormalizerConfig,
}

fn default_counter_source() -> PathBuf {
    PathBuf::from("/proc/diskstats")
}

fn default_grace_period() -> u64 {
    10
}

/// Poll interval while plotting (run until the workload exits)
const UNTIL_EXIT_POLL_SECS: u64 = 5;

/// Poll interval while farming (fixed-duration runs)
const FIXED_DURATION_POLL_SECS: u64 = 30;

impl ExperimentConfig {
    /// Check everything that would otherwise fail halfway through a run
    pub fn validate(&self) -> Result<()> {
        if self.log_dir.as_os_str().is_empty() {
            return Err(RunnerError::Config("log_dir must not be empty".to_string()));
        }
        if self.device.id.trim().is_empty() {
            return Err(RunnerError::Config("device.id is required".to_string()));
        }
        if self.process_filter.token.trim().is_empty() {
            return Err(RunnerError::Config(
                "process_filter.token must not be empty".to_string(),
            ));
        }
        if self.workload.program.trim().is_empty() {
            return Err(RunnerError::Config(
                "workload.program must not be empty".to_string(),
            ));
        }
        if self.poll_interval_secs == Some(0) {
            return Err(RunnerError::Config(
                "poll_interval_secs must be greater than zero".to_string(),
            ));
        }
        if let RunModeConfig::FixedDuration { duration_secs: 0 } = self.run_mode {
            return Err(RunnerError::Config(
                "run_mode.duration_secs must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for spec in self.collector_specs() {
            if !seen.insert(spec.name.clone()) {
                return Err(RunnerError::Config(format!(
                    "collector name '{}' is used more than once",
                    spec.name
                )));
            }
        }

        let n = &self.normalizer;
        if n.pidstat.value_column >= n.pidstat.expected_columns {
            return Err(RunnerError::Config(format!(
                "pidstat.value_column ({}) must be below expected_columns ({})",
                n.pidstat.value_column, n.pidstat.expected_columns
            )));
        }
        if n.iotop.value_column + 1 >= n.iotop.command_column {
            return Err(RunnerError::Config(format!(
                "iotop.value_column ({}) and its unit column must precede command_column ({})",
                n.iotop.value_column, n.iotop.command_column
            )));
        }
        positive_interval("iotop.sample_interval_secs", n.iotop.sample_interval_secs)?;
        positive_interval("scaphandre.sample_interval_secs", n.scaphandre.sample_interval_secs)?;
        // scaphandre only samples at whole-second steps
        if n.scaphandre.sample_interval_secs.fract() != 0.0 {
            return Err(RunnerError::Config(format!(
                "scaphandre.sample_interval_secs must be a whole number of seconds, got {}",
                n.scaphandre.sample_interval_secs
            )));
        }

        if let Some(wattmeter) = &self.normalizer.wattmeter {
            positive_interval("wattmeter.sample_interval_secs", wattmeter.sample_interval_secs)?;
            url::Url::parse(&wattmeter.endpoint).map_err(|e| {
                RunnerError::Config(format!(
                    "invalid wattmeter endpoint '{}': {}",
                    wattmeter.endpoint, e
                ))
            })?;
            if wattmeter.max_attempts == 0 {
                return Err(RunnerError::Config(
                    "wattmeter.max_attempts must be at least 1".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn run_mode(&self) -> RunMode {
        match self.run_mode {
            RunModeConfig::UntilExit => RunMode::UntilExit,
            RunModeConfig::FixedDuration { duration_secs } => {
                RunMode::FixedDuration(Duration::from_secs(duration_secs))
            }
        }
    }

    pub fn poll_interval(&self) -> Duration {
        let secs = self.poll_interval_secs.unwrap_or(match self.run_mode {
            RunModeConfig::UntilExit => UNTIL_EXIT_POLL_SECS,
            RunModeConfig::FixedDuration { .. } => FIXED_DURATION_POLL_SECS,
        });
        Duration::from_secs(secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Collector specs in registration order: presets first, then custom ones
    pub fn collector_specs(&self) -> Vec<CollectorSpec> {
        let presets = self
            .presets
            .iter()
            .map(|preset| preset.spec(self));
        let custom = self.collectors.iter().map(|c| CollectorSpec {
            name: c.name.clone(),
            command: c.command.clone(),
            log_path: self
                .log_dir
                .join(c.log_file.clone().unwrap_or_else(|| format!("{}.log", c.name))),
        });
        presets.chain(custom).collect()
    }
}

fn positive_interval(key: &str, secs: f64) -> Result<()> {
    if secs.is_finite() && secs > 0.0 {
        Ok(())
    } else {
        Err(RunnerError::Config(format!(
            "{} must be a positive number of seconds, got {}",
            key, secs
        )))
    }
}

/// Serialized form of the run mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RunModeConfig {
    #[default]
    UntilExit,
    FixedDuration { duration_secs: u64 },
}

/// How long the supervision loop keeps going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Until the workload exits on its own
    UntilExit,
    /// Until the duration elapses; the workload is stopped explicitly
    FixedDuration(Duration),
}

/// Block device selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSelector {
    pub id: String,
    #[serde(default)]
    pub match_mode: DeviceMatch,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceMatch {
    #[default]
    Exact,
    /// Exact match wins; otherwise the first device starting with the id
    Prefix,
}

/// Selects the rows that belong to the monitored workload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessFilter {
    pub token: String,
    #[serde(default)]
    pub mode: FilterMode,
    #[serde(default)]
    pub case_sensitive: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    /// Token appears anywhere in the command text
    #[default]
    Substring,
    /// Token equals one whitespace-separated word, or its file name
    ExactToken,
}

impl ProcessFilter {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            mode: FilterMode::Substring,
            case_sensitive: false,
        }
    }

    pub fn exact(token: impl Into<String>) -> Self {
        Self {
            mode: FilterMode::ExactToken,
            ..Self::new(token)
        }
    }

    pub fn matches(&self, command: &str) -> bool {
        let (command, token) = if self.case_sensitive {
            (command.to_string(), self.token.clone())
        } else {
            (command.to_lowercase(), self.token.to_lowercase())
        };

        match self.mode {
            FilterMode::Substring => command.contains(&token),
            FilterMode::ExactToken => command.split_whitespace().any(|word| {
                word == token || word.rsplit('/').next().is_some_and(|base| base == token)
            }),
        }
    }
}

/// A user-defined collector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    pub name: String,
    #[serde(flatten)]
    pub command: CommandSpec,
    /// File name inside `log_dir`, `<name>.log` when unset
    #[serde(default)]
    pub log_file: Option<String>,
}

/// Built-in collector templates for the supported telemetry tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectorPreset {
    Pidstat,
    Iotop,
    Diskstats,
    Scaphandre,
}

/// Seconds between diskstats log lines
const DISKSTATS_LOG_INTERVAL_SECS: u64 = 5;

/// Prints one timestamped counter line: the exact device, else the first
/// device starting with the id when prefix matching is on.
const DISKSTATS_AWK: &str = "$3 == id && exact == \"\" { exact = $0 } \
prefix == 1 && first == \"\" && index($3, id) == 1 { first = $0 } \
END { line = (exact != \"\") ? exact : first; if (line != \"\") print ts, line }";

impl CollectorPreset {
    pub fn name(&self) -> &'static str {
        match self {
            CollectorPreset::Pidstat => "pidstat",
            CollectorPreset::Iotop => "iotop",
            CollectorPreset::Diskstats => "diskstats",
            CollectorPreset::Scaphandre => "scaphandre",
        }
    }

    pub fn spec(&self, config: &ExperimentConfig) -> CollectorSpec {
        let n = &config.normalizer;
        let (command, log_file) = match self {
            CollectorPreset::Pidstat => (
                CommandSpec::new("pidstat", ["-d", "1"]).env("S_TIME_FORMAT", "ISO"),
                n.pidstat.file.clone(),
            ),
            CollectorPreset::Iotop => (
                CommandSpec::new("iotop", ["-b", "-o", "-k", "-qqq", "-d", "1"]),
                n.iotop.file.clone(),
            ),
            CollectorPreset::Diskstats => {
                let prefix = match config.device.match_mode {
                    DeviceMatch::Exact => "0",
                    DeviceMatch::Prefix => "1",
                };
                let script = format!(
                    "while true; do awk -v id=\"$1\" -v prefix=\"$2\" -v ts=\"$(date +%s)\" '{}' \"$3\"; sleep {}; done",
                    DISKSTATS_AWK, DISKSTATS_LOG_INTERVAL_SECS
                );
                let source = config.counter_source.to_string_lossy().into_owned();
                (
                    CommandSpec::new(
                        "sh",
                        [
                            "-c".to_string(),
                            script,
                            "sh".to_string(),
                            config.device.id.clone(),
                            prefix.to_string(),
                            source,
                        ],
                    ),
                    n.diskstats_file.clone(),
                )
            }
            CollectorPreset::Scaphandre => {
                let step = (n.scaphandre.sample_interval_secs as u64).to_string();
                (
                    CommandSpec::new("scaphandre", ["json", "-s", step.as_str()]),
                    n.scaphandre.file.clone(),
                )
            }
        };

        CollectorSpec {
            name: self.name().to_string(),
            command,
            log_path: config.log_dir.join(log_file),
        }
    }
}

/// Per-format normalizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizerConfig {
    #[serde(default)]
    pub pidstat: PidstatConfig,
    #[serde(default)]
    pub iotop: IotopConfig,
    #[serde(default)]
    pub scaphandre: ScaphandreConfig,
    /// Periodic diskstats log written by the diskstats preset
    #[serde(default = "default_diskstats_file")]
    pub diskstats_file: String,
    /// Wattmeter API source, skipped when absent
    #[serde(default)]
    pub wattmeter: Option<WattmeterConfig>,
}

fn default_diskstats_file() -> String {
    "diskstats.log".to_string()
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            pidstat: PidstatConfig::default(),
            iotop: IotopConfig::default(),
            scaphandre: ScaphandreConfig::default(),
            diskstats_file: default_diskstats_file(),
            wattmeter: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PidstatConfig {
    pub enabled: bool,
    pub file: String,
    /// Field count of a data row
    pub expected_columns: usize,
    /// Zero-based column holding kB written in the interval
    pub value_column: usize,
}

impl Default for PidstatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file: "pidstat.log".to_string(),
            expected_columns: 8,
            value_column: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IotopConfig {
    pub enabled: bool,
    pub file: String,
    /// Zero-based column of the write rate; the unit token follows it
    pub value_column: usize,
    /// First column of the command line
    pub command_column: usize,
    pub sample_interval_secs: f64,
}

impl Default for IotopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file: "iotop.log".to_string(),
            value_column: 5,
            command_column: 11,
            sample_interval_secs: 1.0,
        }
    }
}

impl IotopConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs_f64(self.sample_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaphandreConfig {
    pub enabled: bool,
    pub file: String,
    /// Unit of every `consumption` field
    pub power_unit: PowerUnit,
    pub host_integration: IntegrationMode,
    pub sample_interval_secs: f64,
}

impl Default for ScaphandreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file: "scaphandre.json".to_string(),
            power_unit: PowerUnit::Microwatts,
            host_integration: IntegrationMode::FixedInterval,
            sample_interval_secs: 2.0,
        }
    }
}

impl ScaphandreConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs_f64(self.sample_interval_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerUnit {
    Microwatts,
    Milliwatts,
    Watts,
}

/// How power samples are turned into energy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationMode {
    /// Every sample covers the configured sampling interval
    FixedInterval,
    /// Every sample covers the time since the previous sample
    TimestampDelta,
}

/// External wattmeter API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WattmeterConfig {
    pub endpoint: String,
    pub job_id: String,
    #[serde(default = "default_wattmeter_metric")]
    pub metric: String,
    /// Query window; the run's own start and end are used when unset
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default = "default_wattmeter_interval")]
    pub sample_interval_secs: f64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// File name inside `log_dir` for the raw response
    #[serde(default = "default_wattmeter_file")]
    pub response_file: String,
}

fn default_wattmeter_metric() -> String {
    "wattmetre_power_watt".to_string()
}

fn default_wattmeter_interval() -> f64 {
    0.01
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_wattmeter_file() -> String {
    "wattmeter.json".to_string()
}

impl WattmeterConfig {
    pub fn new(endpoint: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            job_id: job_id.into(),
            metric: default_wattmeter_metric(),
            start_time: None,
            end_time: None,
            sample_interval_secs: default_wattmeter_interval(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            timeout_secs: default_timeout_secs(),
            response_file: default_wattmeter_file(),
        }
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs_f64(self.sample_interval_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ExperimentConfig {
        serde_json::from_value(serde_json::json!({
            "log_dir": "/tmp/wearwatch",
            "device": { "id": "sda" },
            "process_filter": { "token": "chia" },
            "workload": { "program": "chia", "args": ["plots", "create"] }
        }))
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = base_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.counter_source, PathBuf::from("/proc/diskstats"));
        assert_eq!(config.run_mode(), RunMode::UntilExit);
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.grace_period(), Duration::from_secs(10));
        assert_eq!(config.device.match_mode, DeviceMatch::Exact);
        assert_eq!(config.normalizer.pidstat.value_column, 4);
        assert_eq!(config.normalizer.iotop.sample_interval(), Duration::from_secs(1));
        assert!(config.normalizer.wattmeter.is_none());
    }

    #[test]
    fn test_fixed_duration_poll_default() {
        let mut config = base_config();
        config.run_mode = RunModeConfig::FixedDuration { duration_secs: 3600 };
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(
            config.run_mode(),
            RunMode::FixedDuration(Duration::from_secs(3600))
        );

        config.poll_interval_secs = Some(7);
        assert_eq!(config.poll_interval(), Duration::from_secs(7));
    }

    #[test]
    fn test_validate_rejects_missing_device() {
        let mut config = base_config();
        config.device.id = "  ".to_string();
        assert!(matches!(config.validate(), Err(RunnerError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_empty_log_dir() {
        let mut config = base_config();
        config.log_dir = PathBuf::new();
        assert!(matches!(config.validate(), Err(RunnerError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_duplicate_collectors() {
        let mut config = base_config();
        config.presets = vec![CollectorPreset::Pidstat];
        config.collectors = vec![CollectorConfig {
            name: "pidstat".to_string(),
            command: CommandSpec::new("pidstat", ["-d"]),
            log_file: None,
        }];
        assert!(matches!(config.validate(), Err(RunnerError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_wattmeter_endpoint() {
        let mut config = base_config();
        config.normalizer.wattmeter = Some(WattmeterConfig::new("not a url", "42"));
        assert!(matches!(config.validate(), Err(RunnerError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_intervals() {
        for secs in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let mut config = base_config();
            config.normalizer.iotop.sample_interval_secs = secs;
            assert!(matches!(config.validate(), Err(RunnerError::Config(_))));

            let mut config = base_config();
            config.normalizer.scaphandre.sample_interval_secs = secs;
            assert!(matches!(config.validate(), Err(RunnerError::Config(_))));

            let mut config = base_config();
            let mut wattmeter = WattmeterConfig::new("http://wattmeter.local/metrics", "42");
            wattmeter.sample_interval_secs = secs;
            config.normalizer.wattmeter = Some(wattmeter);
            assert!(matches!(config.validate(), Err(RunnerError::Config(_))));
        }
    }

    #[test]
    fn test_validate_rejects_fractional_scaphandre_step() {
        let mut config = base_config();
        config.normalizer.scaphandre.sample_interval_secs = 1.5;
        assert!(matches!(config.validate(), Err(RunnerError::Config(_))));

        config.normalizer.scaphandre.sample_interval_secs = 3.0;
        config.presets = vec![CollectorPreset::Scaphandre];
        assert!(config.validate().is_ok());
        assert_eq!(config.collector_specs()[0].command.args, ["json", "-s", "3"]);
    }

    #[test]
    fn test_validate_rejects_pidstat_column_out_of_range() {
        let mut config = base_config();
        config.normalizer.pidstat.value_column = 8;
        assert!(matches!(config.validate(), Err(RunnerError::Config(_))));

        config.normalizer.pidstat.expected_columns = 9;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_iotop_columns_overlapping_command() {
        let mut config = base_config();
        config.normalizer.iotop.value_column = 11;
        assert!(matches!(config.validate(), Err(RunnerError::Config(_))));

        config.normalizer.iotop.value_column = 10;
        assert!(matches!(config.validate(), Err(RunnerError::Config(_))));

        config.normalizer.iotop.value_column = 9;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_diskstats_preset_logs_prefixed_device() {
        let dir = tempfile::tempdir().unwrap();
        let counters = dir.path().join("diskstats");
        std::fs::write(
            &counters,
            " 259       0 nvme0n1 7000 0 560000 900 8000 0 1200000 4000 0 3000 4900\n",
        )
        .unwrap();

        let mut config = base_config();
        config.log_dir = dir.path().to_path_buf();
        config.counter_source = counters;
        config.device = DeviceSelector {
            id: "nvme0".to_string(),
            match_mode: DeviceMatch::Prefix,
        };
        config.presets = vec![CollectorPreset::Diskstats];
        let spec = config.collector_specs().remove(0);

        let log = std::fs::File::create(&spec.log_path).unwrap();
        let mut child = std::process::Command::new(&spec.command.program)
            .args(&spec.command.args)
            .stdout(log)
            .spawn()
            .unwrap();
        std::thread::sleep(Duration::from_millis(1000));
        child.kill().unwrap();
        child.wait().unwrap();

        let content = std::fs::read_to_string(&spec.log_path).unwrap();
        assert!(content.contains("nvme0n1"), "log was {:?}", content);
        let (first, _, delta, _) =
            crate::sampler::delta_from_log(&content, "nvme0", DeviceMatch::Prefix).unwrap();
        assert_eq!(first.device, "nvme0n1");
        assert_eq!(delta.writes_delta, 0);
    }

    #[test]
    fn test_diskstats_preset_passes_device_as_argument() {
        let mut config = base_config();
        config.device.id = "it's".to_string();
        config.presets = vec![CollectorPreset::Diskstats];
        let spec = config.collector_specs().remove(0);

        assert_eq!(spec.command.program, "sh");
        assert_eq!(&spec.command.args[2..], ["sh", "it's", "0", "/proc/diskstats"]);
        assert!(!spec.command.args[1].contains("it's"));
    }

    #[test]
    fn test_collector_specs_order_and_paths() {
        let mut config = base_config();
        config.presets = vec![CollectorPreset::Iotop, CollectorPreset::Pidstat];
        config.collectors = vec![CollectorConfig {
            name: "vmstat".to_string(),
            command: CommandSpec::new("vmstat", ["1"]),
            log_file: None,
        }];

        let specs = config.collector_specs();
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["iotop", "pidstat", "vmstat"]);
        assert_eq!(specs[0].log_path, PathBuf::from("/tmp/wearwatch/iotop.log"));
        assert_eq!(specs[2].log_path, PathBuf::from("/tmp/wearwatch/vmstat.log"));
        assert_eq!(specs[1].command.env.get("S_TIME_FORMAT").map(String::as_str), Some("ISO"));
    }

    #[test]
    fn test_process_filter_substring() {
        let filter = ProcessFilter::new("chia");
        assert!(filter.matches("/usr/bin/chia plots create -k 32"));
        assert!(filter.matches("CHIA_harvester"));
        assert!(!filter.matches("postgres: writer"));
    }

    #[test]
    fn test_process_filter_exact_token() {
        let filter = ProcessFilter::exact("chia");
        assert!(filter.matches("/usr/bin/chia plots create"));
        assert!(filter.matches("chia start farmer"));
        assert!(!filter.matches("chia_harvester"));
    }

    #[test]
    fn test_process_filter_case_sensitive() {
        let filter = ProcessFilter {
            case_sensitive: true,
            ..ProcessFilter::new("Chia")
        };
        assert!(filter.matches("Chia plotter"));
        assert!(!filter.matches("chia plotter"));
    }
}
