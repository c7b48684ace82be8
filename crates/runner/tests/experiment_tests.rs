//! End-to-end experiment runs with real `sh`/`sleep` processes

use runner_lib::config::{CollectorConfig, ExperimentConfig};
use runner_lib::supervisor::CommandSpec;
use runner_lib::{ComponentStatus, Experiment, MetricKind, Normalizer, SummaryReporter};
use std::path::Path;
use std::process::Command;
use tokio::sync::broadcast;

const DISKSTATS: &str = "   8       0 sda 1200 30 96000 500 100 120 812000 9000 0 7000 9500\n";

const PIDSTAT_ROW: &str = "12:00:01 1000 4242 0.00 1024.00 0.00 0 sleep";

fn write_config(dir: &Path, device: &str, program: &str, scaphandre: bool) -> std::path::PathBuf {
    let counters = dir.join("diskstats");
    std::fs::write(&counters, DISKSTATS).unwrap();

    let toml = format!(
        r#"
log_dir = "{logs}"
counter_source = "{counters}"
poll_interval_secs = 1
grace_period_secs = 2

[device]
id = "{device}"

[process_filter]
token = "sleep"

[workload]
program = "{program}"
args = ["-c", "sleep 0.3"]

[[collectors]]
name = "pidstat"
program = "sh"
args = ["-c", "echo '{row}'; sleep 30"]
log_file = "pidstat.log"

[normalizer.iotop]
enabled = false

[normalizer.scaphandre]
enabled = {scaphandre}
"#,
        logs = dir.join("logs").display(),
        counters = counters.display(),
        device = device,
        program = program,
        row = PIDSTAT_ROW,
        scaphandre = scaphandre,
    );
    let path = dir.join("wearwatch.toml");
    std::fs::write(&path, toml).unwrap();
    path
}

fn run_binary(config: &Path) -> i32 {
    Command::new(env!("CARGO_BIN_EXE_wearwatch"))
        .arg(config)
        .env_remove("WEARWATCH_CONFIG")
        .status()
        .expect("failed to run wearwatch")
        .code()
        .expect("wearwatch was killed by a signal")
}

#[test]
fn test_clean_run_exits_zero_and_writes_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "sda", "sh", false);

    assert_eq!(run_binary(&config), 0);

    let logs = dir.path().join("logs");
    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(logs.join("summary.json")).unwrap()).unwrap();
    assert_eq!(summary["exit_code"], 0);
    assert_eq!(summary["workload_state"], "completed");

    let pidstat = summary["sources"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["source"] == "pidstat")
        .unwrap();
    assert_eq!(pidstat["total"], 1024.0 * 1024.0);

    let metrics = std::fs::read_to_string(logs.join("metrics.prom")).unwrap();
    assert!(metrics.contains("wearwatch_live_collectors"));
    assert!(logs.join("pidstat.log").exists());
}

#[test]
fn test_invalid_config_exits_one() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "", "sh", false);
    assert_eq!(run_binary(&config), 1);
    assert!(!dir.path().join("logs").join("summary.json").exists());
}

#[test]
fn test_missing_config_file_exits_one() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(run_binary(&dir.path().join("absent.toml")), 1);
}

#[test]
fn test_workload_spawn_failure_exits_two() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "sda", "/nonexistent/plotter", false);
    assert_eq!(run_binary(&config), 2);
}

#[test]
fn test_missing_energy_trace_exits_three() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "sda", "sh", true);
    assert_eq!(run_binary(&config), 3);
}

#[tokio::test]
async fn test_restarted_collector_in_process() {
    let dir = tempfile::tempdir().unwrap();
    let counters = dir.path().join("diskstats");
    std::fs::write(&counters, DISKSTATS).unwrap();

    let mut config: ExperimentConfig = serde_json::from_value(serde_json::json!({
        "log_dir": dir.path().join("logs"),
        "device": {"id": "sda"},
        "counter_source": counters,
        "process_filter": {"token": "sleep"},
        "workload": {"program": "sh", "args": ["-c", "sleep 2.5"]},
        "poll_interval_secs": 1,
        "grace_period_secs": 1,
        "normalizer": {"iotop": {"enabled": false}, "scaphandre": {"enabled": false}}
    }))
    .unwrap();
    config.collectors.push(CollectorConfig {
        name: "pidstat".to_string(),
        command: CommandSpec::new("sh", vec!["-c".to_string(), format!("echo '{}'", PIDSTAT_ROW)]),
        log_file: Some("pidstat.log".to_string()),
    });
    config.validate().unwrap();

    let (_tx, rx) = broadcast::channel(1);
    let outcome = Experiment::new(&config).run(rx).await.unwrap();
    let reports = Normalizer::from_config(&config, outcome.window())
        .unwrap()
        .run()
        .await;
    let summary = SummaryReporter::build(&outcome, &reports);

    // the collector exits right away and is restarted at every poll
    let restarts = summary.restart_counts()[0].1;
    assert!(restarts >= 1, "expected restarts, got {}", restarts);

    let pidstat = summary.source("pidstat", MetricKind::BytesWritten).unwrap();
    assert_eq!(pidstat.status, ComponentStatus::Healthy);
    assert_eq!(pidstat.total, (restarts as f64 + 1.0) * 1024.0 * 1024.0);
    assert_eq!(summary.exit_code, 0);
}
