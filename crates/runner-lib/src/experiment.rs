//! One experiment run
//!
//! Takes the initial disk snapshot, starts the workload and the collectors,
//! supervises them until the workload finishes (or the fixed duration
//! elapses, or shutdown is requested), then stops everything and takes the
//! final snapshot.

use crate::config::ExperimentConfig;
use crate::error::Result;
use crate::launcher::{WorkloadLauncher, WorkloadState};
use crate::models::{CounterSnapshot, TimeWindow};
use crate::observability::{RunMetrics, StructuredLogger};
use crate::sampler::{self, SnapshotSampler};
use crate::supervisor::{CollectorReport, CommandSpawner, ProcessSpawner, StartFailure, Supervisor};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// File the workload's own stdout and stderr go to, inside `log_dir`
pub const WORKLOAD_LOG: &str = "workload.log";

/// Everything observed during the run, before normalization
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub device: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
    pub workload_state: WorkloadState,
    pub workload_exit_code: Option<i32>,
    /// Shutdown was requested before the run ended on its own
    pub interrupted: bool,
    pub initial_snapshot: std::result::Result<CounterSnapshot, String>,
    pub final_snapshot: std::result::Result<CounterSnapshot, String>,
    pub collectors: Vec<CollectorReport>,
    pub start_failures: Vec<StartFailure>,
}

impl RunOutcome {
    /// Wall-clock span of the workload, used to query external sources
    pub fn window(&self) -> Option<TimeWindow> {
        Some(TimeWindow {
            start: self.started_at?,
            end: self.ended_at?,
        })
    }
}

async fn sleep_until_deadline(remaining: Option<Duration>) {
    match remaining {
        Some(left) => tokio::time::sleep(left).await,
        None => std::future::pending().await,
    }
}

/// Drives one run from the configuration
pub struct Experiment<'a> {
    config: &'a ExperimentConfig,
    spawner: Arc<dyn ProcessSpawner>,
    logger: StructuredLogger,
    metrics: RunMetrics,
}

impl<'a> Experiment<'a> {
    pub fn new(config: &'a ExperimentConfig) -> Self {
        Self::with_spawner(config, Arc::new(CommandSpawner::new()))
    }

    pub fn with_spawner(config: &'a ExperimentConfig, spawner: Arc<dyn ProcessSpawner>) -> Self {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
        Self {
            config,
            spawner,
            logger: StructuredLogger::new(host),
            metrics: RunMetrics::new(),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Run the experiment.
    ///
    /// Only a workload that cannot be started (or an unusable log
    /// directory) is an error; collector and snapshot failures end up in
    /// the returned [`RunOutcome`].
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<RunOutcome> {
        let config = self.config;
        let device = config.device.id.as_str();
        tokio::fs::create_dir_all(&config.log_dir).await?;

        let sampler = SnapshotSampler::new(&config.counter_source, config.device.match_mode);
        let initial_snapshot = sampler.sample(device).await.map_err(|e| {
            warn!(device = %device, error = %e, "Initial disk snapshot failed");
            e.to_string()
        });

        let mut supervisor = Supervisor::new(self.spawner.clone());
        for spec in config.collector_specs() {
            supervisor.register(spec)?;
        }

        let mut workload = WorkloadLauncher::new(
            config.workload.clone(),
            config.run_mode(),
            self.spawner.clone(),
        )
        .with_log(config.log_dir.join(WORKLOAD_LOG));
        workload.start()?;

        self.logger.log_startup(
            env!("CARGO_PKG_VERSION"),
            &config.workload.program,
            supervisor.states().len(),
        );

        let start_report = supervisor.start_all();
        for failure in &start_report.failures {
            self.logger.log_start_failure(&failure.collector, &failure.error);
        }

        let mut ticker = tokio::time::interval(config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut interrupted = false;
        let mut shutdown_open = true;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = sleep_until_deadline(workload.remaining()) => {}
                received = shutdown.recv(), if shutdown_open => match received {
                    Ok(()) | Err(RecvError::Lagged(_)) => {
                        interrupted = true;
                        break;
                    }
                    Err(RecvError::Closed) => {
                        shutdown_open = false;
                        continue;
                    }
                },
            }

            let poll_started = Instant::now();
            if !workload.should_continue() {
                break;
            }
            let results = supervisor.poll_once();
            self.metrics
                .observe_poll_latency(poll_started.elapsed().as_secs_f64());
            debug!(
                alive = results.alive,
                restarted = results.restarted,
                failed_restarts = results.failed_restarts,
                "Supervision poll"
            );
        }

        let grace = config.grace_period();
        if interrupted {
            self.logger.log_shutdown("shutdown requested");
        } else {
            self.logger.log_shutdown(&format!("workload {}", workload.state()));
        }
        workload.stop(grace).await;
        supervisor.stop_all(grace).await;

        let final_snapshot = sampler.sample(device).await.map_err(|e| {
            warn!(device = %device, error = %e, "Final disk snapshot failed");
            e.to_string()
        });
        let (initial_snapshot, final_snapshot) =
            self.fallback_to_collector_log(initial_snapshot, final_snapshot).await;

        self.logger.log_workload_finished(
            &workload.state().to_string(),
            workload.exit_code(),
            workload.duration_seconds(),
        );

        Ok(RunOutcome {
            device: device.to_string(),
            started_at: workload.started_at(),
            ended_at: workload.ended_at(),
            duration_seconds: workload.duration_seconds(),
            workload_state: workload.state(),
            workload_exit_code: workload.exit_code(),
            interrupted,
            initial_snapshot,
            final_snapshot,
            collectors: supervisor.reports(),
            start_failures: start_report.failures,
        })
    }

    /// When a direct snapshot failed, use the first and last entries the
    /// diskstats collector logged during the run instead.
    async fn fallback_to_collector_log(
        &self,
        initial: std::result::Result<CounterSnapshot, String>,
        last: std::result::Result<CounterSnapshot, String>,
    ) -> (
        std::result::Result<CounterSnapshot, String>,
        std::result::Result<CounterSnapshot, String>,
    ) {
        if initial.is_ok() && last.is_ok() {
            return (initial, last);
        }

        let path = self.config.log_dir.join(&self.config.normalizer.diskstats_file);
        let Ok(content) = tokio::fs::read_to_string(&path).await else {
            return (initial, last);
        };

        let device = &self.config.device;
        match sampler::delta_from_log(&content, &device.id, device.match_mode) {
            Ok((first, final_entry, _, _)) => {
                info!(path = %path.display(), "Using diskstats collector log for the disk delta");
                (Ok(first), Ok(final_entry))
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Diskstats collector log unusable");
                (initial, last)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CollectorConfig, RunModeConfig};
    use crate::error::RunnerError;
    use crate::supervisor::{CollectorStatus, CommandSpec};

    const DISKSTATS: &str = "   8       0 sda 1200 30 96000 500 100 120 812000 9000 0 7000 9500\n";

    fn config(dir: &std::path::Path, workload: &str) -> ExperimentConfig {
        let counters = dir.join("diskstats");
        std::fs::write(&counters, DISKSTATS).unwrap();

        let mut config: ExperimentConfig = serde_json::from_value(serde_json::json!({
            "log_dir": dir.join("logs"),
            "device": {"id": "sda"},
            "counter_source": counters,
            "process_filter": {"token": "sleep"},
            "workload": {"program": "sh", "args": ["-c", workload]},
            "poll_interval_secs": 1,
            "grace_period_secs": 2
        }))
        .unwrap();
        config.collectors.push(CollectorConfig {
            name: "ticker".to_string(),
            command: CommandSpec::new("sh", ["-c", "while true; do echo tick; sleep 0.2; done"]),
            log_file: None,
        });
        config
    }

    #[tokio::test]
    async fn test_until_exit_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), "sleep 0.3; exit 4");
        let (_tx, rx) = broadcast::channel(1);

        let outcome = Experiment::new(&config).run(rx).await.unwrap();

        assert_eq!(outcome.workload_state, WorkloadState::Completed);
        assert_eq!(outcome.workload_exit_code, Some(4));
        assert!(!outcome.interrupted);
        assert!(outcome.initial_snapshot.is_ok());
        assert!(outcome.final_snapshot.is_ok());
        assert!(outcome.window().is_some());
        assert_eq!(outcome.collectors.len(), 1);
        assert_eq!(outcome.collectors[0].status, CollectorStatus::Stopped);
        assert!(config.log_dir.join("ticker.log").exists());
        assert!(config.log_dir.join(WORKLOAD_LOG).exists());
    }

    #[tokio::test]
    async fn test_fixed_duration_run_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), "sleep 30");
        config.run_mode = RunModeConfig::FixedDuration { duration_secs: 1 };
        config.poll_interval_secs = Some(5);
        let (_tx, rx) = broadcast::channel(1);

        let started = std::time::Instant::now();
        let outcome = Experiment::new(&config).run(rx).await.unwrap();

        assert_eq!(outcome.workload_state, WorkloadState::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(outcome.duration_seconds >= 1.0);
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), "sleep 30");
        let (tx, rx) = broadcast::channel(1);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let _ = tx.send(());
        });
        let outcome = Experiment::new(&config).run(rx).await.unwrap();

        assert!(outcome.interrupted);
        assert_eq!(outcome.workload_state, WorkloadState::TimedOut);
        assert_eq!(outcome.collectors[0].status, CollectorStatus::Stopped);
    }

    #[tokio::test]
    async fn test_workload_spawn_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), "true");
        config.workload = CommandSpec::new("/nonexistent/plotter", Vec::<String>::new());
        let (_tx, rx) = broadcast::channel(1);

        let result = Experiment::new(&config).run(rx).await;
        assert!(matches!(result, Err(RunnerError::ProcessSpawn { .. })));
    }

    #[tokio::test]
    async fn test_missing_device_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), "exit 0");
        config.device.id = "nvme9n9".to_string();
        let (_tx, rx) = broadcast::channel(1);

        let outcome = Experiment::new(&config).run(rx).await.unwrap();
        assert!(outcome.initial_snapshot.is_err());
        assert!(outcome.final_snapshot.is_err());
        assert_eq!(outcome.workload_state, WorkloadState::Completed);
    }

    #[tokio::test]
    async fn test_snapshot_falls_back_to_collector_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), "exit 0");
        config.counter_source = dir.path().join("unreadable");
        std::fs::create_dir_all(&config.log_dir).unwrap();
        std::fs::write(
            config.log_dir.join("diskstats.log"),
            "1700000000 8 0 sda 1 0 8 0 10 0 80 0 0 0 0\n\
             1700000005 8 0 sda 1 0 8 0 30 0 240 0 0 0 0\n",
        )
        .unwrap();
        let (_tx, rx) = broadcast::channel(1);

        let outcome = Experiment::new(&config).run(rx).await.unwrap();
        let initial = outcome.initial_snapshot.unwrap();
        let last = outcome.final_snapshot.unwrap();
        assert_eq!(last.writes - initial.writes, 20);
        assert_eq!(last.sectors_written - initial.sectors_written, 160);
    }
}
