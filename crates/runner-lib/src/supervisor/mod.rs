//! Collector supervision
//!
//! The [`Supervisor`] owns one [`CollectorState`] per registered
//! [`CollectorSpec`]. It starts every collector, restarts the ones that die
//! while the workload runs, and shuts all of them down in registration
//! order once the run ends.

mod process;


pub use process::{ChildProcess, CommandSpawner, ProcessHandle, ProcessSpawner, StopSignal};

use crate::error::{Result, RunnerError};
use crate::observability::RunMetrics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How often `stop_all` re-checks liveness during the grace period
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How to launch an external program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// A telemetry collector: started by spawning `command` with its output
/// appended to `log_path`, considered alive while that process runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorSpec {
    pub name: String,
    pub command: CommandSpec,
    pub log_path: PathBuf,
}

/// Lifecycle of one collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectorStatus {
    Starting,
    Running,
    Dead,
    Restarting,
    Stopped,
}

impl std::fmt::Display for CollectorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CollectorStatus::Starting => "starting",
            CollectorStatus::Running => "running",
            CollectorStatus::Dead => "dead",
            CollectorStatus::Restarting => "restarting",
            CollectorStatus::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// Runtime state of one collector, owned by the supervisor
pub struct CollectorState {
    spec: CollectorSpec,
    handle: Option<Box<dyn ProcessHandle>>,
    status: CollectorStatus,
    restart_count: u32,
    fatal_at_start: bool,
    last_error: Option<String>,
}

impl CollectorState {
    fn new(spec: CollectorSpec) -> Self {
        Self {
            spec,
            handle: None,
            status: CollectorStatus::Starting,
            restart_count: 0,
            fatal_at_start: false,
            last_error: None,
        }
    }

    pub fn spec(&self) -> &CollectorSpec {
        &self.spec
    }

    pub fn status(&self) -> CollectorStatus {
        self.status
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    pub fn fatal_at_start(&self) -> bool {
        self.fatal_at_start
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().and_then(|h| h.pid())
    }

    fn is_alive(&mut self) -> bool {
        self.handle.as_mut().is_some_and(|h| h.is_alive())
    }

    fn exit_code(&self) -> Option<i32> {
        self.handle.as_ref().and_then(|h| h.exit_code())
    }

    pub fn report(&self) -> CollectorReport {
        CollectorReport {
            name: self.spec.name.clone(),
            status: self.status,
            restart_count: self.restart_count,
            fatal_at_start: self.fatal_at_start,
            last_error: self.last_error.clone(),
        }
    }
}

/// Serializable view of a collector's final state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorReport {
    pub name: String,
    pub status: CollectorStatus,
    pub restart_count: u32,
    pub fatal_at_start: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// A collector that could not be started at all
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartFailure {
    pub collector: String,
    pub error: String,
}

/// Result of [`Supervisor::start_all`]
#[derive(Debug, Clone, Default)]
pub struct StartReport {
    pub started: usize,
    pub failures: Vec<StartFailure>,
}

impl StartReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Result of one supervision poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollResults {
    pub alive: usize,
    pub restarted: usize,
    pub failed_restarts: usize,
}

/// Result of [`Supervisor::stop_all`]
#[derive(Debug, Clone, Default)]
pub struct StopReport {
    pub interrupted: usize,
    pub force_killed: Vec<String>,
}

/// Owns and supervises the telemetry collectors
pub struct Supervisor {
    spawner: Arc<dyn ProcessSpawner>,
    states: Vec<CollectorState>,
    metrics: RunMetrics,
}

impl Supervisor {
    pub fn new(spawner: Arc<dyn ProcessSpawner>) -> Self {
        Self {
            spawner,
            states: Vec::new(),
            metrics: RunMetrics::new(),
        }
    }

    /// Register a collector; names must be unique
    pub fn register(&mut self, spec: CollectorSpec) -> Result<()> {
        if self.states.iter().any(|s| s.spec.name == spec.name) {
            return Err(RunnerError::DuplicateName(spec.name));
        }
        debug!(collector = %spec.name, log = %spec.log_path.display(), "Registered collector");
        self.states.push(CollectorState::new(spec));
        Ok(())
    }

    pub fn states(&self) -> &[CollectorState] {
        &self.states
    }

    pub fn get(&self, name: &str) -> Option<&CollectorState> {
        self.states.iter().find(|s| s.spec.name == name)
    }

    pub fn reports(&self) -> Vec<CollectorReport> {
        self.states.iter().map(CollectorState::report).collect()
    }

    /// Restart counts in registration order
    pub fn restart_counts(&self) -> Vec<(String, u32)> {
        self.states
            .iter()
            .map(|s| (s.spec.name.clone(), s.restart_count))
            .collect()
    }

    /// Launch every registered collector in registration order.
    ///
    /// A collector that fails to spawn is marked dead and fatal-at-start; it
    /// is reported to the caller and never restarted. The others still start.
    pub fn start_all(&mut self) -> StartReport {
        let mut report = StartReport::default();

        for state in &mut self.states {
            state.status = CollectorStatus::Starting;
            match self
                .spawner
                .spawn(&state.spec.name, &state.spec.command, Some(&state.spec.log_path))
            {
                Ok(handle) => {
                    info!(
                        collector = %state.spec.name,
                        pid = ?handle.pid(),
                        "Collector started"
                    );
                    state.handle = Some(handle);
                    state.status = CollectorStatus::Running;
                    report.started += 1;
                }
                Err(e) => {
                    warn!(collector = %state.spec.name, error = %e, "Collector failed to start");
                    state.status = CollectorStatus::Dead;
                    state.fatal_at_start = true;
                    state.last_error = Some(e.to_string());
                    report.failures.push(StartFailure {
                        collector: state.spec.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        self.metrics.set_live_collectors(report.started as i64);
        report
    }

    /// Check every collector once and restart the dead ones.
    ///
    /// A replacement is spawned only after the old handle has reported the
    /// process as exited, so a spec never has two live processes.
    pub fn poll_once(&mut self) -> PollResults {
        let mut results = PollResults::default();

        for state in &mut self.states {
            if state.fatal_at_start || state.status == CollectorStatus::Stopped {
                continue;
            }

            if state.is_alive() {
                state.status = CollectorStatus::Running;
                results.alive += 1;
                continue;
            }

            warn!(
                collector = %state.spec.name,
                exit_code = ?state.exit_code(),
                restart_count = state.restart_count,
                "Collector is not alive, restarting"
            );
            state.status = CollectorStatus::Restarting;
            state.handle = None;

            match self
                .spawner
                .spawn(&state.spec.name, &state.spec.command, Some(&state.spec.log_path))
            {
                Ok(handle) => {
                    state.handle = Some(handle);
                    state.restart_count += 1;
                    state.status = CollectorStatus::Running;
                    state.last_error = None;
                    self.metrics.inc_collector_restarts(&state.spec.name);
                    results.restarted += 1;
                    results.alive += 1;
                }
                Err(e) => {
                    warn!(collector = %state.spec.name, error = %e, "Collector restart failed, retrying next poll");
                    state.status = CollectorStatus::Dead;
                    state.last_error = Some(e.to_string());
                    results.failed_restarts += 1;
                }
            }
        }

        self.metrics.set_live_collectors(results.alive as i64);
        results
    }

    /// Interrupt every live collector in registration order, wait up to
    /// `grace` for them to exit, then force-kill the survivors.
    pub async fn stop_all(&mut self, grace: Duration) -> StopReport {
        let mut report = StopReport::default();

        for state in &mut self.states {
            if !state.is_alive() {
                continue;
            }
            if let Some(handle) = state.handle.as_mut() {
                match handle.stop(StopSignal::Interrupt) {
                    Ok(()) => report.interrupted += 1,
                    Err(e) => {
                        warn!(collector = %state.spec.name, error = %e, "Failed to interrupt collector")
                    }
                }
            }
        }

        let deadline = Instant::now() + grace;
        loop {
            let any_alive = self.states.iter_mut().any(|s| s.is_alive());
            let now = Instant::now();
            if !any_alive || now >= deadline {
                break;
            }
            tokio::time::sleep(STOP_POLL_INTERVAL.min(deadline - now)).await;
        }

        for state in &mut self.states {
            if state.is_alive() {
                warn!(collector = %state.spec.name, "Collector ignored interrupt, killing");
                if let Some(handle) = state.handle.as_mut() {
                    if let Err(e) = handle.force_kill() {
                        warn!(collector = %state.spec.name, error = %e, "Failed to kill collector");
                    }
                }
                report.force_killed.push(state.spec.name.clone());
            }
            state.status = CollectorStatus::Stopped;
        }

        self.metrics.set_live_collectors(0);
        info!(
            interrupted = report.interrupted,
            force_killed = report.force_killed.len(),
            "All collectors stopped"
        );
        report
    }
}
