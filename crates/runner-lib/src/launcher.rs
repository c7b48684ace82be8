//! Workload lifecycle
//!
//! The launcher starts the monitored workload, answers whether the
//! supervision loop should keep going, and records wall-clock start and end
//! times for the summary.

use crate::config::RunMode;
use crate::error::{Result, RunnerError};
use crate::supervisor::{CommandSpec, ProcessHandle, ProcessSpawner, StopSignal};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// How often `stop` re-checks liveness during the grace period
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadState {
    NotStarted,
    Running,
    Completed,
    TimedOut,
}

impl std::fmt::Display for WorkloadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkloadState::NotStarted => write!(f, "not_started"),
            WorkloadState::Running => write!(f, "running"),
            WorkloadState::Completed => write!(f, "completed"),
            WorkloadState::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// Starts and tracks the monitored workload
pub struct WorkloadLauncher {
    command: CommandSpec,
    log_path: Option<PathBuf>,
    mode: RunMode,
    spawner: Arc<dyn ProcessSpawner>,
    handle: Option<Box<dyn ProcessHandle>>,
    state: WorkloadState,
    started: Option<Instant>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl WorkloadLauncher {
    pub fn new(command: CommandSpec, mode: RunMode, spawner: Arc<dyn ProcessSpawner>) -> Self {
        Self {
            command,
            log_path: None,
            mode,
            spawner,
            handle: None,
            state: WorkloadState::NotStarted,
            started: None,
            started_at: None,
            ended_at: None,
        }
    }

    /// Append the workload's own output to this file
    pub fn with_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    pub fn state(&self) -> WorkloadState {
        self.state
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.handle.as_ref().and_then(|h| h.exit_code())
    }

    /// Wall-clock run time; up to now while still running
    pub fn duration_seconds(&self) -> f64 {
        match self.started_at {
            Some(start) => {
                let end = self.ended_at.unwrap_or_else(Utc::now);
                (end - start).num_milliseconds() as f64 / 1000.0
            }
            None => 0.0,
        }
    }

    /// Spawn the workload; NotStarted -> Running
    pub fn start(&mut self) -> Result<()> {
        if self.state != WorkloadState::NotStarted {
            return Err(RunnerError::Config(format!(
                "workload cannot be started from state {}",
                self.state
            )));
        }

        let handle = self
            .spawner
            .spawn("workload", &self.command, self.log_path.as_deref())?;
        info!(program = %self.command.program, pid = ?handle.pid(), "Workload started");

        self.handle = Some(handle);
        self.state = WorkloadState::Running;
        self.started = Some(Instant::now());
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Non-blocking liveness check; moves to Completed once the exit is seen
    pub fn is_alive(&mut self) -> bool {
        if self.state != WorkloadState::Running {
            return false;
        }

        let alive = self.handle.as_mut().is_some_and(|h| h.is_alive());
        if !alive {
            self.state = WorkloadState::Completed;
            self.ended_at = Some(Utc::now());
            info!(exit_code = ?self.exit_code(), "Workload exited");
        }
        alive
    }

    /// Time left before a fixed-duration run must end
    pub fn remaining(&self) -> Option<Duration> {
        match (self.mode, self.started) {
            (RunMode::FixedDuration(limit), Some(started)) => {
                Some(limit.saturating_sub(started.elapsed()))
            }
            _ => None,
        }
    }

    /// Whether the supervision loop should run another poll.
    ///
    /// In fixed-duration mode only the deadline counts; the workload's own
    /// liveness is still probed so an early exit is recorded.
    pub fn should_continue(&mut self) -> bool {
        match self.mode {
            RunMode::UntilExit => self.is_alive(),
            RunMode::FixedDuration(_) => {
                self.is_alive();
                self.remaining().is_some_and(|left| !left.is_zero())
            }
        }
    }

    /// Stop a workload that is still running at the fixed deadline.
    ///
    /// Sends SIGINT, waits up to `grace`, then force-kills. The state ends
    /// TimedOut; a workload that already exited stays Completed.
    pub async fn stop(&mut self, grace: Duration) {
        if !self.is_alive() {
            return;
        }

        let Some(handle) = self.handle.as_mut() else {
            return;
        };

        info!(pid = ?handle.pid(), "Stopping workload");
        if let Err(e) = handle.stop(StopSignal::Interrupt) {
            warn!(error = %e, "Failed to interrupt workload");
        }

        let deadline = Instant::now() + grace;
        while handle.is_alive() {
            let now = Instant::now();
            if now >= deadline {
                warn!("Workload ignored interrupt, killing");
                if let Err(e) = handle.force_kill() {
                    warn!(error = %e, "Failed to kill workload");
                }
                break;
            }
            tokio::time::sleep(STOP_POLL_INTERVAL.min(deadline - now)).await;
        }

        self.state = WorkloadState::TimedOut;
        self.ended_at = Some(Utc::now());
    }
}
