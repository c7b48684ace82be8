//! Process handles for supervised collectors and the workload
//!
//! Every external unit is started through a [`ProcessSpawner`] and observed
//! through a [`ProcessHandle`]. The supervisor never talks to the OS
//! directly, which keeps its state machine testable with mock processes.

use super::CommandSpec;
use crate::error::{Result, RunnerError};
use std::fs::OpenOptions;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Signal used to ask a process to exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Interrupt,
    Terminate,
}

impl StopSignal {
    fn as_raw(self) -> libc::c_int {
        match self {
            StopSignal::Interrupt => libc::SIGINT,
            StopSignal::Terminate => libc::SIGTERM,
        }
    }
}

/// Handle to one running external process
pub trait ProcessHandle: Send {
    fn pid(&self) -> Option<u32>;

    /// Non-blocking liveness probe.
    ///
    /// Returns `false` only once the exit has been observed, so a `false`
    /// result means the process is gone and reaped.
    fn is_alive(&mut self) -> bool;

    /// Exit code once the process has been reaped; 128 + n for signal n
    fn exit_code(&self) -> Option<i32>;

    /// Ask the process (and its process group) to exit
    fn stop(&mut self, signal: StopSignal) -> std::io::Result<()>;

    fn force_kill(&mut self) -> std::io::Result<()>;
}

/// Starts external processes
pub trait ProcessSpawner: Send + Sync {
    /// Spawn `command` for `unit`, appending stdout and stderr to `log_path`
    /// when given.
    fn spawn(
        &self,
        unit: &str,
        command: &CommandSpec,
        log_path: Option<&Path>,
    ) -> Result<Box<dyn ProcessHandle>>;
}

/// [`ProcessHandle`] backed by a tokio child process.
///
/// The child leads its own process group so that signals also reach
/// anything it forked (shell loops, tool helpers).
pub struct ChildProcess {
    child: Child,
    pid: Option<u32>,
    exit: Option<ExitStatus>,
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            child,
            pid,
            exit: None,
        }
    }

    fn signal_group(&self, signal: libc::c_int) -> std::io::Result<()> {
        let Some(pid) = self.pid else {
            return Ok(());
        };

        // Negative pid targets the whole process group
        let ret = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
        if ret == 0 {
            return Ok(());
        }

        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err);
        }

        // No such group (yet): fall back to the leader alone
        let ret = unsafe { libc::kill(pid as libc::pid_t, signal) };
        let err = std::io::Error::last_os_error();
        if ret == 0 || err.raw_os_error() == Some(libc::ESRCH) {
            Ok(())
        } else {
            Err(err)
        }
    }
}

impl ProcessHandle for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn is_alive(&mut self) -> bool {
        if self.exit.is_some() {
            return false;
        }

        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exit = Some(status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                // Not confirmed dead, so it must not be replaced yet
                warn!(pid = ?self.pid, error = %e, "Failed to probe process state");
                true
            }
        }
    }

    fn exit_code(&self) -> Option<i32> {
        self.exit
            .map(|status| status.code().or_else(|| status.signal().map(|s| 128 + s)).unwrap_or(-1))
    }

    fn stop(&mut self, signal: StopSignal) -> std::io::Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        debug!(pid = ?self.pid, signal = ?signal, "Sending stop signal");
        self.signal_group(signal.as_raw())
    }

    fn force_kill(&mut self) -> std::io::Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        self.signal_group(libc::SIGKILL)?;
        match self.child.start_kill() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Spawns real OS processes through `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandSpawner;

impl CommandSpawner {
    pub fn new() -> Self {
        Self
    }

    fn log_stdio(unit: &str, log_path: &Path) -> Result<(Stdio, Stdio)> {
        let spawn_err = |source: std::io::Error| RunnerError::ProcessSpawn {
            unit: unit.to_string(),
            source,
        };

        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent).map_err(spawn_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .map_err(spawn_err)?;
        let stderr = file.try_clone().map_err(spawn_err)?;

        Ok((Stdio::from(file), Stdio::from(stderr)))
    }
}

impl ProcessSpawner for CommandSpawner {
    fn spawn(
        &self,
        unit: &str,
        command: &CommandSpec,
        log_path: Option<&Path>,
    ) -> Result<Box<dyn ProcessHandle>> {
        let (stdout, stderr) = match log_path {
            Some(path) => Self::log_stdio(unit, path)?,
            None => (Stdio::null(), Stdio::null()),
        };

        let child = Command::new(&command.program)
            .args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunnerError::ProcessSpawn {
                unit: unit.to_string(),
                source,
            })?;

        debug!(unit = %unit, pid = ?child.id(), program = %command.program, "Spawned process");
        Ok(Box::new(ChildProcess::new(child)))
    }
}
