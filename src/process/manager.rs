//! Asynchronous external command execution.
//!
//! [`ProcessManager::execute`] starts `sh -c <command>` and returns an
//! identifier immediately. Standard output is drained by one reader thread per
//! process so a chatty child never blocks on a full pipe; the scheduling thread
//! only ever polls. [`ProcessControl::poll_completed`] hands back every process
//! that exited since the previous poll and retires its identifier.
//!
//! # Design
//!
//! - **No blocking**: `execute`, `poll_completed` and `kill` return immediately
//! - **Exactly once**: a finished process is removed from the table in the same
//!   call that reports it
//! - **Monotonic ids**: identifiers count up from 1 and are never reused
//! - **Whole-tree kill**: on Unix each command leads its own process group and
//!   `kill` signals the group, so commands the shell forked die with it

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::core::ProcessError;

/// Identifier of an in-flight process.
pub type ProcessId = u64;

/// Final status of a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Exited successfully.
    Completed {
        /// Exit code (zero).
        code: i32,
    },
    /// Ran but did not succeed: non-zero exit, signal, or output read failure.
    Failed(String),
}

impl ProcessStatus {
    /// Whether the process exited successfully.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Result of one finished process, delivered exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutcome {
    /// Identifier returned by `execute`.
    pub id: ProcessId,
    /// Command line as launched.
    pub command: String,
    /// Captured standard output (lossy UTF-8). Empty when the process printed nothing.
    pub output: String,
    /// How the process ended.
    pub status: ProcessStatus,
    /// Time from launch to the poll that observed completion.
    pub elapsed: Duration,
}

/// The capability modules use to run external commands.
///
/// Implemented by [`ProcessManager`]; tests substitute scripted stubs.
pub trait ProcessControl: Send {
    /// Launch `command` without waiting for it.
    ///
    /// # Errors
    ///
    /// `ProcessError::SpawnFailed` if the process could not be started; no
    /// identifier is issued in that case.
    fn execute(&mut self, command: &str) -> Result<ProcessId, ProcessError>;

    /// Every process that finished since the previous call, keyed by id.
    /// Reported identifiers are retired.
    fn poll_completed(&mut self) -> BTreeMap<ProcessId, ProcessOutcome>;

    /// Terminate a running process. Its outcome is still reported by a later
    /// `poll_completed`, with a `Failed` status.
    ///
    /// # Errors
    ///
    /// `ProcessError::NotFound` if the id is unknown or already retired.
    fn kill(&mut self, id: ProcessId) -> Result<(), ProcessError>;

    /// Launch instant of an in-flight process.
    fn launched_at(&self, id: ProcessId) -> Option<Instant>;

    /// Number of processes not yet reported.
    fn in_flight(&self) -> usize;
}

/// Message from a reader thread: everything the child wrote, or why reading stopped.
struct ReaderOutput {
    id: ProcessId,
    bytes: Vec<u8>,
    error: Option<String>,
}

struct Running {
    command: String,
    child: Child,
    launched_at: Instant,
    output: Option<(Vec<u8>, Option<String>)>,
    exit: Option<Result<ExitStatus, String>>,
    killed: bool,
}

/// Process manager backed by `sh -c` and per-process reader threads.
pub struct ProcessManager {
    running: HashMap<ProcessId, Running>,
    next_id: ProcessId,
    output_tx: Sender<ReaderOutput>,
    output_rx: Receiver<ReaderOutput>,
    shell: String,
}

impl ProcessManager {
    /// Create a manager running commands through `/bin/sh`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_shell("sh")
    }

    /// Create a manager running commands through `shell -c`.
    #[must_use]
    pub fn with_shell(shell: impl Into<String>) -> Self {
        let (output_tx, output_rx) = unbounded();
        Self {
            running: HashMap::new(),
            next_id: 1,
            output_tx,
            output_rx,
            shell: shell.into(),
        }
    }

    fn spawn_reader(
        &self,
        id: ProcessId,
        mut stdout: std::process::ChildStdout,
    ) -> std::io::Result<()> {
        let tx = self.output_tx.clone();
        std::thread::Builder::new()
            .name(format!("proc-out-{id}"))
            .spawn(move || {
                let mut bytes = Vec::new();
                let error = stdout.read_to_end(&mut bytes).err().map(|e| e.to_string());
                // The manager may be gone; nothing left to report to.
                let _ = tx.send(ReaderOutput { id, bytes, error });
            })
            .map(|_| ())
    }

    fn drain_reader_output(&mut self) {
        for msg in self.output_rx.try_iter() {
            if let Some(entry) = self.running.get_mut(&msg.id) {
                entry.output = Some((msg.bytes, msg.error));
            }
        }
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessControl for ProcessManager {
    fn execute(&mut self, command: &str) -> Result<ProcessId, ProcessError> {
        let spawn_failed = |source| ProcessError::SpawnFailed {
            command: command.to_string(),
            source,
        };
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut cmd, 0);
        let mut child = cmd.spawn().map_err(spawn_failed)?;

        let id = self.next_id;
        let Some(stdout) = child.stdout.take() else {
            // Piped above, so this is unreachable in practice.
            let _ = kill_tree(&mut child);
            let _ = child.wait();
            return Err(spawn_failed(std::io::Error::other("stdout not captured")));
        };
        if let Err(err) = self.spawn_reader(id, stdout) {
            let _ = kill_tree(&mut child);
            let _ = child.wait();
            return Err(spawn_failed(err));
        }

        self.next_id += 1;
        tracing::info!(id, command = %command, pid = child.id(), "process launched");
        self.running.insert(
            id,
            Running {
                command: command.to_string(),
                child,
                launched_at: Instant::now(),
                output: None,
                exit: None,
                killed: false,
            },
        );
        Ok(id)
    }

    fn poll_completed(&mut self) -> BTreeMap<ProcessId, ProcessOutcome> {
        self.drain_reader_output();

        let mut finished = Vec::new();
        for (id, entry) in &mut self.running {
            if entry.exit.is_none() {
                match entry.child.try_wait() {
                    Ok(Some(status)) => entry.exit = Some(Ok(status)),
                    Ok(None) => {}
                    Err(err) => entry.exit = Some(Err(err.to_string())),
                }
            }
            if entry.exit.is_some() && entry.output.is_some() {
                finished.push(*id);
            }
        }

        let mut completed = BTreeMap::new();
        for id in finished {
            let Some(entry) = self.running.remove(&id) else {
                continue;
            };
            let outcome = finish(id, entry);
            tracing::debug!(
                id,
                status = ?outcome.status,
                elapsed_ms = outcome.elapsed.as_millis(),
                "process completed"
            );
            completed.insert(id, outcome);
        }
        completed
    }

    fn kill(&mut self, id: ProcessId) -> Result<(), ProcessError> {
        self.drain_reader_output();
        let entry = self.running.get_mut(&id).ok_or(ProcessError::NotFound(id))?;
        // The shell may be gone while something it forked still holds stdout open.
        let alive = entry.exit.is_none() || entry.output.is_none();
        if alive && !entry.killed {
            kill_tree(&mut entry.child)
                .map_err(|source| ProcessError::KillFailed { id, source })?;
            entry.killed = true;
            tracing::info!(id, command = %entry.command, "process killed");
        }
        Ok(())
    }

    fn launched_at(&self, id: ProcessId) -> Option<Instant> {
        self.running.get(&id).map(|e| e.launched_at)
    }

    fn in_flight(&self) -> usize {
        self.running.len()
    }
}

impl Drop for ProcessManager {
    fn drop(&mut self) {
        for (id, entry) in &mut self.running {
            if entry.exit.is_some() && entry.output.is_some() {
                continue;
            }
            if let Err(err) = kill_tree(&mut entry.child) {
                tracing::debug!(id, error = %err, "kill on drop");
            }
            if entry.exit.is_none() {
                let _ = entry.child.wait();
            }
        }
    }
}

/// SIGKILL the process group `child` leads.
#[cfg(unix)]
#[allow(unsafe_code)]
fn kill_tree(child: &mut Child) -> std::io::Result<()> {
    let pgid = libc::pid_t::try_from(child.id()).map_err(std::io::Error::other)?;
    // SAFETY: kill(2) only takes integers; a negative pid addresses a process group.
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        child.kill()
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) -> std::io::Result<()> {
    child.kill()
}

fn finish(id: ProcessId, entry: Running) -> ProcessOutcome {
    let (bytes, read_error) = entry.output.unwrap_or_default();
    let status = match (entry.exit, read_error) {
        (Some(Err(err)), _) => ProcessStatus::Failed(format!("wait failed: {err}")),
        (_, Some(err)) => ProcessStatus::Failed(format!("output read failed: {err}")),
        (Some(Ok(status)), None) => exit_status(status, entry.killed),
        (None, None) => ProcessStatus::Failed("exit status unavailable".into()),
    };
    ProcessOutcome {
        id,
        command: entry.command,
        output: String::from_utf8_lossy(&bytes).into_owned(),
        status,
        elapsed: entry.launched_at.elapsed(),
    }
}

fn exit_status(status: ExitStatus, killed: bool) -> ProcessStatus {
    if killed && !status.success() {
        return ProcessStatus::Failed("killed".into());
    }
    match status.code() {
        Some(0) => ProcessStatus::Completed { code: 0 },
        Some(code) => ProcessStatus::Failed(format!("exit code {code}")),
        None => ProcessStatus::Failed("terminated by signal".into()),
    }
}
