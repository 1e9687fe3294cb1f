use std::os::fd::OwnedFd;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::unix::pipe;
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use crate::error::RunError;

/// Capacity of the per-run event channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Grace period used when `start` has to stop a still-active run
const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(2);

/// An external command to execute
///
/// Holds a program and its argument vector. Immutable once submitted to
/// [`CommandRunner::start`]. No semantic validation happens here; a bad
/// application ID is only discovered through the spawned process's exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    program: String,
    args: Vec<String>,
}

impl Command {
    /// Create a command from a program and its arguments
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Create a command executed via `sh -c`
    pub fn shell(command: impl Into<String>) -> Self {
        Self::new("sh", ["-c".to_string(), command.into()])
    }

    /// Get the program name
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Get the argument vector
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Terminal outcome of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResult {
    /// True iff the process exited with status zero
    pub success: bool,
    /// Diagnostic text when the runner itself failed to spawn or manage the
    /// process; empty when the outcome came from the child's own exit code
    pub error_detail: String,
}

impl CompletionResult {
    fn exited(success: bool) -> Self {
        Self {
            success,
            error_detail: String::new(),
        }
    }

    fn fault(error: &RunError) -> Self {
        Self {
            success: false,
            error_detail: error.to_string(),
        }
    }
}

/// Event emitted by a running command
#[derive(Debug)]
pub enum RunnerEvent {
    /// One line of combined stdout/stderr output, in emission order
    Line(String),
    /// Terminal result, delivered exactly once per run and strictly after
    /// all line events. Suppressed when the run was stopped by the caller.
    Completed(CompletionResult),
}

/// Shared control state for one run
///
/// The cancellation flag is the only state mutated from both the caller's
/// context and the streaming task.
#[derive(Clone)]
struct RunControl {
    cancelled: Arc<AtomicBool>,
    pid: Option<i32>,
    finished: watch::Receiver<bool>,
}

impl RunControl {
    /// Request cooperative termination and wait up to `grace_period` for the
    /// streaming task to end.
    ///
    /// Best-effort: returns once the task has ended or the grace period
    /// elapses. A child that ignored SIGTERM gets a SIGKILL on the way out.
    async fn stop(&self, grace_period: Duration) {
        // A run that already reached a terminal state has reaped its child;
        // its pid may since have been recycled and must not be signalled.
        if *self.finished.borrow() {
            return;
        }
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(pid) = self.pid {
            log::debug!("stopping pid {pid}");
            let _ = signal::kill(Pid::from_raw(pid), Signal::SIGTERM);
        }
        let mut finished = self.finished.clone();
        if timeout(grace_period, finished.wait_for(|done| *done))
            .await
            .is_err()
        {
            if let Some(pid) = self.pid {
                log::warn!("pid {pid} did not stop within {grace_period:?}, sending SIGKILL");
                let _ = signal::kill(Pid::from_raw(pid), Signal::SIGKILL);
            }
        }
    }

    fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }
}

/// Handle for one in-flight command execution
///
/// Owns the receiving end of the run's event channel. The runner does not
/// retain any output; lines are forwarded here and discarded.
pub struct RunHandle {
    events: mpsc::Receiver<RunnerEvent>,
    control: RunControl,
}

impl RunHandle {
    /// Receive the next event asynchronously
    ///
    /// Returns `None` once the run is over and all events have been drained.
    /// A cancelled run closes the channel without a `Completed` event.
    pub async fn next_event(&mut self) -> Option<RunnerEvent> {
        self.events.recv().await
    }

    /// Stop this run, waiting up to `grace_period` for teardown
    ///
    /// Idempotent; calling stop on an already-stopped run is a no-op.
    pub async fn stop(&mut self, grace_period: Duration) {
        self.control.stop(grace_period).await;
    }

    /// Check whether the streaming task has ended
    pub fn is_finished(&self) -> bool {
        self.control.is_finished()
    }

    /// Get the child process ID, if the process was spawned
    pub fn pid(&self) -> Option<u32> {
        self.control.pid.map(|pid| pid as u32)
    }
}

/// Command execution manager
///
/// Runs at most one external command at a time. Each run streams its combined
/// stdout/stderr line by line over an event channel and reports a terminal
/// [`CompletionResult`] exactly once, unless the run was cancelled.
#[derive(Default)]
pub struct CommandRunner {
    active: Option<RunControl>,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a command, stopping any still-active run first
    ///
    /// The previous run, if any, is terminated and waited for (bounded by a
    /// two second grace period) before the new process spawns, so two runs
    /// never interleave their events. Returns immediately with a handle; all
    /// further progress is observed through the handle's events.
    ///
    /// Spawn failures are not returned as errors: the handle receives a
    /// single failed `Completed` event carrying the diagnostic, and no line
    /// events.
    pub async fn start(&mut self, command: Command) -> RunHandle {
        self.stop(DEFAULT_STOP_GRACE).await;

        let cancelled = Arc::new(AtomicBool::new(false));
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (finished_tx, finished_rx) = watch::channel(false);

        let control = match spawn_combined(&command) {
            Ok((child, output)) => {
                log::debug!("spawned `{command}` as pid {:?}", child.id());
                let control = RunControl {
                    cancelled: Arc::clone(&cancelled),
                    pid: child.id().map(|pid| pid as i32),
                    finished: finished_rx,
                };
                tokio::spawn(stream_output(
                    child,
                    output,
                    events_tx,
                    cancelled,
                    finished_tx,
                ));
                control
            }
            Err(error) => {
                log::error!("could not start `{command}`: {error}");
                let _ = events_tx
                    .send(RunnerEvent::Completed(CompletionResult::fault(&error)))
                    .await;
                let _ = finished_tx.send(true);
                RunControl {
                    cancelled,
                    pid: None,
                    finished: finished_rx,
                }
            }
        };

        self.active = Some(control.clone());
        RunHandle {
            events: events_rx,
            control,
        }
    }

    /// Stop the active run, if any, waiting up to `grace_period` for teardown
    ///
    /// No-op when nothing is running. The runner is safe to reuse for a new
    /// `start` as soon as this returns, even if a hung child is still being
    /// torn down in the background.
    pub async fn stop(&mut self, grace_period: Duration) {
        if let Some(control) = self.active.take() {
            control.stop(grace_period).await;
        }
    }

    /// Check whether a run is currently active
    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|control| !control.is_finished())
    }
}

/// Spawn a child with stdout and stderr merged into a single pipe
///
/// Both streams share one write end, so the read side observes lines in the
/// exact order the process emitted them.
fn spawn_combined(command: &Command) -> Result<(Child, pipe::Receiver), RunError> {
    if command.program.is_empty() {
        return Err(RunError::EmptyCommand);
    }

    let (reader, writer) = std::io::pipe().map_err(RunError::Pipe)?;
    let stderr = writer.try_clone().map_err(RunError::Pipe)?;

    let child = tokio::process::Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(writer))
        .stderr(Stdio::from(stderr))
        .spawn()
        .map_err(|source| RunError::Spawn {
            program: command.program.clone(),
            source,
        })?;

    let output = pipe::Receiver::from_owned_fd(OwnedFd::from(reader)).map_err(RunError::Pipe)?;
    Ok((child, output))
}

/// Drain the child's output and deliver the terminal event
///
/// Runs independently of the caller's context so I/O never blocks it. Owns
/// the read end of the pipe exclusively and consumes it continuously, so the
/// child never stalls on a full pipe buffer.
async fn stream_output(
    mut child: Child,
    output: pipe::Receiver,
    events: mpsc::Sender<RunnerEvent>,
    cancelled: Arc<AtomicBool>,
    finished: watch::Sender<bool>,
) {
    let drained = drain_lines(output, &events, &cancelled).await;

    if cancelled.load(Ordering::SeqCst) {
        // Caller-initiated stop: reap the child and emit no completion.
        // The stopping caller already knows the outcome, and a late
        // "finished" event could race the next run's start.
        let _ = child.kill().await;
        let _ = finished.send(true);
        return;
    }

    let completion = match drained {
        Ok(()) => match child.wait().await {
            Ok(status) => CompletionResult::exited(status.success()),
            Err(source) => CompletionResult::fault(&RunError::Stream(source)),
        },
        Err(error) => {
            let _ = child.kill().await;
            CompletionResult::fault(&error)
        }
    };

    let _ = events.send(RunnerEvent::Completed(completion)).await;
    let _ = finished.send(true);
}

/// Forward complete output lines until EOF or cancellation
///
/// The cancellation flag is checked once per line, between reads. Send
/// failures are ignored: if the subscriber dropped its handle the pipe still
/// has to be drained so the child can make progress.
async fn drain_lines(
    output: pipe::Receiver,
    events: &mpsc::Sender<RunnerEvent>,
    cancelled: &AtomicBool,
) -> Result<(), RunError> {
    let mut lines = BufReader::new(output).lines();
    while !cancelled.load(Ordering::SeqCst) {
        match lines.next_line().await? {
            Some(line) => {
                let _ = events.send(RunnerEvent::Line(line)).await;
            }
            None => break,
        }
    }
    Ok(())
}
