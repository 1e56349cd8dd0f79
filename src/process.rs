//! External process execution
//!
//! Every interaction with an outside program (rclone, fusermount, df) goes
//! through [`CommandRunner`]. Commands are argument vectors handed directly to
//! the spawn primitive, so no shell ever interprets remote names or paths.
//!
//! Long-lived helpers are represented by a [`ProcessHandle`]: a cloneable view
//! that answers "is it still running", resolves when the process exits, and can
//! request termination. The side that actually owns the OS process holds the
//! matching [`ProcessControl`].

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Number of trailing stderr lines kept as diagnostics
const DIAGNOSTIC_LINES: usize = 20;

/// How long to wait for the stderr reader after the process has exited
const DIAGNOSTIC_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

static NEXT_LAUNCH_ID: AtomicU64 = AtomicU64::new(1);

/// A program plus its argument vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl CommandSpec {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Program name as a lossy string (for logs and test assertions)
    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Arguments as lossy strings
    pub fn arg_strings(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Captured result of a short-lived command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Best description of why the command failed
    pub fn failure_reason(&self) -> String {
        let stderr = self.stderr.trim();
        match (self.code, stderr.is_empty()) {
            (_, false) => stderr.to_string(),
            (Some(code), true) => format!("exit code {}", code),
            (None, true) => "terminated by signal".to_string(),
        }
    }
}

/// How a supervised process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    /// Exit code, `None` if killed by a signal or unknown
    pub code: Option<i32>,
    /// Trailing stderr output of the process
    pub diagnostics: String,
}

impl ExitReport {
    pub fn new(code: Option<i32>, diagnostics: impl Into<String>) -> Self {
        Self {
            code,
            diagnostics: diagnostics.into(),
        }
    }

    fn unknown() -> Self {
        Self::new(None, "process monitor went away")
    }

    /// Short human-readable status ("exit code 1", "terminated by signal")
    pub fn status(&self) -> String {
        match self.code {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Cloneable view of a running helper process
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    launch_id: u64,
    pid: Option<u32>,
    exit: watch::Receiver<Option<ExitReport>>,
    terminate: mpsc::UnboundedSender<()>,
}

/// Owner side of a [`ProcessHandle`]: reports the exit and receives kill requests
#[derive(Debug)]
pub struct ProcessControl {
    exit: watch::Sender<Option<ExitReport>>,
    terminate: mpsc::UnboundedReceiver<()>,
}

impl ProcessHandle {
    /// Create a handle together with the control side that drives it
    pub fn pair(pid: Option<u32>) -> (ProcessHandle, ProcessControl) {
        let (exit_tx, exit_rx) = watch::channel(None);
        let (term_tx, term_rx) = mpsc::unbounded_channel();
        let handle = ProcessHandle {
            launch_id: NEXT_LAUNCH_ID.fetch_add(1, Ordering::Relaxed),
            pid,
            exit: exit_rx,
            terminate: term_tx,
        };
        let control = ProcessControl {
            exit: exit_tx,
            terminate: term_rx,
        };
        (handle, control)
    }

    /// Unique id of this launch, distinct even if the OS reuses a pid
    pub fn launch_id(&self) -> u64 {
        self.launch_id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// True until an exit has been reported (or the control side is gone)
    pub fn is_running(&self) -> bool {
        let exited = self.exit.borrow().is_some();
        !exited && self.exit.has_changed().is_ok()
    }

    /// Ask the owner to kill the process. Does not wait for the exit.
    ///
    /// Returns false if nobody is listening any more, which means the process
    /// has already been reaped.
    pub fn terminate(&self) -> bool {
        self.terminate.send(()).is_ok()
    }

    /// Resolve once the process has exited
    pub async fn exited(&self) -> ExitReport {
        let mut exit = self.exit.clone();
        loop {
            let current = exit.borrow_and_update().clone();
            if let Some(report) = current {
                return report;
            }
            if exit.changed().await.is_err() {
                let last = exit.borrow().clone();
                return last.unwrap_or_else(ExitReport::unknown);
            }
        }
    }
}

impl ProcessControl {
    /// Resolves when a handle asks for termination.
    ///
    /// Returns `false` once every handle has been dropped.
    pub async fn termination_requested(&mut self) -> bool {
        self.terminate.recv().await.is_some()
    }

    /// Publish the exit to every handle
    pub fn exit(self, report: ExitReport) {
        self.exit.send_replace(Some(report));
    }
}

/// Seam for running external programs
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and capture its output
    async fn output(&self, command: &CommandSpec) -> io::Result<CommandOutput>;

    /// Start a long-lived process and return a handle to it
    ///
    /// Must be called from within a tokio runtime.
    fn spawn(&self, command: &CommandSpec) -> io::Result<ProcessHandle>;
}

/// Runs commands on the host via `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn output(&self, command: &CommandSpec) -> io::Result<CommandOutput> {
        debug!("Running: {}", command);
        let output = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(CommandOutput {
            code: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn spawn(&self, command: &CommandSpec) -> io::Result<ProcessHandle> {
        debug!("Spawning: {}", command);
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let (handle, control) = ProcessHandle::pair(child.id());
        let label = match child.id() {
            Some(pid) => format!("{} pid={}", command.program_name(), pid),
            None => command.program_name(),
        };

        let stderr_tail = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(collect_stderr_tail(stderr, label.clone())));
        tokio::spawn(supervise_child(child, control, stderr_tail, label));

        Ok(handle)
    }
}

/// Wait for the child to exit, honouring termination requests in the meantime
async fn supervise_child(
    mut child: Child,
    mut control: ProcessControl,
    stderr_tail: Option<JoinHandle<String>>,
    label: String,
) {
    let mut handles_alive = true;
    let status = loop {
        if !handles_alive {
            break child.wait().await;
        }
        tokio::select! {
            status = child.wait() => break status,
            requested = control.termination_requested() => {
                if requested {
                    debug!("Terminating {}", label);
                    if let Err(e) = request_stop(&mut child) {
                        warn!("Failed to signal {}: {}", label, e);
                    }
                } else {
                    handles_alive = false;
                }
            }
        }
    };

    let diagnostics = match stderr_tail {
        Some(task) => match tokio::time::timeout(DIAGNOSTIC_DRAIN_TIMEOUT, task).await {
            Ok(Ok(text)) => text,
            _ => String::new(),
        },
        None => String::new(),
    };

    let report = match status {
        Ok(status) => ExitReport::new(status.code(), diagnostics),
        Err(e) => {
            warn!("Failed to wait for {}: {}", label, e);
            ExitReport::new(None, e.to_string())
        }
    };
    debug!("{} exited: {}", label, report.status());
    control.exit(report);
}

/// Ask the child to stop
///
/// On Unix this is SIGTERM rather than SIGKILL so rclone can flush its VFS
/// cache and detach the mount on its own.
#[cfg(unix)]
fn request_stop(child: &mut Child) -> io::Result<()> {
    let Some(pid) = child.id() else {
        // Already reaped
        return Ok(());
    };
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn request_stop(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

/// Forward stderr lines to the log and keep the last few as diagnostics
async fn collect_stderr_tail(stderr: ChildStderr, label: String) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail: VecDeque<String> = VecDeque::with_capacity(DIAGNOSTIC_LINES);

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!("[{}] {}", label, line);
                if tail.len() == DIAGNOSTIC_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok(None) => break,
            Err(e) => {
                debug!("[{}] stderr read error: {}", label, e);
                break;
            }
        }
    }

    Vec::from(tail).join("\n")
}
