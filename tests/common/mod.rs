//! Shared fakes for manager tests
//!
//! `FakeRunner` stands in for rclone, fusermount and df. Mount helpers are
//! simulated with `ProcessHandle::pair`, driven by a task that exits on a
//! timer or when termination is requested, so tests run on tokio's paused
//! clock.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use remote_mount::allocator::DriveProbe;
use remote_mount::config::ManagerSettings;
use remote_mount::mount::MountManager;
use remote_mount::platform::Platform;
use remote_mount::process::{
    CommandOutput, CommandRunner, CommandSpec, ExitReport, ProcessControl, ProcessHandle,
};

/// Verification delay used by every test manager
pub const VERIFY_DELAY: Duration = Duration::from_millis(2000);

/// How a simulated mount helper behaves once spawned
#[derive(Debug, Clone, Copy)]
pub enum Helper {
    /// Keeps running until asked to stop
    RunForever,
    /// Exits with the given code after the given time
    ExitAfter(Duration, i32),
}

/// Scripted stand-in for every external command
pub struct FakeRunner {
    installed: AtomicBool,
    remotes: Mutex<String>,
    helpers: Mutex<HashMap<String, Helper>>,
    df: Mutex<HashMap<String, String>>,
    fail_unmount: AtomicBool,
    next_pid: AtomicU32,
    /// Commands run to completion, in order
    pub commands: Mutex<Vec<CommandSpec>>,
    /// Commands spawned as long-lived helpers, in order
    pub spawned: Mutex<Vec<CommandSpec>>,
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            installed: AtomicBool::new(true),
            remotes: Mutex::new(String::new()),
            helpers: Mutex::new(HashMap::new()),
            df: Mutex::new(HashMap::new()),
            fail_unmount: AtomicBool::new(false),
            next_pid: AtomicU32::new(4000),
            commands: Mutex::new(Vec::new()),
            spawned: Mutex::new(Vec::new()),
        })
    }

    pub fn set_installed(&self, installed: bool) {
        self.installed.store(installed, Ordering::SeqCst);
    }

    pub fn set_remotes(&self, listing: &str) {
        *self.remotes.lock() = listing.to_string();
    }

    pub fn set_helper(&self, remote: &str, helper: Helper) {
        self.helpers.lock().insert(remote.to_string(), helper);
    }

    /// Make `df` succeed for `path` with a single data row
    ///
    /// The filesystem is named `<dir name>:` the way rclone names its mounts.
    pub fn set_df(&self, path: &Path, total_kib: u64, used_kib: u64) {
        let filesystem = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stdout = format!(
            "Filesystem 1024-blocks Used Available Capacity Mounted on\n\
             {}: {} {} {} 10% {}\n",
            filesystem,
            total_kib,
            used_kib,
            total_kib - used_kib,
            path.display()
        );
        self.df
            .lock()
            .insert(path.to_string_lossy().into_owned(), stdout);
    }

    pub fn set_fail_unmount(&self, fail: bool) {
        self.fail_unmount.store(fail, Ordering::SeqCst);
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().len()
    }

    /// Completed commands whose program is `program`
    pub fn commands_named(&self, program: &str) -> Vec<CommandSpec> {
        self.commands
            .lock()
            .iter()
            .filter(|c| c.program_name() == program)
            .cloned()
            .collect()
    }

    fn not_found() -> io::Error {
        io::Error::new(io::ErrorKind::NotFound, "No such file or directory")
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn output(&self, command: &CommandSpec) -> io::Result<CommandOutput> {
        self.commands.lock().push(command.clone());
        let args = command.arg_strings();

        match command.program_name().as_str() {
            "rclone" => {
                if !self.installed.load(Ordering::SeqCst) {
                    return Err(Self::not_found());
                }
                match args.first().map(String::as_str) {
                    Some("--version") => Ok(CommandOutput::success(
                        "rclone v1.66.0\n- os/version: test\n",
                    )),
                    Some("listremotes") => Ok(CommandOutput::success(self.remotes.lock().clone())),
                    _ => Ok(CommandOutput::failure(1, "unknown command")),
                }
            }
            "fusermount" | "umount" => {
                if self.fail_unmount.load(Ordering::SeqCst) {
                    Ok(CommandOutput::failure(1, "fusermount: entry not found in /etc/mtab"))
                } else {
                    Ok(CommandOutput::success(""))
                }
            }
            "df" => {
                let path = args.last().cloned().unwrap_or_default();
                match self.df.lock().get(&path) {
                    Some(stdout) => Ok(CommandOutput::success(stdout.clone())),
                    None => Ok(CommandOutput::failure(1, "df: Transport endpoint is not connected")),
                }
            }
            _ => Err(Self::not_found()),
        }
    }

    fn spawn(&self, command: &CommandSpec) -> io::Result<ProcessHandle> {
        if !self.installed.load(Ordering::SeqCst) {
            return Err(Self::not_found());
        }
        self.spawned.lock().push(command.clone());

        let remote = command
            .arg_strings()
            .get(1)
            .map(|r| r.trim_end_matches(':').to_string())
            .unwrap_or_default();
        let helper = self
            .helpers
            .lock()
            .get(&remote)
            .copied()
            .unwrap_or(Helper::RunForever);

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let (handle, control) = ProcessHandle::pair(Some(pid));
        tokio::spawn(drive_helper(control, helper));
        Ok(handle)
    }
}

async fn drive_helper(mut control: ProcessControl, helper: Helper) {
    match helper {
        Helper::RunForever => {
            control.termination_requested().await;
            control.exit(ExitReport::new(None, ""));
        }
        Helper::ExitAfter(after, code) => {
            tokio::select! {
                _ = tokio::time::sleep(after) => {
                    control.exit(ExitReport::new(
                        Some(code),
                        "CRITICAL: Failed to create file system: didn't find section in config file",
                    ));
                }
                _ = control.termination_requested() => {
                    control.exit(ExitReport::new(None, ""));
                }
            }
        }
    }
}

/// Drive probe reporting a fixed set of occupied letters
pub struct OccupiedLetters(pub HashSet<char>);

impl OccupiedLetters {
    pub fn new(letters: impl IntoIterator<Item = char>) -> Arc<Self> {
        Arc::new(Self(letters.into_iter().collect()))
    }
}

#[async_trait]
impl DriveProbe for OccupiedLetters {
    async fn is_occupied(&self, letter: char) -> bool {
        self.0.contains(&letter)
    }
}

/// Manager for a directory-mount platform rooted at `base_dir`
pub fn linux_manager(base_dir: &Path, runner: Arc<FakeRunner>) -> MountManager {
    let mut settings = ManagerSettings::with_base_dir(base_dir);
    settings.verify_delay = VERIFY_DELAY;
    MountManager::with_parts(
        settings,
        Platform::Linux,
        runner,
        OccupiedLetters::new(std::iter::empty::<char>()),
    )
}

/// Manager for a drive-letter platform with the given letters occupied
pub fn windows_manager(
    runner: Arc<FakeRunner>,
    occupied: impl IntoIterator<Item = char>,
) -> MountManager {
    let mut settings = ManagerSettings::with_base_dir("C:\\CloudMounts");
    settings.verify_delay = VERIFY_DELAY;
    MountManager::with_parts(settings, Platform::Windows, runner, OccupiedLetters::new(occupied))
}
