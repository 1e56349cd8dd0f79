//! Unmount coordination
//!
//! Tearing a mount down is a sequence of best-effort steps. Each may fail on
//! its own (the helper already died, the forced unmount finds nothing
//! mounted, the directory is still busy) without stopping the rest. The one
//! step that always happens is removing the registry record.

use std::fmt;
use std::io;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::platform::{MountTarget, Platform};
use crate::process::CommandRunner;
use crate::registry::MountRegistry;

/// Sub-steps of an unmount that can fail without failing the unmount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmountStep {
    /// Platform forced-unmount command
    ForcedUnmount,
    /// Removal of the mount point directory
    RemoveDirectory,
}

impl fmt::Display for UnmountStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnmountStep::ForcedUnmount => write!(f, "forced unmount"),
            UnmountStep::RemoveDirectory => write!(f, "mount point removal"),
        }
    }
}

/// A tolerated sub-step failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub step: UnmountStep,
    pub reason: String,
}

/// What an unmount did
///
/// Unmount always succeeds in the sense that matters: afterwards the remote
/// is no longer registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmountReport {
    pub remote_name: String,
    /// Whether a mount record existed when the unmount started
    pub was_mounted: bool,
    pub failures: Vec<StepFailure>,
}

impl UnmountReport {
    fn new(remote_name: &str) -> Self {
        Self {
            remote_name: remote_name.to_string(),
            was_mounted: false,
            failures: Vec::new(),
        }
    }

    fn fail(&mut self, step: UnmountStep, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Unmount {}: {} failed: {}", self.remote_name, step, reason);
        self.failures.push(StepFailure { step, reason });
    }

    /// True if every sub-step succeeded
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs the unmount sequence for one remote
pub struct UnmountCoordinator {
    platform: Platform,
    runner: Arc<dyn CommandRunner>,
    registry: Arc<MountRegistry>,
}

impl UnmountCoordinator {
    pub fn new(
        platform: Platform,
        runner: Arc<dyn CommandRunner>,
        registry: Arc<MountRegistry>,
    ) -> Self {
        Self {
            platform,
            runner,
            registry,
        }
    }

    /// Unmount `remote_name`; a no-op if it is not registered
    ///
    /// The caller must hold the remote's lock.
    pub async fn unmount(&self, remote_name: &str) -> UnmountReport {
        let mut report = UnmountReport::new(remote_name);

        let Some(record) = self.registry.get(remote_name) else {
            debug!("Unmount {}: not mounted", remote_name);
            return report;
        };
        report.was_mounted = true;
        info!("Unmounting {} from {:?}", remote_name, record.mount_path());

        // 1. Ask the helper to stop; its exit is not awaited
        if !record.process().terminate() {
            debug!("Unmount {}: helper had already exited", remote_name);
        }

        // 2. Detach whatever is left at the mount point
        if let MountTarget::Directory(dir) = &record.target {
            if let Some(command) = self.platform.forced_unmount(dir) {
                match self.runner.output(&command).await {
                    Ok(output) if output.success => {
                        debug!("Unmount {}: {} succeeded", remote_name, command)
                    }
                    Ok(output) => report.fail(UnmountStep::ForcedUnmount, output.failure_reason()),
                    Err(e) => report.fail(UnmountStep::ForcedUnmount, e.to_string()),
                }
            }
        }

        // 3. The authoritative state change
        self.registry.remove(remote_name);

        // 4. Remove the mount point if nothing is left in it
        if let MountTarget::Directory(dir) = &record.target {
            match tokio::fs::remove_dir(dir).await {
                Ok(()) => debug!("Removed mount point {:?}", dir),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => report.fail(UnmountStep::RemoveDirectory, e.to_string()),
            }
        }

        info!("Unmounted {}", remote_name);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::process::{CommandOutput, CommandSpec, ProcessControl, ProcessHandle};
    use crate::registry::MountRecord;

    struct ScriptedRunner {
        succeed: bool,
        commands: Mutex<Vec<CommandSpec>>,
    }

    impl ScriptedRunner {
        fn new(succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                succeed,
                commands: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn output(&self, command: &CommandSpec) -> io::Result<CommandOutput> {
            self.commands.lock().push(command.clone());
            if self.succeed {
                Ok(CommandOutput::success(""))
            } else {
                Ok(CommandOutput::failure(1, "fusermount: entry not found in /etc/mtab"))
            }
        }

        fn spawn(&self, _command: &CommandSpec) -> io::Result<ProcessHandle> {
            Err(io::Error::from(io::ErrorKind::Unsupported))
        }
    }

    fn register(registry: &MountRegistry, name: &str, target: MountTarget) -> ProcessControl {
        let (handle, control) = ProcessHandle::pair(Some(1000));
        registry.put(MountRecord::new(name, "drive", target, handle));
        control
    }

    #[tokio::test]
    async fn test_unmount_unknown_remote_is_noop() {
        let runner = ScriptedRunner::new(true);
        let registry = Arc::new(MountRegistry::new());
        let coordinator = UnmountCoordinator::new(Platform::Linux, runner.clone(), registry);

        let report = coordinator.unmount("gdrive").await;
        assert!(!report.was_mounted);
        assert!(report.is_clean());
        assert!(runner.commands.lock().is_empty());
    }

    #[tokio::test]
    async fn test_clean_directory_unmount() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("gdrive");
        std::fs::create_dir(&dir).unwrap();

        let runner = ScriptedRunner::new(true);
        let registry = Arc::new(MountRegistry::new());
        let mut control = register(&registry, "gdrive", MountTarget::Directory(dir.clone()));
        let coordinator = UnmountCoordinator::new(Platform::Linux, runner.clone(), registry.clone());

        let report = coordinator.unmount("gdrive").await;
        assert!(report.was_mounted);
        assert!(report.is_clean());
        assert!(registry.get("gdrive").is_none());
        assert!(!dir.exists());
        assert!(control.termination_requested().await);

        let commands = runner.commands.lock();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].program_name(), "fusermount");
    }

    #[tokio::test]
    async fn test_partial_failure_still_clears_record() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("gdrive");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("busy"), b"x").unwrap();

        let runner = ScriptedRunner::new(false);
        let registry = Arc::new(MountRegistry::new());
        let _control = register(&registry, "gdrive", MountTarget::Directory(dir.clone()));
        let coordinator = UnmountCoordinator::new(Platform::Linux, runner, registry.clone());

        let report = coordinator.unmount("gdrive").await;
        assert!(report.was_mounted);
        let steps: Vec<UnmountStep> = report.failures.iter().map(|f| f.step).collect();
        assert_eq!(
            steps,
            vec![UnmountStep::ForcedUnmount, UnmountStep::RemoveDirectory]
        );
        assert!(registry.get("gdrive").is_none());
        assert!(dir.exists());
    }

    #[tokio::test]
    async fn test_drive_letter_unmount_runs_no_commands() {
        let runner = ScriptedRunner::new(true);
        let registry = Arc::new(MountRegistry::new());
        let mut control = register(&registry, "gdrive", MountTarget::DriveLetter('Z'));
        let coordinator = UnmountCoordinator::new(Platform::Windows, runner.clone(), registry.clone());

        let report = coordinator.unmount("gdrive").await;
        assert!(report.is_clean());
        assert!(registry.is_empty());
        assert!(runner.commands.lock().is_empty());
        assert!(control.termination_requested().await);
    }

    #[tokio::test]
    async fn test_already_exited_helper_is_not_a_failure() {
        let registry = Arc::new(MountRegistry::new());
        let control = register(
            &registry,
            "gdrive",
            MountTarget::Directory(PathBuf::from("/nonexistent/remote-mount/gdrive")),
        );
        drop(control);

        let coordinator =
            UnmountCoordinator::new(Platform::Linux, ScriptedRunner::new(true), registry.clone());
        let report = coordinator.unmount("gdrive").await;
        assert!(report.is_clean());
        assert!(registry.is_empty());
    }
}
