//! Mount helper supervision
//!
//! `rclone mount` never announces readiness. The only signal available is
//! that the helper has not exited: a launch counts as successful if the
//! process is still alive once the verification delay has passed.
//!
//! Every launch also gets a termination observer. If the helper dies while
//! its record is still registered, the observer removes the record; this is
//! the only way a mount disappears without an explicit unmount.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::catalog::RemoteDescriptor;
use crate::config::ManagerSettings;
use crate::error::{MountError, Result};
use crate::platform::{MountScheme, MountTarget, Platform};
use crate::process::{CommandRunner, CommandSpec, ProcessHandle};
use crate::registry::{MountRecord, MountRegistry, RemoteLocks};

/// Launches mount helpers and watches them for unexpected exits
pub struct MountSupervisor {
    platform: Platform,
    binary: String,
    vfs_cache_mode: String,
    extra_args: Vec<String>,
    verify_delay: Duration,
    runner: Arc<dyn CommandRunner>,
    registry: Arc<MountRegistry>,
    locks: Arc<RemoteLocks>,
}

impl MountSupervisor {
    pub fn new(
        platform: Platform,
        settings: &ManagerSettings,
        runner: Arc<dyn CommandRunner>,
        registry: Arc<MountRegistry>,
        locks: Arc<RemoteLocks>,
    ) -> Self {
        Self {
            platform,
            binary: settings.binary.clone(),
            vfs_cache_mode: settings.vfs_cache_mode.clone(),
            extra_args: settings.extra_args.clone(),
            verify_delay: settings.verify_delay,
            runner,
            registry,
            locks,
        }
    }

    /// Build the `rclone mount` invocation for a remote
    pub fn mount_command(&self, remote_name: &str, target: &MountTarget) -> CommandSpec {
        let mut command = CommandSpec::new(&self.binary)
            .arg("mount")
            .arg(format!("{}:", remote_name))
            .arg(target.helper_arg())
            .arg("--vfs-cache-mode")
            .arg(&self.vfs_cache_mode);

        if self.platform.scheme() == MountScheme::DriveLetter {
            command = command
                .arg("--volname")
                .arg(remote_name)
                .arg("--no-console");
        }

        command.args(&self.extra_args)
    }

    /// Spawn the helper, wait out the verification delay and register the mount
    ///
    /// The caller must hold the remote's lock for the whole call.
    pub async fn launch(&self, remote: &RemoteDescriptor, target: MountTarget) -> Result<MountRecord> {
        let command = self.mount_command(&remote.name, &target);
        info!("Mounting {}: at {:?}", remote.name, target.path());

        let process = self.runner.spawn(&command).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                MountError::BackendUnavailable(format!("{} not found: {}", self.binary, e))
            }
            _ => MountError::LaunchFailed {
                remote: remote.name.clone(),
                diagnostics: format!("failed to start {}: {}", self.binary, e),
            },
        })?;

        self.watch_for_exit(remote.name.clone(), process.clone());

        tokio::time::sleep(self.verify_delay).await;

        if process.is_running() {
            let record = MountRecord::new(&remote.name, &remote.provider_type, target, process);
            self.registry.put(record.clone());
            info!("Mounted {}: at {:?}", remote.name, record.mount_path());
            return Ok(record);
        }

        let report = process.exited().await;
        let output = report.diagnostics.trim();
        let diagnostics = if output.is_empty() {
            format!("{} with no output", report.status())
        } else {
            format!("{}: {}", report.status(), output)
        };
        error!("Mount helper for {} exited during startup ({})", remote.name, diagnostics);

        Err(MountError::LaunchFailed {
            remote: remote.name.clone(),
            diagnostics,
        })
    }

    /// Remove the remote's record if its helper exits while still registered
    fn watch_for_exit(&self, remote_name: String, process: ProcessHandle) {
        let registry = Arc::clone(&self.registry);
        let locks = Arc::clone(&self.locks);

        tokio::spawn(async move {
            let report = process.exited().await;
            let _guard = locks.lock(&remote_name).await;

            if registry
                .remove_if_process(&remote_name, process.launch_id())
                .is_some()
            {
                let err = MountError::UnexpectedTermination {
                    remote: remote_name.clone(),
                    status: report.status(),
                };
                error!("{}", err);
                let output = report.diagnostics.trim();
                if !output.is_empty() {
                    error!("Last output from {} helper:\n{}", remote_name, output);
                }
            }
        });
    }
}
