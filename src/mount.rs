//! Mount management and lifecycle

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::allocator::{DriveProbe, FsDriveProbe, MountPointAllocator};
use crate::catalog::{RemoteCatalog, RemoteDescriptor, UNKNOWN_PROVIDER};
use crate::config::ManagerSettings;
use crate::error::{validate_remote_name, Result};
use crate::platform::{MountTarget, Platform};
use crate::process::{CommandRunner, SystemRunner};
use crate::registry::{MountRecord, MountRegistry, RemoteLocks};
use crate::status::{MountStatus, StatusReporter};
use crate::supervisor::MountSupervisor;
use crate::unmount::{UnmountCoordinator, UnmountReport};

/// How long `unmount_all` waits for helpers to exit after signalling them
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Result of a successful mount request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOutcome {
    pub remote_name: String,
    pub mount_path: PathBuf,
    /// The remote was already mounted and nothing new was started
    pub already_mounted: bool,
}

impl MountOutcome {
    fn new(record: &MountRecord, already_mounted: bool) -> Self {
        Self {
            remote_name: record.remote_name.clone(),
            mount_path: record.mount_path(),
            already_mounted,
        }
    }
}

/// Mount manager - handles lifecycle of all remote mounts for one session
pub struct MountManager {
    platform: Platform,
    settings: ManagerSettings,
    catalog: RemoteCatalog,
    allocator: MountPointAllocator,
    supervisor: MountSupervisor,
    unmounter: UnmountCoordinator,
    status: StatusReporter,
    registry: Arc<MountRegistry>,
    locks: Arc<RemoteLocks>,
}

impl MountManager {
    /// Create a mount manager for the host platform
    pub fn new(settings: ManagerSettings) -> Self {
        Self::with_parts(
            settings,
            Platform::current(),
            Arc::new(SystemRunner),
            Arc::new(FsDriveProbe),
        )
    }

    /// Create a mount manager with explicit platform, process runner and drive probe
    pub fn with_parts(
        settings: ManagerSettings,
        platform: Platform,
        runner: Arc<dyn CommandRunner>,
        probe: Arc<dyn DriveProbe>,
    ) -> Self {
        let registry = Arc::new(MountRegistry::new());
        let locks = Arc::new(RemoteLocks::new());

        Self {
            platform,
            catalog: RemoteCatalog::new(Arc::clone(&runner), settings.binary.clone()),
            allocator: MountPointAllocator::new(
                platform,
                settings.base_dir.clone(),
                Arc::clone(&runner),
                probe,
            ),
            supervisor: MountSupervisor::new(
                platform,
                &settings,
                Arc::clone(&runner),
                Arc::clone(&registry),
                Arc::clone(&locks),
            ),
            unmounter: UnmountCoordinator::new(platform, Arc::clone(&runner), Arc::clone(&registry)),
            status: StatusReporter::new(platform, runner),
            registry,
            locks,
            settings,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Parent directory of directory-style mounts
    pub fn base_dir(&self) -> &Path {
        &self.settings.base_dir
    }

    /// Probe whether rclone can be run
    pub async fn check_installed(&self) -> bool {
        self.catalog.check_installed().await
    }

    /// rclone version line from the last successful probe
    pub fn tool_version(&self) -> Option<String> {
        self.catalog.version()
    }

    /// List the remotes rclone has configured
    pub async fn list_remotes(&self) -> Result<Vec<RemoteDescriptor>> {
        self.catalog.list_remotes().await
    }

    /// Mount a remote, or return the existing mount if it is already active
    pub async fn mount(&self, remote_name: &str, provider_type: &str) -> Result<MountOutcome> {
        validate_remote_name(remote_name)?;
        let _guard = self.locks.lock(remote_name).await;

        if let Some(existing) = self.registry.get(remote_name) {
            debug!("{} is already mounted at {:?}", remote_name, existing.mount_path());
            return Ok(MountOutcome::new(&existing, true));
        }

        self.catalog.require_installed().await?;

        let allocation = self
            .allocator
            .allocate(remote_name, &self.registry.drive_letters())
            .await?;
        let target = allocation.target.clone();

        let provider_type = if provider_type.trim().is_empty() {
            UNKNOWN_PROVIDER
        } else {
            provider_type
        };
        let remote = RemoteDescriptor::new(remote_name, provider_type);

        match self.supervisor.launch(&remote, allocation.target).await {
            Ok(record) => Ok(MountOutcome::new(&record, false)),
            Err(e) => {
                if e.is_backend_unavailable() {
                    self.catalog.mark_missing();
                }
                if let MountTarget::Directory(dir) = &target {
                    if let Err(rm) = tokio::fs::remove_dir(dir).await {
                        debug!("Left mount point {:?} in place: {}", dir, rm);
                    }
                }
                Err(e)
            }
        }
    }

    /// Unmount a remote; succeeds even if it was not mounted
    pub async fn unmount(&self, remote_name: &str) -> UnmountReport {
        let _guard = self.locks.lock(remote_name).await;
        self.unmounter.unmount(remote_name).await
    }

    /// Unmount every active remote and give the helpers a moment to exit
    pub async fn unmount_all(&self) -> Vec<UnmountReport> {
        let records = self.registry.list_all();
        if records.is_empty() {
            return Vec::new();
        }
        info!("Unmounting all remotes");

        let reports = join_all(records.iter().map(|r| self.unmount(&r.remote_name))).await;

        let exits = join_all(records.iter().map(|r| r.process().exited()));
        if tokio::time::timeout(SHUTDOWN_GRACE, exits).await.is_err() {
            warn!("Some mount helpers were still running {:?} after unmount", SHUTDOWN_GRACE);
        }

        reports
    }

    /// Active mounts with best-effort usage statistics
    pub async fn get_mounted(&self) -> Vec<MountStatus> {
        let records = self.registry.list_all();
        self.status.report(&records).await
    }

    pub fn is_mounted(&self, remote_name: &str) -> bool {
        self.registry.get(remote_name).is_some()
    }

    /// Number of active mounts
    pub fn count(&self) -> usize {
        self.registry.len()
    }
}

impl Drop for MountManager {
    fn drop(&mut self) {
        for record in self.registry.list_all() {
            record.process().terminate();
        }
    }
}
