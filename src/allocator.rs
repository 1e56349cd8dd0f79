//! Mount point allocation
//!
//! Directory platforms get `base_dir/<remote>`, cleaned of any stale mount
//! left behind by a previous session. Drive-letter platforms get the last
//! free letter scanning from `Z` down to `A`, which keeps clear of the low
//! letters Windows hands out to physical disks.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{MountError, Result};
use crate::platform::{MountScheme, MountTarget, Platform};
use crate::process::CommandRunner;

/// Maximum number of drive letters probed at once
const PROBE_CONCURRENCY: usize = 8;

/// Answers whether a drive letter is in use
#[async_trait]
pub trait DriveProbe: Send + Sync {
    async fn is_occupied(&self, letter: char) -> bool;
}

/// Probes `<letter>:\` on the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsDriveProbe;

#[async_trait]
impl DriveProbe for FsDriveProbe {
    async fn is_occupied(&self, letter: char) -> bool {
        tokio::fs::metadata(format!("{}:\\", letter)).await.is_ok()
    }
}

/// Drive letters handed out but not yet backed by a live mount
type Reserved = Arc<Mutex<HashSet<char>>>;

/// A drive letter held for an in-flight mount; released on drop
#[derive(Debug)]
pub struct LetterReservation {
    letter: char,
    reserved: Reserved,
}

impl Drop for LetterReservation {
    fn drop(&mut self) {
        self.reserved.lock().remove(&self.letter);
    }
}

/// Result of a successful allocation
#[derive(Debug)]
pub struct Allocation {
    pub target: MountTarget,
    /// Keeps concurrent mounts of other remotes off the same letter until
    /// the launch has resolved
    pub reservation: Option<LetterReservation>,
}

/// Computes mount targets for remotes
pub struct MountPointAllocator {
    platform: Platform,
    base_dir: PathBuf,
    runner: Arc<dyn CommandRunner>,
    probe: Arc<dyn DriveProbe>,
    reserved: Reserved,
}

impl MountPointAllocator {
    pub fn new(
        platform: Platform,
        base_dir: PathBuf,
        runner: Arc<dyn CommandRunner>,
        probe: Arc<dyn DriveProbe>,
    ) -> Self {
        Self {
            platform,
            base_dir,
            runner,
            probe,
            reserved: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Directory a remote mounts at on directory platforms
    pub fn directory_for(&self, remote_name: &str) -> PathBuf {
        self.base_dir.join(remote_name)
    }

    /// Pick a mount target for `remote_name`
    ///
    /// `in_use` lists drive letters already held by live mounts. The caller
    /// must hold the remote's lock.
    pub async fn allocate(&self, remote_name: &str, in_use: &[char]) -> Result<Allocation> {
        match self.platform.scheme() {
            MountScheme::Directory => {
                let dir = self.directory_for(remote_name);
                self.prepare_directory(&dir).await?;
                Ok(Allocation {
                    target: MountTarget::Directory(dir),
                    reservation: None,
                })
            }
            MountScheme::DriveLetter => self.allocate_letter(in_use).await,
        }
    }

    async fn allocate_letter(&self, in_use: &[char]) -> Result<Allocation> {
        let probe = Arc::clone(&self.probe);
        let occupied: HashSet<char> = stream::iter('A'..='Z')
            .map(|letter| {
                let probe = Arc::clone(&probe);
                async move { (letter, probe.is_occupied(letter).await) }
            })
            .buffer_unordered(PROBE_CONCURRENCY)
            .filter_map(|(letter, occupied)| async move { occupied.then_some(letter) })
            .collect()
            .await;

        let mut reserved = self.reserved.lock();
        let free = ('A'..='Z')
            .rev()
            .find(|l| !occupied.contains(l) && !in_use.contains(l) && !reserved.contains(l));

        match free {
            Some(letter) => {
                reserved.insert(letter);
                debug!("Allocated drive letter {}:", letter);
                Ok(Allocation {
                    target: MountTarget::DriveLetter(letter),
                    reservation: Some(LetterReservation {
                        letter,
                        reserved: Arc::clone(&self.reserved),
                    }),
                })
            }
            None => Err(MountError::NoCapacity(
                "all drive letters A-Z are in use".to_string(),
            )),
        }
    }

    /// Make sure `dir` exists and is empty, clearing a stale mount once if not
    async fn prepare_directory(&self, dir: &Path) -> Result<()> {
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            // A dead FUSE mount makes the path unusable until it is detached
            warn!("Cannot create mount point {:?} ({}), trying stale mount cleanup", dir, e);
            self.clear_stale_mount(dir).await;
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                MountError::NoCapacity(format!("cannot create mount point {:?}: {}", dir, e))
            })?;
            return Ok(());
        }

        match is_empty_dir(dir).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                info!("Mount point {:?} is not empty, assuming a stale mount", dir);
                self.clear_stale_mount(dir).await;
                self.recreate(dir).await
            }
            Err(e) => {
                info!("Mount point {:?} is unreadable ({}), assuming a stale mount", dir, e);
                self.clear_stale_mount(dir).await;
                self.recreate(dir).await
            }
        }
    }

    /// Re-create the directory after cleanup; never fails on a leftover mount
    async fn recreate(&self, dir: &Path) -> Result<()> {
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!(
                "Mount point {:?} still unusable after cleanup ({}), mounting over it",
                dir, e
            );
        }
        Ok(())
    }

    /// Best-effort forced unmount of whatever is attached at `dir`
    pub(crate) async fn clear_stale_mount(&self, dir: &Path) {
        let Some(command) = self.platform.forced_unmount(dir) else {
            return;
        };
        match self.runner.output(&command).await {
            Ok(output) if output.success => debug!("Detached stale mount at {:?}", dir),
            Ok(output) => debug!(
                "Stale mount cleanup at {:?} failed: {}",
                dir,
                output.failure_reason()
            ),
            Err(e) => debug!("Stale mount cleanup at {:?} failed: {}", dir, e),
        }
    }
}

async fn is_empty_dir(dir: &Path) -> io::Result<bool> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    Ok(entries.next_entry().await?.is_none())
}
