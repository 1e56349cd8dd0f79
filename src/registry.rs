//! Live mount table
//!
//! [`MountRegistry`] is the single source of truth for "is remote X mounted".
//! Mutations happen only while the caller holds that remote's lock from
//! [`RemoteLocks`], which linearizes mount, unmount and crash cleanup for one
//! remote while leaving different remotes independent.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::process::ProcessHandle;
use crate::platform::MountTarget;

/// An active mount
#[derive(Debug, Clone)]
pub struct MountRecord {
    pub remote_name: String,
    pub provider_type: String,
    pub target: MountTarget,
    pub mounted_at: DateTime<Utc>,
    process: ProcessHandle,
}

impl MountRecord {
    pub fn new(
        remote_name: impl Into<String>,
        provider_type: impl Into<String>,
        target: MountTarget,
        process: ProcessHandle,
    ) -> Self {
        Self {
            remote_name: remote_name.into(),
            provider_type: provider_type.into(),
            target,
            mounted_at: Utc::now(),
            process,
        }
    }

    /// Local path where the remote is visible
    pub fn mount_path(&self) -> PathBuf {
        self.target.path()
    }

    /// Handle to the mount helper serving this record
    pub fn process(&self) -> &ProcessHandle {
        &self.process
    }
}

/// In-memory table of active mounts keyed by remote name
#[derive(Debug, Default)]
pub struct MountRegistry {
    mounts: Mutex<HashMap<String, MountRecord>>,
}

impl MountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, remote_name: &str) -> Option<MountRecord> {
        self.mounts.lock().get(remote_name).cloned()
    }

    /// Snapshot of every active mount, ordered by remote name
    pub fn list_all(&self) -> Vec<MountRecord> {
        let mut records: Vec<MountRecord> = self.mounts.lock().values().cloned().collect();
        records.sort_by(|a, b| a.remote_name.cmp(&b.remote_name));
        records
    }

    pub fn len(&self) -> usize {
        self.mounts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.lock().is_empty()
    }

    /// Drive letters held by active mounts
    pub fn drive_letters(&self) -> Vec<char> {
        self.mounts
            .lock()
            .values()
            .filter_map(|r| r.target.drive_letter())
            .collect()
    }

    pub(crate) fn put(&self, record: MountRecord) {
        self.mounts
            .lock()
            .insert(record.remote_name.clone(), record);
    }

    pub(crate) fn remove(&self, remote_name: &str) -> Option<MountRecord> {
        self.mounts.lock().remove(remote_name)
    }

    /// Remove the record only if it is still served by the given launch
    pub(crate) fn remove_if_process(&self, remote_name: &str, launch_id: u64) -> Option<MountRecord> {
        let mut mounts = self.mounts.lock();
        match mounts.get(remote_name) {
            Some(record) if record.process.launch_id() == launch_id => mounts.remove(remote_name),
            _ => None,
        }
    }
}

/// One async lock per remote name
///
/// Entries exist only while someone holds or waits for them, so the map
/// stays as small as the set of remotes with an operation in flight.
#[derive(Debug, Default)]
pub struct RemoteLocks {
    locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl RemoteLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `remote_name`
    pub async fn lock(&self, remote_name: &str) -> RemoteGuard<'_> {
        let lock = self
            .locks
            .entry(remote_name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        RemoteGuard {
            locks: self,
            remote_name: remote_name.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Number of remotes with a lock currently held or awaited
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one remote; drops the map entry once it is idle
#[derive(Debug)]
pub struct RemoteGuard<'a> {
    locks: &'a RemoteLocks,
    remote_name: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RemoteGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Waiters hold their own clone of the Arc, so a count of one means
        // the map is the only owner left. Both sides run under the shard lock.
        self.locks
            .locks
            .remove_if(self.remote_name.as_str(), |_, lock| Arc::strong_count(lock) == 1);
    }
}
