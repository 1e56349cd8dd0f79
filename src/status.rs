//! Live mount status with usage statistics

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::debug;

use crate::platform::Platform;
use crate::process::CommandRunner;
use crate::registry::MountRecord;

/// Filesystem usage in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceUsage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

/// One active mount as reported to consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MountStatus {
    pub remote_name: String,
    pub mount_path: PathBuf,
    pub provider_type: String,
    pub mounted_at: DateTime<Utc>,
    pub total_bytes: Option<u64>,
    pub free_bytes: Option<u64>,
    pub used_bytes: Option<u64>,
}

impl MountStatus {
    fn new(record: &MountRecord, usage: Option<SpaceUsage>) -> Self {
        Self {
            remote_name: record.remote_name.clone(),
            mount_path: record.mount_path(),
            provider_type: record.provider_type.clone(),
            mounted_at: record.mounted_at,
            total_bytes: usage.map(|u| u.total),
            free_bytes: usage.map(|u| u.free),
            used_bytes: usage.map(|u| u.used),
        }
    }
}

/// Queries usage statistics for mount points
pub struct StatusReporter {
    platform: Platform,
    runner: Arc<dyn CommandRunner>,
}

impl StatusReporter {
    pub fn new(platform: Platform, runner: Arc<dyn CommandRunner>) -> Self {
        Self { platform, runner }
    }

    /// Build status entries for `records`, querying usage concurrently
    ///
    /// A failed query only blanks the usage fields of its own entry.
    pub async fn report(&self, records: &[MountRecord]) -> Vec<MountStatus> {
        let lookups = records.iter().map(|record| async move {
            let usage = self.space_usage(&record.mount_path()).await;
            MountStatus::new(record, usage)
        });
        join_all(lookups).await
    }

    /// Usage for the filesystem at `path`, or `None` if unavailable
    pub async fn space_usage(&self, path: &Path) -> Option<SpaceUsage> {
        let command = self.platform.space_query(path)?;
        match self.runner.output(&command).await {
            Ok(output) if output.success => {
                let usage = parse_df_output(&output.stdout);
                if usage.is_none() {
                    debug!("Unparseable df output for {:?}: {:?}", path, output.stdout);
                }
                usage
            }
            Ok(output) => {
                debug!("df failed for {:?}: {}", path, output.failure_reason());
                None
            }
            Err(e) => {
                debug!("df failed for {:?}: {}", path, e);
                None
            }
        }
    }
}

/// Parse `df -P -k` output into byte counts
///
/// Uses the last row: `Filesystem 1024-blocks Used Available Capacity Mounted on`.
/// rclone names the filesystem after the remote and both it and the mount
/// path may contain spaces, so the row is anchored on the `NN%` capacity
/// column and the three numbers before it.
pub fn parse_df_output(stdout: &str) -> Option<SpaceUsage> {
    let mut lines = stdout.lines().filter(|l| !l.trim().is_empty());
    // Header plus at least one data row
    lines.next()?;
    let row = lines.last()?;

    let columns: Vec<&str> = row.split_whitespace().collect();
    let capacity = (4..columns.len()).find(|&i| {
        is_capacity(columns[i]) && columns[i - 3..i].iter().all(|c| is_number(c))
    })?;

    let kib = |s: &str| s.parse::<u64>().ok()?.checked_mul(1024);
    Some(SpaceUsage {
        total: kib(columns[capacity - 3])?,
        used: kib(columns[capacity - 2])?,
        free: kib(columns[capacity - 1])?,
    })
}

fn is_number(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

fn is_capacity(token: &str) -> bool {
    token.strip_suffix('%').is_some_and(is_number)
}
