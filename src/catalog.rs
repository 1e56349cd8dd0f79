//! Remote catalog: which rclone remotes exist
//!
//! rclone owns remote configuration; we only read it through
//! `rclone listremotes --long`. Whether rclone is runnable at all is probed
//! once and remembered, so a missing binary costs one failed spawn per
//! session rather than one per call.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{MountError, Result};
use crate::process::{CommandRunner, CommandSpec};

/// Provider type reported when rclone prints none
pub const UNKNOWN_PROVIDER: &str = "unknown";

/// A configured rclone remote
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDescriptor {
    pub name: String,
    pub provider_type: String,
}

impl RemoteDescriptor {
    pub fn new(name: impl Into<String>, provider_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider_type: provider_type.into(),
        }
    }

    /// Human-readable provider name
    pub fn provider_name(&self) -> &'static str {
        provider_display_name(&self.provider_type)
    }
}

/// Display name for an rclone backend type
pub fn provider_display_name(provider_type: &str) -> &'static str {
    match provider_type {
        "drive" => "Google Drive",
        "onedrive" => "OneDrive",
        "dropbox" => "Dropbox",
        "s3" => "Amazon S3",
        "b2" => "Backblaze B2",
        "box" => "Box",
        "mega" => "MEGA",
        "pcloud" => "pCloud",
        "ftp" => "FTP",
        "sftp" => "SFTP",
        "webdav" => "WebDAV",
        "azureblob" => "Azure Blob",
        "googlecloudstorage" => "Google Cloud",
        _ => "Cloud Storage",
    }
}

/// Outcome of the last installation probe
#[derive(Debug, Clone, PartialEq, Eq)]
enum Availability {
    Unknown,
    Installed { version: String },
    Missing,
}

/// Reads the remote list from rclone
pub struct RemoteCatalog {
    runner: Arc<dyn CommandRunner>,
    binary: String,
    availability: Mutex<Availability>,
}

impl RemoteCatalog {
    pub fn new(runner: Arc<dyn CommandRunner>, binary: impl Into<String>) -> Self {
        Self {
            runner,
            binary: binary.into(),
            availability: Mutex::new(Availability::Unknown),
        }
    }

    /// Probe `rclone --version` and remember the answer
    pub async fn check_installed(&self) -> bool {
        let probe = CommandSpec::new(&self.binary).arg("--version");
        let result = self.runner.output(&probe).await;

        let availability = match result {
            Ok(output) if output.success => {
                let version = output.stdout.lines().next().unwrap_or("").trim().to_string();
                info!("Found {}", if version.is_empty() { &self.binary } else { &version });
                Availability::Installed { version }
            }
            Ok(output) => {
                warn!(
                    "{} --version failed: {}",
                    self.binary,
                    output.failure_reason()
                );
                Availability::Missing
            }
            Err(e) => {
                warn!("{} is not runnable: {}", self.binary, e);
                Availability::Missing
            }
        };

        let installed = matches!(availability, Availability::Installed { .. });
        *self.availability.lock() = availability;
        installed
    }

    /// Version line from the last successful probe
    pub fn version(&self) -> Option<String> {
        match &*self.availability.lock() {
            Availability::Installed { version } => Some(version.clone()),
            _ => None,
        }
    }

    /// Probe if needed and fail if rclone is known to be missing
    pub async fn require_installed(&self) -> Result<()> {
        let known = self.availability.lock().clone();
        let installed = match known {
            Availability::Unknown => self.check_installed().await,
            Availability::Installed { .. } => true,
            Availability::Missing => false,
        };
        if installed {
            Ok(())
        } else {
            Err(MountError::BackendUnavailable(format!(
                "{} is not installed or not runnable",
                self.binary
            )))
        }
    }

    /// Record that rclone could not be started after all
    pub fn mark_missing(&self) {
        *self.availability.lock() = Availability::Missing;
    }

    /// List configured remotes
    ///
    /// A missing rclone is not an error here: if the installation probe
    /// fails, whether earlier or as the first step of this call, the result
    /// is an empty list and later calls spawn nothing. `mount` is where a
    /// missing rclone surfaces as [`MountError::BackendUnavailable`]. Only a
    /// binary that passed the probe but then fails to list remotes yields
    /// that error from this method.
    pub async fn list_remotes(&self) -> Result<Vec<RemoteDescriptor>> {
        let known = self.availability.lock().clone();
        match known {
            Availability::Missing => {
                debug!("Skipping remote listing, {} unavailable", self.binary);
                return Ok(Vec::new());
            }
            Availability::Unknown => {
                if !self.check_installed().await {
                    return Ok(Vec::new());
                }
            }
            Availability::Installed { .. } => {}
        }

        let command = CommandSpec::new(&self.binary).args(["listremotes", "--long"]);
        let output = match self.runner.output(&command).await {
            Ok(output) => output,
            Err(e) => {
                if e.kind() == io::ErrorKind::NotFound {
                    self.mark_missing();
                }
                return Err(MountError::BackendUnavailable(format!(
                    "failed to run {}: {}",
                    command, e
                )));
            }
        };

        if !output.success {
            return Err(MountError::BackendUnavailable(format!(
                "{} failed: {}",
                command,
                output.failure_reason()
            )));
        }

        let remotes = parse_remote_list(&output.stdout);
        debug!("Found {} configured remote(s)", remotes.len());
        Ok(remotes)
    }
}

/// Parse `rclone listremotes --long` output (`name: type` per line)
pub fn parse_remote_list(stdout: &str) -> Vec<RemoteDescriptor> {
    stdout.lines().filter_map(parse_remote_line).collect()
}

fn parse_remote_line(line: &str) -> Option<RemoteDescriptor> {
    let line = line.trim();
    let (name, provider) = line.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let provider = provider.trim();
    let provider = if provider.is_empty() {
        UNKNOWN_PROVIDER
    } else {
        provider
    };
    Some(RemoteDescriptor::new(name, provider))
}
