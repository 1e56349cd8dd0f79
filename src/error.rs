use std::io;
use thiserror::Error;

/// Main error type for mount lifecycle operations
#[derive(Error, Debug)]
pub enum MountError {
    #[error("rclone is not available: {0}")]
    BackendUnavailable(String),

    #[error("No mount location available: {0}")]
    NoCapacity(String),

    #[error("Mount helper for '{remote}' exited during startup: {diagnostics}")]
    LaunchFailed { remote: String, diagnostics: String },

    /// Raised by the termination observer only; no caller ever receives it.
    #[error("Mount helper for '{remote}' terminated unexpectedly ({status})")]
    UnexpectedTermination { remote: String, status: String },

    #[error("Invalid remote name: {0:?}")]
    InvalidRemote(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl MountError {
    /// Whether this error means the rclone binary could not be run at all
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, MountError::BackendUnavailable(_))
    }
}

/// Result type alias for mount operations
pub type Result<T> = std::result::Result<T, MountError>;

/// Check that a remote name can be used as a single mount directory component.
///
/// rclone itself accepts a wider character set; we only reject names that would
/// escape the base directory or be misread as a `remote:path` pair.
pub fn validate_remote_name(name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed != name || name == "." || name == ".." {
        return Err(MountError::InvalidRemote(name.to_string()));
    }
    if name.contains(['/', '\\', ':']) || name.chars().any(char::is_control) {
        return Err(MountError::InvalidRemote(name.to_string()));
    }
    Ok(())
}
