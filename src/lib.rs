//! remote-mount: mount lifecycle manager for rclone remotes
//!
//! This library exposes rclone remotes (Google Drive, Dropbox, S3, ...) as
//! local mount points and keeps track of them for the lifetime of a session.
//!
//! # Architecture
//!
//! - **Catalog**: reads the configured remotes from `rclone listremotes`.
//! - **Allocator**: picks a mount point, a directory under a base folder on
//!   Linux/macOS or a free drive letter on Windows.
//! - **Supervisor**: runs `rclone mount` as a child process, verifies it
//!   survives a startup grace period and watches it for unexpected exits.
//! - **Registry**: the in-memory table of active mounts.
//! - **Unmount**: best-effort teardown that always ends with the registry
//!   updated.
//! - **Mount Manager**: the consumer-facing API tying these together.
//!
//! # Example
//!
//! ```no_run
//! use remote_mount::config::ManagerSettings;
//! use remote_mount::mount::MountManager;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = MountManager::new(ManagerSettings::with_base_dir("/home/me/CloudMounts"));
//!
//! if manager.check_installed().await {
//!     for remote in manager.list_remotes().await? {
//!         let outcome = manager.mount(&remote.name, &remote.provider_type).await?;
//!         println!("{} mounted at {:?}", remote.name, outcome.mount_path);
//!     }
//! }
//!
//! for status in manager.get_mounted().await {
//!     println!("{}: {:?} bytes free", status.remote_name, status.free_bytes);
//! }
//!
//! manager.unmount_all().await;
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod catalog;
pub mod config;
pub mod env;
pub mod error;
pub mod mount;
pub mod platform;
pub mod process;
pub mod registry;
pub mod status;
pub mod supervisor;
pub mod unmount;

pub use error::{MountError, Result};
