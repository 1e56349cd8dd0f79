//! Host platform differences
//!
//! Windows attaches remotes to drive letters; Linux and macOS bind them to
//! directories under a base folder. The two families also differ in how a
//! stuck mount is forcibly detached and how usage statistics are queried.

use std::path::{Path, PathBuf};

use crate::process::CommandSpec;

/// Addressing scheme for mount points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountScheme {
    /// Each remote gets a subdirectory of the base mount directory
    Directory,
    /// Each remote gets a free drive letter
    DriveLetter,
}

/// Host operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
}

impl Platform {
    /// Platform this binary was built for
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    pub fn scheme(&self) -> MountScheme {
        match self {
            Platform::Windows => MountScheme::DriveLetter,
            Platform::Linux | Platform::MacOs => MountScheme::Directory,
        }
    }

    /// Command that detaches a mount by path, if the platform has one
    pub fn forced_unmount(&self, path: &Path) -> Option<CommandSpec> {
        match self {
            Platform::Linux => Some(
                CommandSpec::new("fusermount")
                    .arg("-u")
                    .arg(path.as_os_str()),
            ),
            Platform::MacOs => Some(CommandSpec::new("umount").arg(path.as_os_str())),
            Platform::Windows => None,
        }
    }

    /// Command that reports usage for the filesystem at `path`, if supported
    ///
    /// `-P` keeps each filesystem on a single line so long device names never
    /// wrap the numeric columns onto a second row.
    pub fn space_query(&self, path: &Path) -> Option<CommandSpec> {
        match self {
            Platform::Linux | Platform::MacOs => Some(
                CommandSpec::new("df")
                    .args(["-P", "-k"])
                    .arg(path.as_os_str()),
            ),
            Platform::Windows => None,
        }
    }

    /// Default base directory for directory-style mounts
    pub fn default_base_dir(&self) -> &'static str {
        match self {
            Platform::Windows => "${USERPROFILE}\\CloudMounts",
            Platform::Linux | Platform::MacOs => "${HOME}/CloudMounts",
        }
    }
}

/// Where a remote is attached locally
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MountTarget {
    Directory(PathBuf),
    DriveLetter(char),
}

impl MountTarget {
    /// Path under which the remote's files become visible
    pub fn path(&self) -> PathBuf {
        match self {
            MountTarget::Directory(path) => path.clone(),
            MountTarget::DriveLetter(letter) => PathBuf::from(format!("{}:\\", letter)),
        }
    }

    /// Form of the target passed to `rclone mount`
    pub fn helper_arg(&self) -> PathBuf {
        match self {
            MountTarget::Directory(path) => path.clone(),
            MountTarget::DriveLetter(letter) => PathBuf::from(format!("{}:", letter)),
        }
    }

    pub fn drive_letter(&self) -> Option<char> {
        match self {
            MountTarget::DriveLetter(letter) => Some(*letter),
            MountTarget::Directory(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_per_platform() {
        assert_eq!(Platform::Linux.scheme(), MountScheme::Directory);
        assert_eq!(Platform::MacOs.scheme(), MountScheme::Directory);
        assert_eq!(Platform::Windows.scheme(), MountScheme::DriveLetter);
    }

    #[test]
    fn test_forced_unmount_commands() {
        let path = Path::new("/home/u/CloudMounts/gdrive");

        let linux = Platform::Linux.forced_unmount(path).unwrap();
        assert_eq!(linux.program_name(), "fusermount");
        assert_eq!(linux.arg_strings(), vec!["-u", "/home/u/CloudMounts/gdrive"]);

        let mac = Platform::MacOs.forced_unmount(path).unwrap();
        assert_eq!(mac.program_name(), "umount");
        assert_eq!(mac.arg_strings(), vec!["/home/u/CloudMounts/gdrive"]);

        assert!(Platform::Windows.forced_unmount(path).is_none());
    }

    #[test]
    fn test_space_query_only_on_directory_platforms() {
        let path = Path::new("/mnt/x");
        let df = Platform::Linux.space_query(path).unwrap();
        assert_eq!(df.program_name(), "df");
        assert_eq!(df.arg_strings(), vec!["-P", "-k", "/mnt/x"]);
        assert!(Platform::Windows.space_query(path).is_none());
    }

    #[test]
    fn test_path_with_spaces_stays_one_argument() {
        let path = Path::new("/home/u/Cloud Mounts/my drive");
        let cmd = Platform::Linux.forced_unmount(path).unwrap();
        assert_eq!(cmd.args.len(), 2);
        assert_eq!(cmd.arg_strings()[1], "/home/u/Cloud Mounts/my drive");
    }

    #[test]
    fn test_drive_letter_target_forms() {
        let target = MountTarget::DriveLetter('Z');
        assert_eq!(target.path(), PathBuf::from("Z:\\"));
        assert_eq!(target.helper_arg(), PathBuf::from("Z:"));
        assert_eq!(target.drive_letter(), Some('Z'));

        let dir = MountTarget::Directory(PathBuf::from("/m/gdrive"));
        assert_eq!(dir.path(), dir.helper_arg());
        assert_eq!(dir.drive_letter(), None);
    }
}
