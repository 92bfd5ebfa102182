//! Unified error types for the rclone-volume-core library.
//!
//! Uses SNAFU for context-rich error handling, especially useful when the same
//! underlying error type (like `std::io::Error`) appears in different contexts.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

/// Result type alias using the library's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all core library operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// A required option is missing or malformed.
    #[snafu(display("invalid argument: {message}"))]
    InvalidArgument { message: String },

    /// No volume is registered under this name.
    #[snafu(display("volume {name} not found"))]
    VolumeNotFound { name: String },

    /// A volume references a mountpoint record that does not exist.
    #[snafu(display("volume mount {key} not found for {name}"))]
    MountpointMissing { key: String, name: String },

    /// A volume with the same name but different options is already registered.
    #[snafu(display("volume {name} already exists with different options"))]
    AlreadyExists { name: String },

    /// The mountpoint directory exists and holds files.
    #[snafu(display("{} already exists and is not empty", path.display()))]
    MountPointNotEmpty { path: PathBuf },

    /// The mountpoint path exists but is not a directory.
    #[snafu(display("{} already exists and is not a directory", path.display()))]
    MountPointNotDirectory { path: PathBuf },

    /// Mount point creation failed.
    #[snafu(display("failed to create mount point at {}", path.display()))]
    MountPointCreation {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Mount point removal failed.
    #[snafu(display("failed to remove mount point at {}", path.display()))]
    MountPointRemoval {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The mountpoint base directory could not be created or resolved.
    #[snafu(display("failed to prepare base directory at {}", path.display()))]
    BaseDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The host mount table could not be read.
    #[snafu(display("failed to read mount table at {}", path.display()))]
    MountTableRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The state directory could not be inspected or created.
    #[snafu(display("failed to prepare state directory at {}", path.display()))]
    StateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The state directory path is occupied by something else.
    #[snafu(display("{} already exists and is not a directory", path.display()))]
    StateDirectoryNotDirectory { path: PathBuf },

    /// The state file could not be written.
    #[snafu(display("failed to write state file at {}", path.display()))]
    StateWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The in-memory state could not be encoded.
    #[snafu(display("failed to encode state"))]
    StateEncode { source: serde_json::Error },

    /// Failed to launch a helper command.
    #[snafu(display("failed to execute command '{command}'"))]
    HelperLaunch {
        command: String,
        source: std::io::Error,
    },

    /// Mount operation failed.
    #[snafu(display("failed to mount {}: {message}", path.display()))]
    Mount { path: PathBuf, message: String },

    /// Unmount operation failed.
    #[snafu(display("failed to unmount {}: {message}", path.display()))]
    Unmount { path: PathBuf, message: String },

    /// The helper was launched but the mount never showed up.
    #[snafu(display("{} was not mounted after {timeout:?}", path.display()))]
    MountTimeout { path: PathBuf, timeout: Duration },
}

/// Error classification carried across the lifecycle protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    Conflict,
    Io,
    HelperLaunchFailed,
    MountFailed,
    MountTimeout,
    Internal,
}

impl Error {
    /// Returns the protocol-level classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Error::VolumeNotFound { .. } => ErrorKind::NotFound,
            // Reported as not-found to clients; logged as an internal inconsistency.
            Error::MountpointMissing { .. } => ErrorKind::NotFound,
            Error::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Error::MountPointNotEmpty { .. } | Error::MountPointNotDirectory { .. } => {
                ErrorKind::Conflict
            }
            Error::MountPointCreation { .. }
            | Error::MountPointRemoval { .. }
            | Error::BaseDirectory { .. }
            | Error::MountTableRead { .. }
            | Error::StateDirectory { .. }
            | Error::StateDirectoryNotDirectory { .. }
            | Error::StateWrite { .. } => ErrorKind::Io,
            Error::StateEncode { .. } => ErrorKind::Internal,
            Error::HelperLaunch { .. } => ErrorKind::HelperLaunchFailed,
            Error::Mount { .. } | Error::Unmount { .. } => ErrorKind::MountFailed,
            Error::MountTimeout { .. } => ErrorKind::MountTimeout,
        }
    }
}

/// Extension trait for adding context to io::Error results.
pub trait IoResultExt<T> {
    /// Add context for helper command launch errors.
    fn command_context(self, command: impl Into<String>) -> Result<T>;

    /// Add context for mount point creation errors.
    fn mount_point_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for mount point removal errors.
    fn mount_point_removal_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for base directory errors.
    fn base_dir_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for mount table read errors.
    fn mount_table_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for state directory errors.
    fn state_dir_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for state file write errors.
    fn state_write_context(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, std::io::Error> {
    fn command_context(self, command: impl Into<String>) -> Result<T> {
        self.context(HelperLaunchSnafu {
            command: command.into(),
        })
    }

    fn mount_point_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(MountPointCreationSnafu { path: path.into() })
    }

    fn mount_point_removal_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(MountPointRemovalSnafu { path: path.into() })
    }

    fn base_dir_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(BaseDirectorySnafu { path: path.into() })
    }

    fn mount_table_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(MountTableReadSnafu { path: path.into() })
    }

    fn state_dir_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(StateDirectorySnafu { path: path.into() })
    }

    fn state_write_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(StateWriteSnafu { path: path.into() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let err = Error::VolumeNotFound {
            name: "a".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "volume a not found");

        let err = Error::MountPointNotEmpty {
            path: PathBuf::from("/mnt/a"),
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.to_string(), "/mnt/a already exists and is not empty");

        let err = Error::MountTimeout {
            path: PathBuf::from("/mnt/a"),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(err.kind(), ErrorKind::MountTimeout);
    }

    #[test]
    fn test_io_context() {
        let io: std::io::Result<()> = Err(std::io::Error::other("boom"));
        let err = io.command_context("umount /mnt/a").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HelperLaunchFailed);
        assert_eq!(err.to_string(), "failed to execute command 'umount /mnt/a'");
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::HelperLaunchFailed).unwrap();
        assert_eq!(json, "\"helper_launch_failed\"");
    }
}
