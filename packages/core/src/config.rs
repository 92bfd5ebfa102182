//! Driver configuration.
//!
//! Paths and timings consumed by the registry, the persistence store and the
//! rclone backend. The CLI builds one of these from its flags.

use std::path::PathBuf;
use std::time::Duration;

/// Default parent directory of all mountpoints.
pub const DEFAULT_BASE_DIR: &str = "/var/lib/docker-volumes/rclone";

/// Default directory holding the persistence file.
pub const DEFAULT_STATE_DIR: &str = "/etc/docker-volumes/rclone";

/// Default host mount table.
pub const DEFAULT_MOUNT_TABLE: &str = "/proc/mounts";

/// Default rclone binary location.
pub const DEFAULT_HELPER_BINARY: &str = "/usr/bin/rclone";

/// Filesystem type tag rclone mounts show up with in the mount table.
pub const DEFAULT_FS_TYPE: &str = "fuse.rclone";

/// Default directory for helper log files in verbose mode.
pub const DEFAULT_HELPER_LOG_DIR: &str = "/var/log";

/// Default readiness deadline after launching a mount (seconds).
pub const DEFAULT_MOUNT_TIMEOUT_SECS: u64 = 30;

/// Default delay between readiness probes (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MILLIS: u64 = 500;

/// Default lifetime of the launching shell (seconds).
pub const DEFAULT_HELPER_SETTLE_SECS: u64 = 5;

/// How the external mount helper is invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperConfig {
    /// Path to the rclone executable.
    pub binary: PathBuf,
    /// Filesystem type tag expected in the mount table.
    pub fs_type: String,
    /// Where per-mount helper logs go when verbose.
    pub log_dir: PathBuf,
    /// How long the launching shell waits before exiting. The decoded
    /// configuration stream is only readable while it is alive.
    pub settle: Duration,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_HELPER_BINARY),
            fs_type: DEFAULT_FS_TYPE.to_string(),
            log_dir: PathBuf::from(DEFAULT_HELPER_LOG_DIR),
            settle: Duration::from_secs(DEFAULT_HELPER_SETTLE_SECS),
        }
    }
}

/// Configuration for the volume driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Parent directory of every mountpoint.
    pub base_dir: PathBuf,
    /// Directory holding `persistence.json`.
    pub state_dir: PathBuf,
    /// Host mount table consulted by the prober.
    pub mount_table: PathBuf,
    /// Deadline for a launched mount to become visible.
    pub mount_timeout: Duration,
    /// Delay between readiness probes.
    pub poll_interval: Duration,
    /// Whether the helper writes its own log file.
    pub verbose: bool,
    pub helper: HelperConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            mount_table: PathBuf::from(DEFAULT_MOUNT_TABLE),
            mount_timeout: Duration::from_secs(DEFAULT_MOUNT_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MILLIS),
            verbose: false,
            helper: HelperConfig::default(),
        }
    }
}

impl DriverConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = state_dir.into();
        self
    }

    pub fn with_mount_table(mut self, mount_table: impl Into<PathBuf>) -> Self {
        self.mount_table = mount_table.into();
        self
    }

    pub fn with_mount_timeout(mut self, timeout: Duration) -> Self {
        self.mount_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_helper(mut self, helper: HelperConfig) -> Self {
        self.helper = helper;
        self
    }

    /// Returns the mountpoint path for a mount key.
    pub fn mount_path(&self, mount_key: &str) -> PathBuf {
        self.base_dir.join(mount_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DriverConfig::default();
        assert_eq!(config.base_dir, PathBuf::from("/var/lib/docker-volumes/rclone"));
        assert_eq!(config.state_dir, PathBuf::from("/etc/docker-volumes/rclone"));
        assert_eq!(config.mount_timeout, Duration::from_secs(30));
        assert_eq!(config.helper.fs_type, "fuse.rclone");
        assert!(!config.verbose);
    }

    #[test]
    fn test_mount_path() {
        let config = DriverConfig::new().with_base_dir("/srv/volumes");
        assert_eq!(config.mount_path("data"), PathBuf::from("/srv/volumes/data"));
    }
}
