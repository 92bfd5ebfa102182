//! rclone-volume-core: volume lifecycle for rclone-backed Docker volumes.
//!
//! This library keeps track of named volumes whose data lives on an rclone
//! remote, mounts them on demand through the rclone binary, shares one mount
//! between concurrent users with reference counts, and survives daemon
//! restarts and host reboots.
//!
//! # Modules
//!
//! - [`volume`]: Volume and mountpoint entities, create option validation
//! - [`registry`]: The volume registry and its reference-counting rules
//! - [`mount`]: Mount backend port, rclone backend, mountpoint directories
//! - [`mount_table`]: `/proc/mounts` parsing
//! - [`executor`]: External command invocation
//! - [`persistence`]: State file
//! - [`protocol`]: Line-delimited JSON lifecycle protocol
//! - [`config`]: Driver configuration
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```no_run
//! use rclone_volume_core::{DriverConfig, RcloneBackend, Registry, VolumeSpec};
//!
//! let config = DriverConfig::new();
//! let registry = Registry::open(config.clone(), RcloneBackend::new(&config))?;
//!
//! let spec = VolumeSpec::new("remote:bucket", "W3JlbW90ZV0KdHlwZSA9IGxvY2FsCg==", "")?;
//! registry.create("data", spec)?;
//! let path = registry.mount("data")?;
//! println!("mounted at {}", path.display());
//! registry.unmount("data")?;
//! # Ok::<(), rclone_volume_core::Error>(())
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod mount;
pub mod mount_table;
pub mod persistence;
pub mod protocol;
pub mod registry;
pub mod volume;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::{DriverConfig, HelperConfig};
pub use error::{Error, ErrorKind, Result};
pub use mount::{MountBackend, RcloneBackend};
pub use protocol::{LifecycleRequest, LifecycleResponse};
pub use registry::{Capabilities, Registry};
pub use volume::{CreateOptions, Mountpoint, Volume, VolumeInfo, VolumeSpec};
