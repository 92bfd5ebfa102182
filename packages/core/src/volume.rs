//! Volume and mountpoint entities.
//!
//! A [`Volume`] is the named unit clients ask for. A [`Mountpoint`] is the
//! directory a remote is attached to. Every volume points at one mountpoint
//! through its `mount_key`.

use std::fmt;
use std::path::PathBuf;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A named volume backed by an rclone remote.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Remote location handed to rclone (e.g. "remote:bucket/path").
    pub remote: String,
    /// Base64-encoded rclone configuration.
    pub config: String,
    /// Extra arguments for rclone, whitespace separated.
    #[serde(default)]
    pub args: String,
    /// Key of the mountpoint this volume uses.
    #[serde(rename = "mount")]
    pub mount_key: String,
    /// Mount leases held by this volume.
    #[serde(rename = "connections", default)]
    pub ref_count: u32,
    /// RFC 3339 creation timestamp.
    #[serde(default)]
    pub created_at: String,
}

impl Volume {
    /// Creates an unmounted volume from a validated spec.
    pub fn new(spec: VolumeSpec, mount_key: impl Into<String>) -> Self {
        Self {
            remote: spec.remote,
            config: spec.config,
            args: spec.args,
            mount_key: mount_key.into(),
            ref_count: 0,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    /// Returns true if this volume was created from the same options.
    pub fn matches(&self, spec: &VolumeSpec) -> bool {
        self.remote == spec.remote && self.config == spec.config && self.args == spec.args
    }

    /// Splits the extra arguments into individual helper arguments.
    pub fn helper_args(&self) -> Vec<&str> {
        self.args.split_whitespace().collect()
    }
}

// The configuration carries credentials.
impl fmt::Debug for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Volume")
            .field("remote", &self.remote)
            .field("config", &format_args!("<{} bytes redacted>", self.config.len()))
            .field("args", &self.args)
            .field("mount_key", &self.mount_key)
            .field("ref_count", &self.ref_count)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// A physical attachment point on the local filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mountpoint {
    /// Absolute directory path.
    pub path: PathBuf,
    /// Volumes currently holding this mountpoint mounted.
    #[serde(rename = "connections", default)]
    pub ref_count: u32,
}

impl Mountpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ref_count: 0,
        }
    }
}

/// Create options as they arrive from a client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOptions {
    /// Base64-encoded rclone configuration.
    #[serde(default)]
    pub config: Option<String>,
    /// Remote location.
    #[serde(default)]
    pub remote: Option<String>,
    /// Extra rclone arguments.
    #[serde(default)]
    pub args: Option<String>,
}

/// Validated create options.
#[derive(Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    pub remote: String,
    pub config: String,
    pub args: String,
}

impl fmt::Debug for VolumeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VolumeSpec")
            .field("remote", &self.remote)
            .field("config", &format_args!("<{} bytes redacted>", self.config.len()))
            .field("args", &self.args)
            .finish()
    }
}

impl VolumeSpec {
    pub fn new(
        remote: impl Into<String>,
        config: impl Into<String>,
        args: impl Into<String>,
    ) -> Result<Self> {
        Self::try_from(CreateOptions {
            config: Some(config.into()),
            remote: Some(remote.into()),
            args: Some(args.into()),
        })
    }
}

impl TryFrom<CreateOptions> for VolumeSpec {
    type Error = Error;

    fn try_from(options: CreateOptions) -> Result<Self> {
        let remote = options.remote.unwrap_or_default();
        let config = options.config.unwrap_or_default();
        if remote.is_empty() || config.is_empty() {
            return Err(Error::InvalidArgument {
                message: "config and remote option required".to_string(),
            });
        }

        // rclone receives the configuration through `base64 -d`, which only
        // skips newlines.
        let compact: String = config.chars().filter(|&c| c != '\n').collect();
        if let Err(e) = STANDARD.decode(compact.as_bytes()) {
            return Err(Error::InvalidArgument {
                message: format!("config option is not valid base64: {}", e),
            });
        }

        Ok(Self {
            remote,
            config,
            args: options.args.unwrap_or_default(),
        })
    }
}

/// Checks that a volume name can be used as a single path component.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\0');

    if invalid {
        return Err(Error::InvalidArgument {
            message: format!("invalid volume name '{}'", name),
        });
    }

    Ok(())
}

/// Derives the mountpoint key for a volume name.
///
/// The key is the volume name itself, so every volume owns its own
/// mountpoint at `<base_dir>/<name>`.
pub fn mount_key(name: &str) -> String {
    name.to_string()
}

/// Read-only view of a volume returned by Get and List.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub name: String,
    pub mountpoint: PathBuf,
    pub created_at: String,
}
