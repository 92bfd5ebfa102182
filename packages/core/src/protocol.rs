//! Lifecycle protocol spoken by the daemon.
//!
//! Requests and responses are single-line JSON documents. Each request names
//! one registry operation through its `cmd` tag:
//!
//! ```json
//! {"cmd": "create", "name": "data", "options": {"remote": "r:", "config": "..."}}
//! {"cmd": "mount", "name": "data", "id": "c0ffee"}
//! ```
//!
//! Every request gets exactly one response. Failures carry the error message
//! and its [`ErrorKind`] so clients can branch without parsing text.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};
use crate::mount::MountBackend;
use crate::registry::{Capabilities, Registry};
use crate::volume::{CreateOptions, VolumeInfo, VolumeSpec};

/// Request sent to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum LifecycleRequest {
    /// Register a volume.
    Create {
        name: String,
        #[serde(default)]
        options: CreateOptions,
    },
    /// Describe one volume.
    Get { name: String },
    /// Describe every volume.
    List,
    /// Mountpoint path of a volume.
    Path { name: String },
    /// Take a mount lease.
    Mount {
        name: String,
        /// Caller identifier, informational only.
        #[serde(default)]
        id: Option<String>,
    },
    /// Release a mount lease.
    Unmount {
        name: String,
        #[serde(default)]
        id: Option<String>,
    },
    /// Unregister a volume.
    Remove { name: String },
    /// Driver capabilities.
    Capabilities,
}

/// Response from the daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleResponse {
    /// Whether the operation succeeded.
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<VolumeInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
    /// Error message if success is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl LifecycleResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn with_volume(volume: VolumeInfo) -> Self {
        Self {
            volume: Some(volume),
            ..Self::ok()
        }
    }

    pub fn with_volumes(volumes: Vec<VolumeInfo>) -> Self {
        Self {
            volumes: Some(volumes),
            ..Self::ok()
        }
    }

    pub fn with_mountpoint(mountpoint: PathBuf) -> Self {
        Self {
            mountpoint: Some(mountpoint),
            ..Self::ok()
        }
    }

    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            capabilities: Some(capabilities),
            ..Self::ok()
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            kind: Some(kind),
            ..Self::default()
        }
    }
}

impl From<Error> for LifecycleResponse {
    fn from(e: Error) -> Self {
        Self::failure(e.kind(), e.to_string())
    }
}

/// Runs one request against the registry.
pub fn dispatch<B: MountBackend>(
    registry: &Registry<B>,
    request: LifecycleRequest,
) -> LifecycleResponse {
    let result = match request {
        LifecycleRequest::Create { name, options } => VolumeSpec::try_from(options)
            .and_then(|spec| registry.create(&name, spec))
            .map(|()| LifecycleResponse::ok()),
        LifecycleRequest::Get { name } => {
            registry.get(&name).map(LifecycleResponse::with_volume)
        }
        LifecycleRequest::List => registry.list().map(LifecycleResponse::with_volumes),
        LifecycleRequest::Path { name } => {
            registry.path(&name).map(LifecycleResponse::with_mountpoint)
        }
        LifecycleRequest::Mount { name, id } => {
            tracing::debug!("mount request for {} from {:?}", name, id);
            registry.mount(&name).map(LifecycleResponse::with_mountpoint)
        }
        LifecycleRequest::Unmount { name, id } => {
            tracing::debug!("unmount request for {} from {:?}", name, id);
            registry.unmount(&name).map(|()| LifecycleResponse::ok())
        }
        LifecycleRequest::Remove { name } => {
            registry.remove(&name).map(|()| LifecycleResponse::ok())
        }
        LifecycleRequest::Capabilities => {
            Ok(LifecycleResponse::with_capabilities(registry.capabilities()))
        }
    };

    result.unwrap_or_else(|e| {
        tracing::debug!("request failed: {}", e);
        e.into()
    })
}

/// Serves line-delimited requests from `reader` until end of input.
///
/// A line that does not parse, including one that is not UTF-8, gets an
/// `invalid_argument` response and the loop moves on to the next one.
pub fn serve_lines<B, R, W>(
    registry: &Registry<B>,
    mut reader: R,
    mut writer: W,
) -> io::Result<()>
where
    B: MountBackend,
    R: BufRead,
    W: Write,
{
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        if line.trim_ascii().is_empty() {
            continue;
        }

        let response = match serde_json::from_slice::<LifecycleRequest>(&line) {
            Ok(request) => dispatch(registry, request),
            Err(e) => {
                tracing::warn!("failed to parse request: {}", e);
                LifecycleResponse::failure(
                    ErrorKind::InvalidArgument,
                    format!("malformed request: {}", e),
                )
            }
        };

        serde_json::to_writer(&mut writer, &response)?;
        writeln!(writer)?;
        writer.flush()?;
    }

    Ok(())
}
