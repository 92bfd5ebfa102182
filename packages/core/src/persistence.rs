//! Persistence of the volume and mountpoint tables.
//!
//! The whole state is rewritten on every mutation as a single JSON document:
//!
//! ```json
//! {"version": 1, "volumes": {"<name>": {...}}, "mounts": {"<key>": {...}}}
//! ```
//!
//! Loading never fails the daemon. A missing file means a fresh start; an
//! unreadable file, a version mismatch or a corrupt document resets to empty
//! state, and each table decodes on its own so one corrupt table does not
//! take the other down with it.

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use snafu::ResultExt;
use tempfile::NamedTempFile;

use crate::error::{Error, IoResultExt, Result, StateEncodeSnafu};
use crate::volume::{Mountpoint, Volume};

/// Current state file format version.
pub const STATE_VERSION: u64 = 1;

/// Name of the state file inside the state directory.
pub const STATE_FILE_NAME: &str = "persistence.json";

/// The in-memory tables owned by the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct State {
    pub volumes: BTreeMap<String, Volume>,
    pub mounts: BTreeMap<String, Mountpoint>,
}

#[derive(Serialize)]
struct StateFile<'a> {
    version: u64,
    volumes: &'a BTreeMap<String, Volume>,
    mounts: &'a BTreeMap<String, Mountpoint>,
}

/// Reads and writes the state file.
#[derive(Debug, Clone)]
pub struct Store {
    dir: PathBuf,
    file: PathBuf,
}

impl Store {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let file = dir.join(STATE_FILE_NAME);
        Self { dir, file }
    }

    /// Path of the state file.
    pub fn path(&self) -> &Path {
        &self.file
    }

    /// Writes `state` atomically, creating the state directory if needed.
    pub fn save(&self, state: &State) -> Result<()> {
        self.ensure_dir()?;

        let body = serde_json::to_vec_pretty(&StateFile {
            version: STATE_VERSION,
            volumes: &state.volumes,
            mounts: &state.mounts,
        })
        .context(StateEncodeSnafu)?;

        // NamedTempFile is created with mode 0600.
        let mut tmp = NamedTempFile::new_in(&self.dir).state_write_context(&self.file)?;
        tmp.write_all(&body).state_write_context(&self.file)?;
        tmp.as_file().sync_all().state_write_context(&self.file)?;
        tmp.persist(&self.file)
            .map_err(|e| e.error)
            .state_write_context(&self.file)?;

        tracing::debug!(
            "saved {} volumes, {} mounts to {}",
            state.volumes.len(),
            state.mounts.len(),
            self.file.display()
        );
        Ok(())
    }

    /// Loads the last saved state.
    ///
    /// Returns `None` if no state file exists.
    pub fn load(&self) -> Option<State> {
        let bytes = match fs::read(&self.file) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(
                    "no persistence file found at {}, starting with an empty list of volumes",
                    self.file.display()
                );
                return None;
            }
            Err(e) => {
                tracing::warn!(
                    "unable to read persistence file {}: {}, starting with an empty list of volumes",
                    self.file.display(),
                    e
                );
                return Some(State::default());
            }
        };

        Some(decode_state(&bytes))
    }

    fn ensure_dir(&self) -> Result<()> {
        match fs::symlink_metadata(&self.dir) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(Error::StateDirectoryNotDirectory {
                path: self.dir.clone(),
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => fs::DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(&self.dir)
                .state_dir_context(&self.dir),
            Err(e) => Err(e).state_dir_context(&self.dir),
        }
    }
}

/// Decodes a state document, isolating failures per table.
pub fn decode_state(bytes: &[u8]) -> State {
    let mut doc: Value = match serde_json::from_slice(bytes) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!("unable to decode persistence file: {}, starting empty", e);
            return State::default();
        }
    };

    let version = doc.get("version").and_then(Value::as_u64);
    if version != Some(STATE_VERSION) {
        tracing::warn!(
            "persistence version {:?} does not match {}, starting empty",
            version,
            STATE_VERSION
        );
        return State::default();
    }

    State {
        volumes: decode_table(&mut doc, "volumes"),
        mounts: decode_table(&mut doc, "mounts"),
    }
}

fn decode_table<T: DeserializeOwned>(doc: &mut Value, key: &str) -> BTreeMap<String, T> {
    let value = match doc.get_mut(key).map(Value::take) {
        None | Some(Value::Null) => return BTreeMap::new(),
        Some(value) => value,
    };

    serde_json::from_value(value).unwrap_or_else(|e| {
        tracing::warn!("unable to decode {} table: {}, starting with it empty", key, e);
        BTreeMap::new()
    })
}
