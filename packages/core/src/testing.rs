//! In-memory [`MountBackend`] for tests.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::mount::MountBackend;
use crate::volume::Volume;

#[derive(Debug, Default)]
struct FakeState {
    mounted: HashSet<PathBuf>,
    mount_calls: usize,
    unmount_calls: usize,
    probe_calls: usize,
    fail_launch: bool,
    fail_unmount: bool,
    fail_probe: bool,
    never_ready: bool,
}

/// Tracks mounts in memory and counts helper invocations.
#[derive(Debug, Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an external mount or unmount (e.g. a reboot).
    pub fn set_mounted(&self, path: &Path, mounted: bool) {
        let mut state = self.state.lock();
        if mounted {
            state.mounted.insert(path.to_path_buf());
        } else {
            state.mounted.remove(path);
        }
    }

    /// Makes the next launches fail as if the helper binary were missing.
    pub fn fail_launch(&self, fail: bool) {
        self.state.lock().fail_launch = fail;
    }

    pub fn fail_unmount(&self, fail: bool) {
        self.state.lock().fail_unmount = fail;
    }

    pub fn fail_probe(&self, fail: bool) {
        self.state.lock().fail_probe = fail;
    }

    /// Launches succeed but the mount never shows up.
    pub fn never_ready(&self, never: bool) {
        self.state.lock().never_ready = never;
    }

    pub fn mount_count(&self) -> usize {
        self.state.lock().mount_calls
    }

    pub fn unmount_count(&self) -> usize {
        self.state.lock().unmount_calls
    }

    pub fn probe_count(&self) -> usize {
        self.state.lock().probe_calls
    }
}

impl MountBackend for FakeBackend {
    fn mount(&self, _volume: &Volume, target: &Path) -> Result<()> {
        let mut state = self.state.lock();
        state.mount_calls += 1;
        if state.fail_launch {
            return Err(Error::HelperLaunch {
                command: "rclone".to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
            });
        }
        if !state.never_ready {
            state.mounted.insert(target.to_path_buf());
        }
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        let mut state = self.state.lock();
        state.unmount_calls += 1;
        if state.fail_unmount {
            return Err(Error::Unmount {
                path: target.to_path_buf(),
                message: "target is busy".to_string(),
            });
        }
        state.mounted.remove(target);
        Ok(())
    }

    fn is_mounted(&self, target: &Path) -> Result<bool> {
        let mut state = self.state.lock();
        state.probe_calls += 1;
        if state.fail_probe {
            return Err(Error::MountTableRead {
                path: PathBuf::from("/proc/mounts"),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
            });
        }
        Ok(state.mounted.contains(target))
    }
}
