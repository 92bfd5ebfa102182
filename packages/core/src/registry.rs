//! Volume registry.
//!
//! The registry owns the volume and mountpoint tables, enforces the
//! reference-counting rules between them, drives the [`MountBackend`] and
//! rewrites the state file after every mutation.
//!
//! ## Locking
//!
//! One `RwLock` guards both tables. Create, Mount, Unmount and Remove hold
//! the write lock for their whole duration, including helper invocations
//! and readiness polling, so no two of them ever run concurrently. Path,
//! Get and List only read and take the shared lock.
//!
//! ## Reconciliation
//!
//! Reference counts are never trusted as proof that something is mounted.
//! Mount, Unmount and Remove probe the host mount table first; a mountpoint
//! that is not mounted but still has holders (e.g. after a reboot) has its
//! counts reset to zero.

use std::path::PathBuf;

use parking_lot::RwLock;

use crate::config::DriverConfig;
use crate::error::{Error, Result};
use crate::mount::{self, MountBackend};
use crate::persistence::{State, Store};
use crate::volume::{self, Mountpoint, Volume, VolumeInfo, VolumeSpec};

/// Scope reported to clients.
pub const SCOPE_LOCAL: &str = "local";

/// Driver capabilities.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Capabilities {
    pub scope: String,
}

/// The volume registry.
pub struct Registry<B> {
    config: DriverConfig,
    backend: B,
    store: Store,
    state: RwLock<State>,
}

impl<B: MountBackend> Registry<B> {
    /// Opens the registry, restoring the tables from the state file.
    ///
    /// The base directory is created if needed and resolved to its canonical
    /// path, so derived mountpoints match the targets in the mount table.
    pub fn open(mut config: DriverConfig, backend: B) -> Result<Self> {
        config.base_dir = mount::resolve_base_dir(&config.base_dir)?;

        let store = Store::new(&config.state_dir);
        let state = store.load().unwrap_or_default();

        for (name, volume) in &state.volumes {
            if !state.mounts.contains_key(&volume.mount_key) {
                tracing::warn!(
                    "volume {} references missing mount {}",
                    name,
                    volume.mount_key
                );
            }
        }
        tracing::info!(
            "restored {} volumes and {} mounts from {}",
            state.volumes.len(),
            state.mounts.len(),
            store.path().display()
        );

        Ok(Self {
            config,
            backend,
            store,
            state: RwLock::new(state),
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Registers a volume and its mountpoint.
    ///
    /// Creating an existing name with identical options is a no-op; with
    /// different options it fails with [`Error::AlreadyExists`].
    pub fn create(&self, name: &str, spec: VolumeSpec) -> Result<()> {
        tracing::debug!("create: name: {}, spec: {:?}", name, spec);
        volume::validate_name(name)?;

        let mut state = self.state.write();

        if let Some(existing) = state.volumes.get(name) {
            if existing.matches(&spec) {
                tracing::debug!("volume {} already exists with the same options", name);
                return Ok(());
            }
            return Err(Error::AlreadyExists {
                name: name.to_string(),
            });
        }

        let key = volume::mount_key(name);
        if !state.mounts.contains_key(&key) {
            let path = self.config.mount_path(&key);
            mount::prepare_mount_point(&path)?;
            state.mounts.insert(key.clone(), Mountpoint::new(path));
        }

        let volume = Volume::new(spec, key);
        tracing::info!("volume created: {} {:?}", name, volume);
        state.volumes.insert(name.to_string(), volume);

        self.persist(&state)
    }

    /// Returns a read-only view of one volume.
    pub fn get(&self, name: &str) -> Result<VolumeInfo> {
        tracing::debug!("get: name: {}", name);
        let state = self.state.read();
        let (volume, mountpoint) = resolve(&state, name)?;

        Ok(VolumeInfo {
            name: name.to_string(),
            mountpoint: mountpoint.path.clone(),
            created_at: volume.created_at.clone(),
        })
    }

    /// Lists every volume, ordered by name.
    ///
    /// Fails if any volume references a missing mountpoint.
    pub fn list(&self) -> Result<Vec<VolumeInfo>> {
        tracing::debug!("list");
        let state = self.state.read();

        state
            .volumes
            .keys()
            .map(|name| {
                let (volume, mountpoint) = resolve(&state, name)?;
                Ok(VolumeInfo {
                    name: name.clone(),
                    mountpoint: mountpoint.path.clone(),
                    created_at: volume.created_at.clone(),
                })
            })
            .collect()
    }

    /// Returns the mountpoint path of a volume.
    pub fn path(&self, name: &str) -> Result<PathBuf> {
        tracing::debug!("path: name: {}", name);
        let state = self.state.read();
        let (_, mountpoint) = resolve(&state, name)?;
        Ok(mountpoint.path.clone())
    }

    /// Takes a mount lease on a volume, mounting it if needed.
    pub fn mount(&self, name: &str) -> Result<PathBuf> {
        tracing::debug!("mount: name: {}", name);
        let mut state = self.state.write();
        let (volume, mountpoint) = resolve(&state, name)?;
        let key = volume.mount_key.clone();
        let path = mountpoint.path.clone();
        let held = volume.ref_count > 0 || mountpoint.ref_count > 0;

        if self.backend.is_mounted(&path)? {
            acquire(&mut state, name, &key);
            self.persist(&state)?;
            return Ok(path);
        }

        if held {
            tracing::warn!(
                "{} is not mounted but had holders, resetting (maybe a reboot)",
                path.display()
            );
            reset(&mut state, &key);
        }

        let volume = state.volumes[name].clone();
        tracing::info!("mounting {} at {}", volume.remote, path.display());
        self.backend.mount(&volume, &path)?;
        mount::wait_until_mounted(
            &self.backend,
            &path,
            self.config.mount_timeout,
            self.config.poll_interval,
        )?;

        acquire(&mut state, name, &key);
        self.persist(&state)?;
        Ok(path)
    }

    /// Releases a mount lease, unmounting when the last holder leaves.
    pub fn unmount(&self, name: &str) -> Result<()> {
        tracing::debug!("unmount: name: {}", name);
        let mut state = self.state.write();
        let (volume, mountpoint) = resolve(&state, name)?;
        let key = volume.mount_key.clone();
        let path = mountpoint.path.clone();
        let holders = mountpoint.ref_count;

        if !self.backend.is_mounted(&path)? {
            reset(&mut state, &key);
        } else if holders <= 1 {
            tracing::info!("unmounting {}", path.display());
            self.backend.unmount(&path)?;
            reset(&mut state, &key);
        } else {
            release(&mut state, name, &key);
        }

        self.persist(&state)
    }

    /// Unregisters a volume, unmounting and deleting its mountpoint.
    ///
    /// If the directory cannot be deleted the records are kept.
    pub fn remove(&self, name: &str) -> Result<()> {
        tracing::debug!("remove: name: {}", name);
        let mut state = self.state.write();
        let (volume, mountpoint) = resolve(&state, name)?;
        let key = volume.mount_key.clone();
        let path = mountpoint.path.clone();

        let mut unmounted = false;
        if self.backend.is_mounted(&path)? {
            tracing::info!("unmounting {} before removal", path.display());
            self.backend.unmount(&path)?;
            reset(&mut state, &key);
            unmounted = true;
        }

        if let Err(e) = mount::remove_mount_point(&path) {
            // The unmount already happened; record it before bailing out.
            if unmounted {
                self.persist(&state).ok();
            }
            return Err(e);
        }

        state.mounts.remove(&key);
        state.volumes.remove(name);
        tracing::info!("volume removed: {}", name);
        self.persist(&state)
    }

    /// Returns the driver capabilities.
    pub fn capabilities(&self) -> Capabilities {
        tracing::debug!("capabilities");
        Capabilities {
            scope: SCOPE_LOCAL.to_string(),
        }
    }

    /// Re-probes every mountpoint and zeroes the holders of those that are
    /// no longer mounted. Probe failures are logged and skipped.
    pub fn reconcile(&self) -> Result<()> {
        let mut state = self.state.write();
        let mut stale = Vec::new();

        for (key, mountpoint) in &state.mounts {
            if mountpoint.ref_count == 0 {
                continue;
            }
            match self.backend.is_mounted(&mountpoint.path) {
                Ok(true) => {}
                Ok(false) => stale.push(key.clone()),
                Err(e) => tracing::warn!(
                    "unable to probe {}: {}",
                    mountpoint.path.display(),
                    e
                ),
            }
        }

        if stale.is_empty() {
            return Ok(());
        }

        for key in &stale {
            tracing::warn!("mount {} is no longer mounted, resetting holders", key);
            reset(&mut state, key);
        }
        self.persist(&state)
    }

    fn persist(&self, state: &State) -> Result<()> {
        self.store.save(state).inspect_err(|e| {
            tracing::warn!("unable to write persistence file: {}", e);
        })
    }
}

/// Looks up a volume and its mountpoint.
fn resolve<'a>(state: &'a State, name: &str) -> Result<(&'a Volume, &'a Mountpoint)> {
    let volume = state.volumes.get(name).ok_or_else(|| Error::VolumeNotFound {
        name: name.to_string(),
    })?;

    let mountpoint = state.mounts.get(&volume.mount_key).ok_or_else(|| {
        tracing::error!(
            "inconsistent state: volume {} references missing mount {}",
            name,
            volume.mount_key
        );
        Error::MountpointMissing {
            key: volume.mount_key.clone(),
            name: name.to_string(),
        }
    })?;

    Ok((volume, mountpoint))
}

fn acquire(state: &mut State, name: &str, key: &str) {
    if let Some(volume) = state.volumes.get_mut(name) {
        volume.ref_count += 1;
    }
    if let Some(mountpoint) = state.mounts.get_mut(key) {
        mountpoint.ref_count += 1;
    }
}

fn release(state: &mut State, name: &str, key: &str) {
    if let Some(volume) = state.volumes.get_mut(name) {
        volume.ref_count = volume.ref_count.saturating_sub(1);
    }
    if let Some(mountpoint) = state.mounts.get_mut(key) {
        mountpoint.ref_count = mountpoint.ref_count.saturating_sub(1);
    }
}

/// Zeroes a mountpoint and every volume attached to it.
fn reset(state: &mut State, key: &str) {
    if let Some(mountpoint) = state.mounts.get_mut(key) {
        mountpoint.ref_count = 0;
    }
    for volume in state.volumes.values_mut() {
        if volume.mount_key == key {
            volume.ref_count = 0;
        }
    }
}
