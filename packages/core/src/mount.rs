//! Mount operations module.
//!
//! This module defines the [`MountBackend`] port the registry drives, the
//! rclone implementation of it, readiness polling after a launch, and the
//! mountpoint directory helpers.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::config::{DriverConfig, HelperConfig};
use crate::error::{Error, IoResultExt, Result};
use crate::executor::{Invocation, shell_quote};
use crate::mount_table;
use crate::volume::Volume;

/// Environment variable carrying the base64 rclone configuration.
pub const CONFIG_ENV: &str = "RCLONE_VOLUME_CONFIG";

/// `$0` of the launching shell, shows up in process listings.
const SHELL_NAME: &str = "docker-volume-rclone";

/// External-process port used by the registry.
///
/// `mount` only guarantees the helper was launched; callers confirm the
/// mount with `is_mounted` (see [`wait_until_mounted`]).
pub trait MountBackend: Send + Sync {
    /// Launches the helper attaching `volume`'s remote at `target`.
    fn mount(&self, volume: &Volume, target: &Path) -> Result<()>;

    /// Detaches whatever is mounted at `target`.
    fn unmount(&self, target: &Path) -> Result<()>;

    /// Returns true if `target` is currently mounted by the helper.
    fn is_mounted(&self, target: &Path) -> Result<bool>;
}

/// Backend running rclone through bash.
#[derive(Debug, Clone)]
pub struct RcloneBackend {
    helper: HelperConfig,
    mount_table: PathBuf,
    verbose: bool,
}

impl RcloneBackend {
    pub fn new(config: &DriverConfig) -> Self {
        Self {
            helper: config.helper.clone(),
            mount_table: config.mount_table.clone(),
            verbose: config.verbose,
        }
    }

    /// Builds the mount invocation for `volume` at `target`.
    ///
    /// The configuration is decoded through a process substitution so it
    /// never hits the disk; it reaches bash only through [`CONFIG_ENV`].
    /// Remote, target and extra arguments are positional parameters.
    pub fn mount_invocation(&self, volume: &Volume, target: &Path) -> Invocation {
        let mut script = shell_quote(&self.helper.binary.to_string_lossy());
        if self.verbose {
            let log_file = self.helper.log_dir.join(format!("rclone.{}.log", unix_now()));
            script.push_str(" --log-file ");
            script.push_str(&shell_quote(&log_file.to_string_lossy()));
        }
        script.push_str(&format!(
            " --config=<(printf '%s' \"${CONFIG_ENV}\" | base64 -d) \"${{@:3}}\" mount \"$1\" \"$2\" & sleep {}",
            self.helper.settle.as_secs_f32()
        ));

        Invocation::new("/bin/bash")
            .args(["-c", script.as_str(), SHELL_NAME, volume.remote.as_str()])
            .arg(target)
            .args(volume.helper_args())
            .env(CONFIG_ENV, volume.config.as_str())
    }

    /// Builds the unmount invocation for `target`.
    pub fn unmount_invocation(&self, target: &Path) -> Invocation {
        Invocation::new("umount").arg(target)
    }
}

impl MountBackend for RcloneBackend {
    fn mount(&self, volume: &Volume, target: &Path) -> Result<()> {
        let status = self.mount_invocation(volume, target).run_detached()?;

        if !status.success() {
            return Err(Error::Mount {
                path: target.to_path_buf(),
                message: format!("helper exited with code {}", status.code().unwrap_or(-1)),
            });
        }

        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        let output = self.unmount_invocation(target).output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(Error::Unmount {
                path: target.to_path_buf(),
                message: stderr,
            });
        }

        Ok(())
    }

    fn is_mounted(&self, target: &Path) -> Result<bool> {
        mount_table::probe(&self.mount_table, target, &self.helper.fs_type)
    }
}

/// Polls `backend` until `target` is mounted or `timeout` elapses.
///
/// Probe errors abort the wait.
pub fn wait_until_mounted<B: MountBackend + ?Sized>(
    backend: &B,
    target: &Path,
    timeout: Duration,
    interval: Duration,
) -> Result<()> {
    // A timeout too large to represent means no deadline.
    let deadline = Instant::now().checked_add(timeout);

    loop {
        if backend.is_mounted(target)? {
            return Ok(());
        }

        let now = Instant::now();
        let pause = match deadline {
            Some(deadline) if now >= deadline => {
                return Err(Error::MountTimeout {
                    path: target.to_path_buf(),
                    timeout,
                });
            }
            Some(deadline) => interval.min(deadline - now),
            None => interval,
        };

        tracing::debug!("waiting for mount: {}", target.display());
        thread::sleep(pause);
    }
}

/// Creates a mountpoint directory if absent and checks it is usable.
///
/// An existing path must be an empty directory.
pub fn prepare_mount_point(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Err(e) if e.kind() == ErrorKind::NotFound => {
            fs::DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(path)
                .mount_point_context(path)?;
            tracing::info!("created mount point {}", path.display());
        }
        Err(e) => return Err(e).mount_point_context(path),
        Ok(meta) if !meta.is_dir() => {
            return Err(Error::MountPointNotDirectory {
                path: path.to_path_buf(),
            });
        }
        Ok(_) => {}
    }

    if !is_dir_empty(path)? {
        return Err(Error::MountPointNotEmpty {
            path: path.to_path_buf(),
        });
    }

    Ok(())
}

/// Creates the base directory if absent and returns its canonical path.
///
/// The mount table lists resolved absolute targets, so mountpoints must be
/// derived from the canonical base for probes to match.
pub fn resolve_base_dir(path: &Path) -> Result<PathBuf> {
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(path)
        .base_dir_context(path)?;
    let resolved = fs::canonicalize(path).base_dir_context(path)?;
    if resolved != path {
        tracing::info!("base directory {} resolves to {}", path.display(), resolved.display());
    }
    Ok(resolved)
}

/// Removes a mountpoint directory. Never recursive; absent is success.
pub fn remove_mount_point(path: &Path) -> Result<()> {
    match fs::remove_dir(path) {
        Ok(()) => {
            tracing::info!("removed mount point {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).mount_point_removal_context(path),
    }
}

fn is_dir_empty(path: &Path) -> Result<bool> {
    let mut entries = fs::read_dir(path).mount_point_context(path)?;
    Ok(entries.next().is_none())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;
    use crate::volume::VolumeSpec;
    use std::ffi::OsString;
    use std::os::unix::fs::PermissionsExt;

    const CONFIG: &str = "W3JlbW90ZV0KdHlwZSA9IGxvY2FsCg==";

    fn volume(args: &str) -> Volume {
        Volume::new(VolumeSpec::new("remote:bucket", CONFIG, args).unwrap(), "v")
    }

    #[test]
    fn test_mount_invocation_keeps_config_out_of_args() {
        let backend = RcloneBackend::new(&DriverConfig::default());
        let inv = backend.mount_invocation(&volume("--read-only --fast-list"), Path::new("/mnt/v"));

        assert_eq!(inv.program, "/bin/bash");
        assert_eq!(inv.args[0], OsString::from("-c"));
        assert_eq!(
            &inv.args[2..],
            &[
                OsString::from("docker-volume-rclone"),
                OsString::from("remote:bucket"),
                OsString::from("/mnt/v"),
                OsString::from("--read-only"),
                OsString::from("--fast-list"),
            ]
        );
        assert_eq!(inv.env, vec![(CONFIG_ENV.to_string(), CONFIG.to_string())]);
        assert!(!inv.describe().contains(CONFIG));

        let script = inv.args[1].to_string_lossy();
        assert!(script.starts_with("'/usr/bin/rclone' --config=<("));
        assert!(script.contains("mount \"$1\" \"$2\" & sleep 5"));
        assert!(!script.contains("--log-file"));
    }

    #[test]
    fn test_mount_invocation_verbose_adds_log_file() {
        let config = DriverConfig::default().with_verbose(true);
        let backend = RcloneBackend::new(&config);
        let inv = backend.mount_invocation(&volume(""), Path::new("/mnt/v"));
        let script = inv.args[1].to_string_lossy();
        assert!(script.contains("--log-file '/var/log/rclone."));
        assert_eq!(inv.args.len(), 5);
    }

    #[test]
    fn test_mount_invocation_runs_helper_with_decoded_config() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        // Stand-in helper that records its config and arguments.
        let helper = dir.path().join("fake-rclone");
        fs::write(
            &helper,
            format!(
                "#!/bin/bash\ncat \"${{1#--config=}}\" > {out}\nshift\necho \"$@\" >> {out}\n",
                out = out.display()
            ),
        )
        .unwrap();
        fs::set_permissions(&helper, fs::Permissions::from_mode(0o755)).unwrap();

        let config = DriverConfig::default().with_helper(HelperConfig {
            binary: helper,
            settle: Duration::from_millis(500),
            ..HelperConfig::default()
        });
        let backend = RcloneBackend::new(&config);
        backend
            .mount(&volume("--read-only"), Path::new("/mnt/v"))
            .unwrap();

        let recorded = fs::read_to_string(&out).unwrap();
        assert_eq!(
            recorded,
            "[remote]\ntype = local\n--read-only mount remote:bucket /mnt/v\n"
        );
    }

    #[test]
    fn test_wait_until_mounted_succeeds_once_visible() {
        let backend = FakeBackend::new();
        let target = PathBuf::from("/mnt/v");
        backend.set_mounted(&target, true);
        wait_until_mounted(
            &backend,
            &target,
            Duration::from_millis(50),
            Duration::from_millis(5),
        )
        .unwrap();
    }

    #[test]
    fn test_wait_until_mounted_with_huge_timeout() {
        let backend = FakeBackend::new();
        let target = PathBuf::from("/mnt/v");
        backend.set_mounted(&target, true);
        wait_until_mounted(&backend, &target, Duration::MAX, Duration::from_millis(5)).unwrap();
    }

    #[test]
    fn test_wait_until_mounted_times_out() {
        let backend = FakeBackend::new();
        let err = wait_until_mounted(
            &backend,
            Path::new("/mnt/v"),
            Duration::from_millis(30),
            Duration::from_millis(5),
        )
        .unwrap_err();
        assert!(matches!(err, Error::MountTimeout { .. }));
        assert!(backend.probe_count() >= 2);
    }

    #[test]
    fn test_wait_until_mounted_propagates_probe_errors() {
        let backend = FakeBackend::new();
        backend.fail_probe(true);
        let err = wait_until_mounted(
            &backend,
            Path::new("/mnt/v"),
            Duration::from_millis(30),
            Duration::from_millis(5),
        )
        .unwrap_err();
        assert!(matches!(err, Error::MountTableRead { .. }));
    }

    #[test]
    fn test_prepare_mount_point_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("v");
        prepare_mount_point(&path).unwrap();
        assert!(path.is_dir());

        // Existing empty directory is fine.
        prepare_mount_point(&path).unwrap();
    }

    #[test]
    fn test_prepare_mount_point_rejects_non_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("file"), b"data").unwrap();

        let err = prepare_mount_point(&path).unwrap_err();
        assert!(matches!(err, Error::MountPointNotEmpty { .. }));
    }

    #[test]
    fn test_prepare_mount_point_rejects_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v");
        fs::write(&path, b"data").unwrap();

        let err = prepare_mount_point(&path).unwrap_err();
        assert!(matches!(err, Error::MountPointNotDirectory { .. }));
    }

    #[test]
    fn test_resolve_base_dir_follows_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        let link = dir.path().join("link");
        fs::create_dir(&real).unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let resolved = resolve_base_dir(&link).unwrap();
        assert_eq!(resolved, fs::canonicalize(&real).unwrap());
        assert!(resolved.is_absolute());
    }

    #[test]
    fn test_resolve_base_dir_creates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("a").join("b");
        let resolved = resolve_base_dir(&base).unwrap();
        assert!(resolved.is_dir());
        assert_eq!(resolved, fs::canonicalize(&base).unwrap());
    }

    #[test]
    fn test_remove_mount_point() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v");
        fs::create_dir(&path).unwrap();

        remove_mount_point(&path).unwrap();
        assert!(!path.exists());
        // Already gone.
        remove_mount_point(&path).unwrap();
    }

    #[test]
    fn test_remove_mount_point_is_not_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), b"data").unwrap();

        let err = remove_mount_point(&path).unwrap_err();
        assert!(matches!(err, Error::MountPointRemoval { .. }));
        assert!(path.join("keep").exists());
    }
}
