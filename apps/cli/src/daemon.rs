//! Daemon mode: serves the lifecycle protocol on a Unix socket.
//!
//! Each connection gets its own thread and speaks line-delimited JSON (see
//! [`rclone_volume_core::protocol`]). All connections share one registry,
//! whose lock serializes the mutating operations.

use std::fs;
use std::io::{self, BufReader};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::Arc;
use std::thread;

use nix::unistd::Uid;
use rclone_volume_core::protocol::serve_lines;
use rclone_volume_core::{DriverConfig, RcloneBackend, Registry};

/// Runs the daemon until the listener fails.
pub fn run_daemon(config: DriverConfig, socket: &Path) -> io::Result<()> {
    if !Uid::effective().is_root() {
        tracing::warn!("not running as root, mounting will most likely fail");
    }

    let backend = RcloneBackend::new(&config);
    let registry = Arc::new(Registry::open(config, backend).map_err(io::Error::other)?);
    if let Err(e) = registry.reconcile() {
        tracing::warn!("startup reconciliation failed: {}", e);
    }

    let listener = bind(socket)?;
    tracing::info!("listening on {}", socket.display());

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let registry = Arc::clone(&registry);
                thread::spawn(move || handle_connection(&registry, stream));
            }
            Err(e) => tracing::warn!("failed to accept connection: {}", e),
        }
    }

    Ok(())
}

/// Binds `socket`, replacing a stale socket file left by a previous run.
fn bind(socket: &Path) -> io::Result<UnixListener> {
    match fs::remove_file(socket) {
        Ok(()) => tracing::debug!("removed stale socket {}", socket.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    if let Some(parent) = socket.parent() {
        fs::create_dir_all(parent)?;
    }

    UnixListener::bind(socket)
}

fn handle_connection(registry: &Registry<RcloneBackend>, stream: UnixStream) {
    let reader = match stream.try_clone() {
        Ok(read_half) => BufReader::new(read_half),
        Err(e) => {
            tracing::warn!("failed to clone connection: {}", e);
            return;
        }
    };

    if let Err(e) = serve_lines(registry, reader, stream) {
        tracing::debug!("connection closed: {}", e);
    }
}
