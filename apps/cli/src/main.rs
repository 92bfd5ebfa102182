//! docker-volume-rclone: volume daemon for rclone-backed Docker volumes.
//!
//! The daemon keeps a registry of named volumes, mounts them through rclone
//! on demand and answers lifecycle requests on a Unix socket.

mod daemon;
mod logging;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rclone_volume_core::config::{
    DEFAULT_BASE_DIR, DEFAULT_HELPER_BINARY, DEFAULT_MOUNT_TIMEOUT_SECS, DEFAULT_STATE_DIR,
};
use rclone_volume_core::{DriverConfig, HelperConfig};

const DEFAULT_SOCKET: &str = "/run/docker/plugins/rclone.sock";
const DEFAULT_LOG_FILE: &str = "/var/log/docker-volume-rclone.log";

/// rclone volume daemon.
#[derive(Parser)]
#[command(name = "docker-volume-rclone")]
#[command(about = "Docker volume daemon backed by rclone mounts", long_about = None)]
struct Cli {
    /// Enable debug logging, also for rclone itself.
    #[arg(short, long, env = "DEBUG", global = true)]
    verbose: bool,

    /// Directory under which volumes are mounted.
    #[arg(short = 'b', long = "basedir", default_value = DEFAULT_BASE_DIR, global = true)]
    base_dir: PathBuf,

    /// Directory holding the persistence file.
    #[arg(long, default_value = DEFAULT_STATE_DIR, global = true)]
    state_dir: PathBuf,

    /// Seconds to wait for a mount to show up.
    #[arg(long, default_value_t = DEFAULT_MOUNT_TIMEOUT_SECS, global = true)]
    mount_timeout: u64,

    /// Path to the rclone binary.
    #[arg(long, default_value = DEFAULT_HELPER_BINARY, global = true)]
    rclone: PathBuf,

    /// Unix socket to listen on.
    #[arg(long, default_value = DEFAULT_SOCKET, global = true)]
    socket: PathBuf,

    /// Log file used in verbose mode.
    #[arg(long, default_value = DEFAULT_LOG_FILE, global = true)]
    log_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve volume lifecycle requests on the Unix socket.
    Daemon,
    /// Print the version.
    Version,
}

impl Cli {
    fn driver_config(&self) -> DriverConfig {
        let helper = HelperConfig {
            binary: self.rclone.clone(),
            ..HelperConfig::default()
        };

        DriverConfig::new()
            .with_base_dir(&self.base_dir)
            .with_state_dir(&self.state_dir)
            .with_mount_timeout(Duration::from_secs(self.mount_timeout))
            .with_verbose(self.verbose)
            .with_helper(helper)
    }
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon => {
            let _guard = logging::init_logging(cli.verbose, &cli.log_file);
            tracing::info!("starting docker-volume-rclone {}", env!("CARGO_PKG_VERSION"));

            if let Err(e) = daemon::run_daemon(cli.driver_config(), &cli.socket) {
                tracing::error!("daemon error: {}", e);
                eprintln!("Daemon error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Version => {
            println!("docker-volume-rclone {}", env!("CARGO_PKG_VERSION"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_map_onto_config() {
        let cli = Cli::try_parse_from([
            "docker-volume-rclone",
            "daemon",
            "-b",
            "/mnt/volumes",
            "--mount-timeout",
            "5",
            "--rclone",
            "/opt/rclone",
        ])
        .unwrap();

        let config = cli.driver_config();
        assert_eq!(config.base_dir, PathBuf::from("/mnt/volumes"));
        assert_eq!(config.state_dir, PathBuf::from(DEFAULT_STATE_DIR));
        assert_eq!(config.mount_timeout, Duration::from_secs(5));
        assert_eq!(config.helper.binary, PathBuf::from("/opt/rclone"));
        assert_eq!(cli.socket, PathBuf::from(DEFAULT_SOCKET));
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
