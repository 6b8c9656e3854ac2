//! aacd: adaptive multimodal input controller for AAC boards.
//!
//! Turns gaze, switch and touch input into word selections, adapts the
//! board to the user's apparent affect, and recommends the input method
//! that is working best.  UI, sensors and speech attach over local IPC.

mod adaptive;
mod config;
mod daemon;
mod effects;
pub mod ipc;
mod state;

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use crate::config::AacConfig;
use crate::daemon::DaemonOptions;

#[derive(Parser, Debug)]
#[command(name = "aacd", about = "Adaptive AAC input controller")]
struct Cli {
    /// Configuration file (s-expression plist)
    #[arg(long)]
    config: Option<PathBuf>,

    /// IPC socket path (default: $XDG_RUNTIME_DIR/aacd-ipc.sock)
    #[arg(long)]
    ipc_socket: Option<PathBuf>,

    /// Log all IPC messages to stderr
    #[arg(long)]
    ipc_trace: bool,

    /// Exit after N seconds
    #[arg(long)]
    exit_after: Option<u64>,

    /// Event loop poll interval in milliseconds
    #[arg(long, default_value_t = 10)]
    poll_interval_ms: u64,

    /// Show version and exit
    #[arg(long)]
    version: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("aacd {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aacd=info".into()),
        )
        .init();

    info!("aacd v{} starting", env!("CARGO_PKG_VERSION"));

    let config = match cli.config {
        Some(ref path) => AacConfig::load(path)?,
        None => AacConfig::default(),
    };
    info!(
        dwell_ms = config.dwell.threshold_ms,
        board = config.board.len(),
        speech = config.speech_command.is_some(),
        "configuration ready"
    );

    daemon::run(
        config,
        DaemonOptions {
            socket_path: cli.ipc_socket,
            ipc_trace: cli.ipc_trace,
            exit_after: cli.exit_after,
            poll_interval_ms: cli.poll_interval_ms,
        },
    )
}
