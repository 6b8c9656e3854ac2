//! Daemon event loop — IPC polling, graceful signal handling, optional
//! exit timer, and periodic status logging.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use calloop::EventLoop;
use tracing::info;

use crate::config::AacConfig;
use crate::ipc;
use crate::state::AacState;

/// Global flag set by SIGTERM/SIGINT handlers.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Process-level options from the command line.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    /// IPC socket path (default: `$XDG_RUNTIME_DIR/aacd-ipc.sock`).
    pub socket_path: Option<PathBuf>,
    /// Log every IPC message.
    pub ipc_trace: bool,
    /// Exit after N seconds (scripted runs).
    pub exit_after: Option<u64>,
    /// Poll interval in milliseconds (higher = less CPU, more latency).
    pub poll_interval_ms: u64,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            socket_path: None,
            ipc_trace: false,
            exit_after: None,
            poll_interval_ms: 10,
        }
    }
}

/// Install signal handlers for graceful shutdown (SIGTERM, SIGINT).
fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM, signal_handler as libc::sighandler_t);
        libc::signal(libc::SIGINT, signal_handler as libc::sighandler_t);
    }
}

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Run the daemon until a signal or the exit timer stops it.
pub fn run(config: AacConfig, options: DaemonOptions) -> anyhow::Result<()> {
    let mut event_loop = EventLoop::<AacState>::try_new()?;

    let ipc_path = options
        .socket_path
        .clone()
        .unwrap_or_else(ipc::IpcServer::default_socket_path);
    let mut state = AacState::new(config, ipc_path.clone());
    state.ipc_server.ipc_trace = options.ipc_trace;
    ipc::IpcServer::bind(&ipc_path, &event_loop.handle())?;

    install_signal_handlers();

    let start_time = Instant::now();
    let exit_duration = options.exit_after.map(Duration::from_secs);
    let mut last_status_log = Instant::now();
    let status_interval = Duration::from_secs(60);

    let poll_interval = Duration::from_millis(options.poll_interval_ms.max(1));
    info!(
        "aacd initialized (poll interval: {}ms), entering event loop",
        options.poll_interval_ms
    );

    while state.running {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            info!("Shutdown signal received, exiting");
            state.running = false;
            break;
        }

        if let Some(dur) = exit_duration {
            if start_time.elapsed() >= dur {
                info!("Exit timer fired after {}s", dur.as_secs());
                state.running = false;
                break;
            }
        }

        if last_status_log.elapsed() >= status_interval {
            let tracker = state.controller.tracker();
            info!(
                "Status: mode {}, {} IPC client(s), {} dwell stream(s), best method {}, affect {}, {} speech process(es)",
                state.controller.mode().as_str(),
                state.ipc_server.clients.len(),
                state.controller.dwell().stream_count(),
                tracker.best_method().as_str(),
                state.controller.affect().kind.as_str(),
                state.effects.running_speech(),
            );
            last_status_log = Instant::now();
        }

        ipc::IpcServer::poll_clients(&mut state);
        state.effects.reap();

        event_loop.dispatch(Some(poll_interval), &mut state)?;
    }

    let _ = std::fs::remove_file(&state.ipc_server.socket_path);

    info!(
        "aacd shutting down ({} IPC client(s), phrase {:?})",
        state.ipc_server.clients.len(),
        state.controller.phrase_text()
    );
    Ok(())
}
