//! Daemon state: the single struct owning the IPC server, the session
//! controller and its side-effect sinks, passed as `&mut` to every
//! calloop callback and IPC handler.

use std::path::PathBuf;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::info;

use crate::adaptive::{Controller, ControllerEvent};
use crate::config::AacConfig;
use crate::effects::DaemonEffects;
use crate::ipc::IpcServer;

/// Monotonic daemon clock.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    start: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Milliseconds since the daemon started.
    pub fn now_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    pub fn unix_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct AacState {
    pub running: bool,
    pub clock: Clock,
    pub config: AacConfig,
    pub controller: Controller,
    pub effects: DaemonEffects,
    pub ipc_server: IpcServer,
    /// Event s-expressions waiting to be broadcast.
    pub pending_events: Vec<String>,
}

impl AacState {
    pub fn new(config: AacConfig, socket_path: PathBuf) -> Self {
        let controller = Controller::new(&config);
        let effects = DaemonEffects::new(config.speech_command.clone());
        let grid = controller.board().snapshot();
        info!(
            targets = grid.len(),
            cols = grid.cols,
            mode = controller.mode().as_str(),
            "controller initialized"
        );
        Self {
            running: true,
            clock: Clock::new(),
            config,
            controller,
            effects,
            ipc_server: IpcServer::new(socket_path),
            pending_events: Vec::new(),
        }
    }

    /// Queue controller events for broadcast.
    pub fn queue_events(&mut self, events: Vec<ControllerEvent>) {
        self.pending_events
            .extend(events.into_iter().map(|e| e.to_sexp()));
    }

    /// Everything waiting to be broadcast, effects' events included.
    pub fn take_pending_events(&mut self) -> Vec<String> {
        let mut events = std::mem::take(&mut self.pending_events);
        events.extend(self.effects.drain_events());
        events
    }

    /// Replace the configuration and push it into the controller.
    pub fn apply_config(&mut self, config: AacConfig) {
        let events = self.controller.apply_config(&config);
        self.effects.set_speech_command(config.speech_command.clone());
        self.config = config;
        self.queue_events(events);
    }
}
