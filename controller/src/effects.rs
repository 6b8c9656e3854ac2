//! Daemon-side speech and telemetry sinks.
//!
//! Speech is always announced to IPC clients as a `speak` event so the UI
//! can play it; when a speech command is configured it is also spawned
//! with the label as its last argument.  Telemetry becomes a `telemetry`
//! event.  Queued events are drained by the IPC server after each message.

use std::process::{Child, Command, Stdio};

use anyhow::{bail, Context};
use tracing::debug;

use crate::adaptive::{PerformanceSample, SideEffects};
use crate::ipc::plist::quote;

pub struct DaemonEffects {
    /// Program and leading arguments, e.g. `espeak-ng -s 140`.
    speech_command: Option<String>,
    /// Spawned speech processes not yet reaped.
    children: Vec<Child>,
    pending: Vec<String>,
}

impl DaemonEffects {
    pub fn new(speech_command: Option<String>) -> Self {
        Self {
            speech_command,
            children: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn set_speech_command(&mut self, command: Option<String>) {
        self.speech_command = command;
    }

    /// Take queued event s-expressions.
    pub fn drain_events(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending)
    }

    /// Reap speech processes that have exited.
    pub fn reap(&mut self) {
        self.children.retain_mut(|child| match child.try_wait() {
            Ok(Some(status)) => {
                debug!(pid = child.id(), code = ?status.code(), "speech process exited");
                false
            }
            Ok(None) => true,
            Err(e) => {
                debug!(pid = child.id(), "speech process wait failed: {}", e);
                false
            }
        });
    }

    pub fn running_speech(&self) -> usize {
        self.children.len()
    }

    fn spawn_speech(&mut self, command: &str, label: &str) -> anyhow::Result<()> {
        let mut parts = command.split_whitespace();
        let Some(program) = parts.next() else {
            bail!("empty speech command");
        };
        let child = Command::new(program)
            .args(parts)
            .arg(label)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn '{command}'"))?;
        debug!(pid = child.id(), label, "speech process spawned");
        self.children.push(child);
        Ok(())
    }
}

impl SideEffects for DaemonEffects {
    fn speak(&mut self, label: &str) -> anyhow::Result<()> {
        self.pending
            .push(format!("(:type :event :event :speak :text {})", quote(label)));
        match self.speech_command.clone() {
            Some(command) => self.spawn_speech(&command, label),
            None => Ok(()),
        }
    }

    fn report(&mut self, sample: &PerformanceSample) -> anyhow::Result<()> {
        self.pending.push(format!(
            "(:type :event :event :telemetry :method :{} :duration-ms {:.0} :errored {} :best :{})",
            sample.method.as_str(),
            sample.duration_ms,
            if sample.errored { "t" } else { "nil" },
            sample.best.as_str(),
        ));
        Ok(())
    }
}
