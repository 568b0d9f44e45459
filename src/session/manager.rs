// src/session/manager.rs

use std::fmt;
use std::sync::{Arc, Weak};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::engine::{send_ui, UiMessage, UiPayload, UiSink};
use crate::errors::{Result, StackdError};
use crate::protocol::Status;

use super::pty::{PtyBackend, PtyEvent, PtyEventSink, PtyProcess, SessionEvent, ShellSpec};

/// UI command (and key) carrying terminal output.
pub const OUTPUT_EVENT: &str = "NodePty:data";
pub const WRITE_COMMAND: &str = "NodePty:write";
pub const CLEAR_COMMAND: &str = "NodePty:clear";
pub const RESIZE_COMMAND: &str = "NodePty:resize";
pub const STOP_COMMAND: &str = "NodePty:stop";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Pending {
    command: String,
    key: String,
}

struct ActiveSession {
    generation: u64,
    process: Box<dyn PtyProcess>,
}

/// The single interactive shell.
///
/// At most one session runs at a time. Its pending record is the
/// `{command, key}` of the first write after the session started; that key
/// gets `Success(true)` when the session ends, whichever way it ends.
pub struct SessionManager {
    backend: Arc<dyn PtyBackend>,
    spec: ShellSpec,
    ui: UiSink,
    events: mpsc::UnboundedSender<SessionEvent>,
    active: Option<ActiveSession>,
    pending: Option<Pending>,
    last_line: String,
    /// Trailing bytes of an incomplete UTF-8 sequence from the last chunk.
    partial_utf8: Vec<u8>,
    generation: u64,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("active", &self.active.as_ref().map(|a| a.generation))
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// The returned receiver carries pty events; feed them back through
    /// [`SessionManager::handle_event`].
    pub fn new(
        backend: Arc<dyn PtyBackend>,
        spec: ShellSpec,
        ui: UiSink,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            backend,
            spec,
            ui,
            events,
            active: None,
            pending: None,
            last_line: String::new(),
            partial_utf8: Vec::new(),
            generation: 0,
        };
        (manager, events_rx)
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        self.active.as_ref().and_then(|a| a.process.pid())
    }

    /// Most recent output: the last chunk that contained a carriage return,
    /// plus whatever followed it.
    pub fn last_line(&self) -> &str {
        &self.last_line
    }

    pub fn start(&mut self) -> Result<()> {
        if self.active.is_some() {
            return Err(StackdError::SessionActive);
        }
        self.generation += 1;
        let sink = PtyEventSink::new(self.generation, self.events.clone());
        let process = self.backend.spawn(&self.spec, sink)?;
        info!(
            generation = self.generation,
            pid = process.pid(),
            shell = %self.spec.program,
            "interactive session started"
        );
        self.active = Some(ActiveSession {
            generation: self.generation,
            process,
        });
        self.last_line.clear();
        self.partial_utf8.clear();
        Ok(())
    }

    fn ensure_started(&mut self) -> Result<&mut ActiveSession> {
        if self.active.is_none() {
            self.start()?;
        }
        self.active
            .as_mut()
            .ok_or_else(|| StackdError::Spawn("interactive session did not start".to_string()))
    }

    /// Send input, starting a session first if none is running.
    pub fn write(&mut self, command: &str, key: &str, text: &str) -> Result<()> {
        let generation = self.ensure_started()?.generation;
        if self.pending.is_none() {
            debug!(generation, command, key, "recording pending session completion");
            self.pending = Some(Pending {
                command: command.to_string(),
                key: key.to_string(),
            });
        }
        self.ensure_started()?.process.write(text.as_bytes())
    }

    pub fn clear(&mut self) -> Result<()> {
        self.ensure_started()?.process.write(b"clear\r")
    }

    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        debug!(cols, rows, "resizing interactive session");
        self.ensure_started()?.process.resize(cols, rows)
    }

    /// End the session. Without a running session this does nothing and
    /// returns false.
    pub fn stop(&mut self) -> bool {
        if self.active.is_none() {
            debug!("stop requested with no active session");
            return false;
        }
        self.exit_session(None);
        true
    }

    /// Apply an event coming from the pty backend.
    pub fn handle_event(&mut self, event: SessionEvent) {
        let current = self.active.as_ref().map(|a| a.generation);
        if current != Some(event.generation) {
            debug!(
                generation = event.generation,
                ?current,
                "ignoring event from a finished session"
            );
            return;
        }
        match event.event {
            PtyEvent::Output(bytes) => {
                let text = self.decode_output(&bytes);
                if text.is_empty() {
                    return;
                }
                self.push_output(&text);
                send_ui(
                    &self.ui,
                    UiMessage::new(OUTPUT_EVENT, OUTPUT_EVENT, UiPayload::Output(text)),
                );
            }
            PtyEvent::Exited(code) => self.exit_session(code),
        }
    }

    /// Decode a pty chunk, holding back a multi-byte character that the
    /// read split in two until its remaining bytes arrive.
    fn decode_output(&mut self, bytes: &[u8]) -> String {
        let mut buffered = std::mem::take(&mut self.partial_utf8);
        buffered.extend_from_slice(bytes);

        let mut text = String::with_capacity(buffered.len());
        let mut rest = buffered.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(invalid) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[invalid..];
                        }
                        None => {
                            self.partial_utf8 = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        text
    }

    fn push_output(&mut self, chunk: &str) {
        if chunk.contains('\r') {
            self.last_line.clear();
        }
        self.last_line.push_str(chunk);
    }

    fn exit_session(&mut self, code: Option<u32>) {
        if let Some(mut active) = self.active.take() {
            if let Some(pid) = active.process.pid() {
                match i32::try_from(pid) {
                    Ok(raw) => {
                        if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
                            debug!(pid, error = %err, "signalling shell failed");
                        }
                    }
                    Err(_) => warn!(pid, "shell pid out of range; not signalled"),
                }
            }
            if let Err(err) = active.process.kill() {
                debug!(error = %err, "killing pty failed");
            }
            info!(generation = active.generation, ?code, "interactive session ended");
        }

        if let Some(Pending { command, key }) = self.pending.take() {
            send_ui(
                &self.ui,
                UiMessage::status(command, key, Status::Success(Value::Bool(true))),
            );
        }
        self.last_line.clear();
        self.partial_utf8.clear();
    }
}

/// Shared, async access to the [`SessionManager`] with its event pump.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inner: Arc<Mutex<SessionManager>>,
}

impl SessionHandle {
    /// Wrap `manager` and spawn the task that feeds it pty events.
    ///
    /// The task stops when the last handle is dropped.
    pub fn spawn(
        manager: SessionManager,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Self {
        let inner = Arc::new(Mutex::new(manager));
        let weak: Weak<Mutex<SessionManager>> = Arc::downgrade(&inner);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.lock().await.handle_event(event);
            }
            debug!("session event pump stopped");
        });
        Self { inner }
    }

    pub async fn start(&self) -> Result<()> {
        self.inner.lock().await.start()
    }

    pub async fn write(&self, command: &str, key: &str, text: &str) -> Result<()> {
        self.inner.lock().await.write(command, key, text)
    }

    pub async fn clear(&self) -> Result<()> {
        self.inner.lock().await.clear()
    }

    pub async fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        self.inner.lock().await.resize(cols, rows)
    }

    pub async fn stop(&self) -> bool {
        self.inner.lock().await.stop()
    }

    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.is_active()
    }

    pub async fn last_line(&self) -> String {
        self.inner.lock().await.last_line().to_string()
    }
}
