// src/engine/mod.rs

//! Coordinator side of the worker protocol.
//!
//! This module ties together:
//! - the pure per-request state machine ([`core`]) that decides what each
//!   worker message means (forward, replace snapshot, settle, tear down);
//! - the async [`Coordinator`] ([`runtime`]) that spawns one worker process
//!   per request and drives the state machine from its channel;
//! - the [`CommandRouter`] ([`router`]) that maps UI command names onto the
//!   coordinator, the interactive session, the DNS collaborator and the
//!   password check.
//!
//! Everything that reaches the UI goes through a [`UiSink`] as a
//! [`UiMessage`].

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::Status;
use crate::state::SharedState;

/// What the UI receives for a request.
#[derive(Debug, Clone, PartialEq)]
pub enum UiPayload {
    /// Protocol status forwarded from a worker (or synthesized on failure).
    Status(Status),
    /// The coordinator's snapshot was replaced.
    State(SharedState),
    /// Transparent payload.
    Data(Value),
    /// Raw terminal output.
    Output(String),
}

/// A message for the UI layer: `{command, key, payload}`.
#[derive(Debug, Clone, PartialEq)]
pub struct UiMessage {
    pub command: String,
    pub key: String,
    pub payload: UiPayload,
    /// The worker's `info` as received, for messages forwarded from a worker.
    pub wire_info: Option<Value>,
}

impl UiMessage {
    pub fn new(command: impl Into<String>, key: impl Into<String>, payload: UiPayload) -> Self {
        Self {
            command: command.into(),
            key: key.into(),
            payload,
            wire_info: None,
        }
    }

    /// A status relayed from a worker together with its original payload.
    pub fn forwarded(
        command: impl Into<String>,
        key: impl Into<String>,
        status: Status,
        info: Value,
    ) -> Self {
        Self {
            wire_info: Some(info),
            ..Self::status(command, key, status)
        }
    }

    pub fn status(command: impl Into<String>, key: impl Into<String>, status: Status) -> Self {
        Self::new(command, key, UiPayload::Status(status))
    }

    /// Whether this message ends its request.
    pub fn is_terminal(&self) -> bool {
        matches!(&self.payload, UiPayload::Status(s) if s.is_terminal())
    }

    /// JSON rendering (`{command, key, info}`) used by the CLI front end.
    ///
    /// Forwarded statuses render the worker's payload untouched. Snapshot
    /// payloads are rendered without the elevation password.
    pub fn to_json(&self) -> Value {
        if let Some(info) = &self.wire_info {
            return json!({ "command": self.command, "key": self.key, "info": info });
        }
        let info = match &self.payload {
            UiPayload::Status(status) => status.to_info(),
            UiPayload::State(state) => {
                serde_json::to_value(state.with_password(None)).unwrap_or(Value::Null)
            }
            UiPayload::Data(value) => value.clone(),
            UiPayload::Output(text) => Value::String(text.clone()),
        };
        json!({ "command": self.command, "key": self.key, "info": info })
    }
}

/// Channel to the UI layer.
pub type UiSink = mpsc::UnboundedSender<UiMessage>;

/// Deliver a message, tolerating a UI that has gone away.
pub(crate) fn send_ui(ui: &UiSink, message: UiMessage) {
    if let Err(err) = ui.send(message) {
        debug!(command = %err.0.command, key = %err.0.key, "ui sink closed; message dropped");
    }
}

pub mod core;
pub mod router;
pub mod runtime;

pub use core::{RequestStep, RequestTracker};
pub use router::CommandRouter;
pub use runtime::{Coordinator, RequestOptions};
