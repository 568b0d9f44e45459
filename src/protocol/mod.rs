// src/protocol/mod.rs

//! Coordinator <-> worker message protocol.
//!
//! On the wire every message is one JSON value per line:
//!
//! - coordinator -> worker, message 1: the [`SharedState`] object;
//! - coordinator -> worker, message 2: `[command, key, ...args]`;
//! - worker -> coordinator: `{command, key, info}`.
//!
//! When `info` carries a numeric `code` it is a protocol status: `0`
//! success (payload in `data`), `1` failure (reason in `msg`), `200`
//! progress (payload in `msg`). Inside the crate those codes are decoded into
//! the tagged [`Status`] enum and never leak past [`codec`].

pub mod codec;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::{Result, StackdError};
use crate::state::SharedState;

pub use codec::{FrameReader, FrameWriter};

/// Reserved command a worker uses to replace the coordinator's snapshot.
pub const REPLACE_STATE_COMMAND: &str = "application:global-server-updata";

pub const CODE_SUCCESS: i64 = 0;
pub const CODE_FAILURE: i64 = 1;
pub const CODE_PROGRESS: i64 = 200;

/// A request: which handler, which correlation key, which arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub name: String,
    pub key: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Envelope {
    pub fn new(name: impl Into<String>, key: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            args,
        }
    }

    /// Wire form: `[name, key, ...args]`.
    pub fn to_wire(&self) -> Value {
        let mut items = Vec::with_capacity(self.args.len() + 2);
        items.push(Value::String(self.name.clone()));
        items.push(Value::String(self.key.clone()));
        items.extend(self.args.iter().cloned());
        Value::Array(items)
    }

    pub fn from_wire(value: Value) -> Result<Self> {
        let Value::Array(items) = value else {
            return Err(StackdError::Protocol(
                "command message must be a JSON array".to_string(),
            ));
        };
        let mut items = items.into_iter();
        let name = match items.next() {
            Some(Value::String(s)) => s,
            _ => {
                return Err(StackdError::Protocol(
                    "command message is missing its command name".to_string(),
                ));
            }
        };
        let key = match items.next() {
            Some(Value::String(s)) => s,
            _ => {
                return Err(StackdError::Protocol(format!(
                    "command message '{name}' is missing its key"
                )));
            }
        };
        Ok(Self {
            name,
            key,
            args: items.collect(),
        })
    }
}

/// Protocol status of a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    /// Non-terminal progress payload.
    Progress(Value),
    /// Terminal success with its payload.
    Success(Value),
    /// Terminal failure with a human-readable reason.
    Failure(String),
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Progress(_))
    }

    pub fn code(&self) -> i64 {
        match self {
            Status::Progress(_) => CODE_PROGRESS,
            Status::Success(_) => CODE_SUCCESS,
            Status::Failure(_) => CODE_FAILURE,
        }
    }

    /// Encode as a wire `info` object.
    pub fn to_info(&self) -> Value {
        match self {
            Status::Progress(msg) => json!({ "code": CODE_PROGRESS, "msg": msg }),
            Status::Success(data) => json!({ "code": CODE_SUCCESS, "data": data }),
            Status::Failure(msg) => json!({ "code": CODE_FAILURE, "msg": msg }),
        }
    }

    /// Decode a wire `info` value. `None` means "not a status, forward as is".
    pub fn from_info(info: &Value) -> Option<Status> {
        let code = info.as_object()?.get("code")?.as_i64()?;
        let field = |name: &str| info.get(name).cloned().unwrap_or(Value::Null);
        match code {
            CODE_SUCCESS => Some(Status::Success(field("data"))),
            CODE_PROGRESS => Some(Status::Progress(field("msg"))),
            CODE_FAILURE => {
                let reason = match info.get("msg") {
                    Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
                    Some(Value::Null) | None => "worker reported failure".to_string(),
                    Some(Value::String(_)) => "worker reported failure".to_string(),
                    Some(other) => other.to_string(),
                };
                Some(Status::Failure(reason))
            }
            _ => None,
        }
    }
}

/// Raw `{command, key, info}` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub command: String,
    pub key: String,
    #[serde(default)]
    pub info: Value,
}

/// A decoded worker -> coordinator message.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    /// Protocol status for the request. `info` is the frame's payload as
    /// received; the UI gets it unchanged.
    Status {
        command: String,
        key: String,
        status: Status,
        info: Value,
    },
    /// The worker asks the coordinator to replace its snapshot.
    ReplaceState { key: String, state: SharedState },
    /// Any other payload, forwarded transparently.
    Data {
        command: String,
        key: String,
        info: Value,
    },
}

impl WorkerMessage {
    /// A status message whose payload is the canonical encoding of `status`.
    pub fn status(command: impl Into<String>, key: impl Into<String>, status: Status) -> Self {
        let info = status.to_info();
        WorkerMessage::Status {
            command: command.into(),
            key: key.into(),
            status,
            info,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            WorkerMessage::Status { key, .. }
            | WorkerMessage::ReplaceState { key, .. }
            | WorkerMessage::Data { key, .. } => key,
        }
    }

    pub fn from_wire(frame: WireMessage) -> Result<Self> {
        let WireMessage { command, key, info } = frame;
        if command == REPLACE_STATE_COMMAND {
            let state: SharedState = serde_json::from_value(info).map_err(|e| {
                StackdError::Protocol(format!("invalid shared state replacement: {e}"))
            })?;
            return Ok(WorkerMessage::ReplaceState { key, state });
        }
        match Status::from_info(&info) {
            Some(status) => Ok(WorkerMessage::Status {
                command,
                key,
                status,
                info,
            }),
            None => Ok(WorkerMessage::Data { command, key, info }),
        }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let frame: WireMessage = serde_json::from_value(value)
            .map_err(|e| StackdError::Protocol(format!("malformed worker message: {e}")))?;
        Self::from_wire(frame)
    }

    pub fn to_wire(&self) -> Result<WireMessage> {
        Ok(match self {
            WorkerMessage::Status { command, key, info, .. }
            | WorkerMessage::Data { command, key, info } => WireMessage {
                command: command.clone(),
                key: key.clone(),
                info: info.clone(),
            },
            WorkerMessage::ReplaceState { key, state } => WireMessage {
                command: REPLACE_STATE_COMMAND.to_string(),
                key: key.clone(),
                info: serde_json::to_value(state)?,
            },
        })
    }
}
