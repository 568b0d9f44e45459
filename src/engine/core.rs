// src/engine/core.rs

//! Pure per-request state machine.
//!
//! A [`RequestTracker`] consumes the decoded messages of one worker channel
//! and returns a [`RequestStep`] describing what the IO shell should do:
//! forward to the UI, replace the snapshot, notify progress, settle the
//! caller's handle, tear the worker down.
//!
//! It owns no channels, no processes and performs no IO, so every protocol
//! rule can be tested synchronously.

use serde_json::Value;
use tracing::debug;

use crate::engine::{UiMessage, UiPayload};
use crate::protocol::{Envelope, Status, WorkerMessage, REPLACE_STATE_COMMAND};
use crate::state::SharedState;

/// Commands for the IO shell, in the order they must be applied:
/// snapshot replacement, UI forward, progress, settlement, teardown.
#[derive(Debug, Default, PartialEq)]
pub struct RequestStep {
    pub replace_state: Option<SharedState>,
    pub forward: Option<UiMessage>,
    pub progress: Option<Value>,
    pub settle: Option<Result<Value, String>>,
    pub teardown: bool,
}

impl RequestStep {
    pub fn is_empty(&self) -> bool {
        *self == RequestStep::default()
    }
}

#[derive(Debug, Clone)]
pub struct RequestTracker {
    command: String,
    key: String,
    finished: bool,
}

impl RequestTracker {
    pub fn new(envelope: &Envelope) -> Self {
        Self {
            command: envelope.name.clone(),
            key: envelope.key.clone(),
            finished: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether a terminal status has been seen (or synthesized).
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn on_message(&mut self, message: WorkerMessage) -> RequestStep {
        if self.finished {
            debug!(
                command = %self.command,
                key = %self.key,
                "message after teardown ignored"
            );
            return RequestStep::default();
        }

        match message {
            WorkerMessage::ReplaceState { key, state } => RequestStep {
                forward: Some(UiMessage::new(
                    REPLACE_STATE_COMMAND,
                    key,
                    UiPayload::State(state.clone()),
                )),
                replace_state: Some(state),
                ..RequestStep::default()
            },
            WorkerMessage::Data { command, key, info } => RequestStep {
                forward: Some(UiMessage::new(command, key, UiPayload::Data(info))),
                ..RequestStep::default()
            },
            WorkerMessage::Status {
                command,
                key,
                status,
                info,
            } => {
                let mut step = RequestStep::default();
                match &status {
                    Status::Progress(payload) => step.progress = Some(payload.clone()),
                    Status::Success(data) => {
                        step.settle = Some(Ok(data.clone()));
                        step.teardown = true;
                    }
                    Status::Failure(reason) => {
                        step.settle = Some(Err(reason.clone()));
                        step.teardown = true;
                    }
                }
                self.finished = step.teardown;
                step.forward = Some(UiMessage::forwarded(command, key, status, info));
                step
            }
        }
    }

    /// The worker channel ended, failed, or the request was aborted.
    ///
    /// Unless a terminal status was already seen, this synthesizes a
    /// failure for the request's key so nobody waits forever.
    pub fn on_channel_closed(&mut self, reason: impl Into<String>) -> RequestStep {
        if self.finished {
            return RequestStep {
                teardown: true,
                ..RequestStep::default()
            };
        }
        self.finished = true;
        let reason = reason.into();
        RequestStep {
            forward: Some(UiMessage::status(
                self.command.clone(),
                self.key.clone(),
                Status::Failure(reason.clone()),
            )),
            settle: Some(Err(reason)),
            teardown: true,
            ..RequestStep::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tracker() -> RequestTracker {
        RequestTracker::new(&Envelope::new("app-fork:tools", "K", vec![]))
    }

    fn status(status: Status) -> WorkerMessage {
        WorkerMessage::status("app-fork:tools", "K", status)
    }

    #[test]
    fn progress_forwards_and_notifies_without_teardown() {
        let mut t = tracker();
        let step = t.on_message(status(Status::Progress(json!(10))));
        assert!(step.forward.is_some());
        assert_eq!(step.progress, Some(json!(10)));
        assert!(step.settle.is_none());
        assert!(!step.teardown);
        assert!(!t.is_finished());
    }

    #[test]
    fn success_settles_and_tears_down_once() {
        let mut t = tracker();
        let step = t.on_message(status(Status::Success(json!(false))));
        assert_eq!(step.settle, Some(Ok(json!(false))));
        assert!(step.teardown);

        let late = t.on_message(status(Status::Progress(json!(1))));
        assert!(late.is_empty());
    }

    #[test]
    fn forwarded_status_keeps_the_worker_payload() {
        let mut t = tracker();
        let info = json!({"code": 1, "msg": {"port": 9000}, "hint": "busy"});
        let step = t.on_message(WorkerMessage::Status {
            command: "app-fork:tools".into(),
            key: "K".into(),
            status: Status::from_info(&info).unwrap(),
            info: info.clone(),
        });
        assert_eq!(step.settle, Some(Err("{\"port\":9000}".into())));
        assert_eq!(step.forward.unwrap().to_json()["info"], info);
    }

    #[test]
    fn replace_state_is_not_terminal() {
        let mut t = tracker();
        let state = SharedState::with_layout(std::path::Path::new("/srv"));
        let step = t.on_message(WorkerMessage::ReplaceState {
            key: "K".into(),
            state: state.clone(),
        });
        assert_eq!(step.replace_state, Some(state));
        assert!(!step.teardown);
        assert!(!t.is_finished());
    }

    #[test]
    fn closed_channel_synthesizes_failure_only_before_finish() {
        let mut t = tracker();
        let step = t.on_channel_closed("worker exited");
        assert_eq!(step.settle, Some(Err("worker exited".into())));
        let forward = step.forward.unwrap();
        assert_eq!(forward.key, "K");
        assert!(forward.is_terminal());

        let again = t.on_channel_closed("eof");
        assert!(again.forward.is_none());
        assert!(again.settle.is_none());
    }
}
