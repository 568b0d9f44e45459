// src/worker/context.rs

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::WorkerMessage;
use crate::state::SharedState;

/// What a handler gets to work with besides its arguments.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    snapshot: Arc<SharedState>,
    key: String,
    outbox: mpsc::UnboundedSender<WorkerMessage>,
}

impl WorkerContext {
    pub fn new(
        snapshot: Arc<SharedState>,
        key: impl Into<String>,
        outbox: mpsc::UnboundedSender<WorkerMessage>,
    ) -> Self {
        Self {
            snapshot,
            key: key.into(),
            outbox,
        }
    }

    /// The snapshot the coordinator sent at startup.
    pub fn snapshot(&self) -> &SharedState {
        &self.snapshot
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Ask the coordinator to replace its snapshot with `state`.
    ///
    /// The local copy is not touched. Returns false once the channel to the
    /// coordinator is gone.
    pub fn replace_state(&self, state: SharedState) -> bool {
        debug!(key = %self.key, "publishing replacement snapshot");
        self.outbox
            .send(WorkerMessage::ReplaceState {
                key: self.key.clone(),
                state,
            })
            .is_ok()
    }
}
