// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::deferred::Deferred;
use crate::exec::{run_request, ActiveRequests, RequestContext, WorkerBackend};
use crate::protocol::{Envelope, Status};
use crate::state::SnapshotStore;
use crate::types::WorkerCategory;

use super::{send_ui, UiMessage, UiSink};

/// Per-request knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Kill the worker and fail the request if it has not finished by then.
    pub deadline: Option<Duration>,
}

/// Spawns one worker per request and relays its messages.
///
/// This is the IO shell around [`RequestTracker`](super::RequestTracker):
/// it owns the snapshot store, the UI sink and the worker backend, and hands
/// each request to its own tokio task. Clones share everything.
#[derive(Clone)]
pub struct Coordinator {
    backend: Arc<dyn WorkerBackend>,
    store: SnapshotStore,
    ui: UiSink,
    active: ActiveRequests,
    default_deadline: Option<Duration>,
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("active", &self.active.keys())
            .field("default_deadline", &self.default_deadline)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    pub fn new(backend: Arc<dyn WorkerBackend>, store: SnapshotStore, ui: UiSink) -> Self {
        Self {
            backend,
            store,
            ui,
            active: ActiveRequests::new(),
            default_deadline: None,
        }
    }

    /// Deadline applied to requests that do not set their own.
    pub fn with_default_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.default_deadline = deadline;
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn ui(&self) -> &UiSink {
        &self.ui
    }

    /// Start a request and return its handle immediately.
    ///
    /// Every message the worker sends is also forwarded to the UI sink.
    /// Progress statuses notify the handle; the terminal status settles it.
    /// When no worker can be started, a failure is reported for the key and
    /// the returned handle is already rejected.
    pub fn dispatch(&self, envelope: Envelope, options: RequestOptions) -> Deferred<Value, Value> {
        let Some(category) = WorkerCategory::from_command(&envelope.name) else {
            let reason = format!("no worker category for command '{}'", envelope.name);
            return self.fail_early(&envelope, reason);
        };

        let link = match self.backend.spawn(category) {
            Ok(link) => link,
            Err(err) => return self.fail_early(&envelope, err.to_string()),
        };

        let (deferred, settler) = Deferred::pair();
        let (request_id, cancel_rx) = self.active.register(&envelope.key);
        let key = envelope.key.clone();

        info!(
            command = %envelope.name,
            key = %envelope.key,
            %category,
            args = envelope.args.len(),
            "dispatching request"
        );

        let ctx = RequestContext {
            envelope,
            store: self.store.clone(),
            ui: self.ui.clone(),
            settler,
            deadline: options.deadline.or(self.default_deadline),
        };
        let active = self.active.clone();
        tokio::spawn(async move {
            run_request(link, ctx, cancel_rx).await;
            active.finish(&key, request_id);
        });

        deferred
    }

    /// Kill the worker behind `key` early. Its request fails with
    /// "request cancelled". Returns false if nothing is running for `key`.
    pub fn cancel(&self, key: &str) -> bool {
        let cancelled = self.active.cancel(key);
        debug!(key, cancelled, "cancel requested");
        cancelled
    }

    /// Keys of requests whose worker has not been released yet.
    pub fn active_keys(&self) -> Vec<String> {
        self.active.keys()
    }

    fn fail_early(&self, envelope: &Envelope, reason: String) -> Deferred<Value, Value> {
        warn!(command = %envelope.name, key = %envelope.key, %reason, "request could not start");
        send_ui(
            &self.ui,
            UiMessage::status(
                envelope.name.clone(),
                envelope.key.clone(),
                Status::Failure(reason.clone()),
            ),
        );
        Deferred::rejected(reason)
    }
}
