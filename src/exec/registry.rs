// src/exec/registry.rs

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tracing::warn;

#[derive(Debug)]
struct ActiveEntry {
    id: u64,
    cancel: oneshot::Sender<()>,
}

/// In-flight requests by key, each with the sender half of its cancel
/// channel. Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct ActiveRequests {
    entries: Arc<Mutex<HashMap<String, ActiveEntry>>>,
    next_id: Arc<AtomicU64>,
}

impl ActiveRequests {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ActiveEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a new request for `key`. Returns its id and the receiver the
    /// request runner should watch.
    pub fn register(&self, key: &str) -> (u64, oneshot::Receiver<()>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel, rx) = oneshot::channel();
        if self
            .lock()
            .insert(key.to_string(), ActiveEntry { id, cancel })
            .is_some()
        {
            warn!(key, "key reused while a request is still running; older request can no longer be cancelled");
        }
        (id, rx)
    }

    /// Forget a finished request. Only removes the entry if it still belongs
    /// to request `id`.
    pub fn finish(&self, key: &str, id: u64) {
        let mut entries = self.lock();
        if entries.get(key).is_some_and(|e| e.id == id) {
            entries.remove(key);
        }
    }

    /// Ask the request for `key` to stop. Returns false if none is running.
    pub fn cancel(&self, key: &str) -> bool {
        match self.lock().remove(key) {
            Some(entry) => entry.cancel.send(()).is_ok(),
            None => false,
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}
