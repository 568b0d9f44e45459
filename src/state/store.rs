// src/state/store.rs

use std::sync::{Arc, RwLock};

use tracing::debug;

use super::snapshot::SharedState;

/// Holder of the single authoritative snapshot.
///
/// Readers get an `Arc` to an immutable value; `replace` swaps the whole
/// snapshot in one step. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    current: Arc<RwLock<Arc<SharedState>>>,
}

impl SnapshotStore {
    pub fn new(initial: SharedState) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    /// The snapshot as of now.
    pub fn current(&self) -> Arc<SharedState> {
        let guard = self
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the snapshot wholesale, returning the previous one.
    pub fn replace(&self, next: SharedState) -> Arc<SharedState> {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        debug!("shared state snapshot replaced");
        std::mem::replace(&mut *guard, Arc::new(next))
    }
}
