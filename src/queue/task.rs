// src/queue/task.rs

use std::future::Future;
use std::pin::Pin;

/// One unit of batch work, owned by the queue until it has run.
pub trait TaskItem: Send + 'static {
    type Output: Send + 'static;

    /// Short description used in logs and failure reports.
    fn label(&self) -> String;

    /// Run the item. Called exactly once.
    fn run(self) -> Pin<Box<dyn Future<Output = anyhow::Result<Self::Output>> + Send>>;
}

/// Settled outcome of a single item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemResult<O> {
    Done(O),
    Failed { label: String, reason: String },
}

impl<O> ItemResult<O> {
    pub fn is_done(&self) -> bool {
        matches!(self, ItemResult::Done(_))
    }

    pub fn output(&self) -> Option<&O> {
        match self {
            ItemResult::Done(o) => Some(o),
            ItemResult::Failed { .. } => None,
        }
    }
}
