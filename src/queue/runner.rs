// src/queue/runner.rs

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use tokio::task::{Id, JoinSet};
use tracing::{debug, info, warn};

use super::task::{ItemResult, TaskItem};

/// Maximum number of items whose `run` is outstanding at the same time.
pub const TASK_QUEUE_CONCURRENCY: usize = 4;

/// Snapshot handed to the progress callback after each item settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueProgress {
    /// Items settled so far (successes and failures).
    pub finished: usize,
    /// How many of `finished` failed.
    pub failed: usize,
    /// Total number of items in the batch.
    pub count: usize,
}

impl QueueProgress {
    pub fn percent(&self) -> f64 {
        if self.count == 0 {
            return 100.0;
        }
        (self.finished as f64 / self.count as f64) * 100.0
    }
}

/// Aggregated per-item results, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueReport<O> {
    pub results: Vec<ItemResult<O>>,
}

impl<O> QueueReport<O> {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_done()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

type ProgressFn = Box<dyn FnMut(QueueProgress) + Send>;
type EndFn<O> = Box<dyn FnOnce(&QueueReport<O>) + Send>;

/// One batch run. Build it, then `run()` it once.
pub struct TaskQueue<T: TaskItem> {
    items: Vec<T>,
    on_progress: Option<ProgressFn>,
    on_end: Option<EndFn<T::Output>>,
}

impl<T: TaskItem> fmt::Debug for TaskQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("items", &self.items.len())
            .field("has_progress", &self.on_progress.is_some())
            .field("has_end", &self.on_end.is_some())
            .finish()
    }
}

impl<T: TaskItem> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TaskItem> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            on_progress: None,
            on_end: None,
        }
    }

    /// Register the per-item progress callback.
    pub fn progress<F>(mut self, f: F) -> Self
    where
        F: FnMut(QueueProgress) + Send + 'static,
    {
        self.on_progress = Some(Box::new(f));
        self
    }

    /// Register the callback fired once after every item has settled.
    pub fn end<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&QueueReport<T::Output>) + Send + 'static,
    {
        self.on_end = Some(Box::new(f));
        self
    }

    /// Set the items of this batch, replacing any previous ones.
    pub fn init_queue(mut self, items: impl IntoIterator<Item = T>) -> Self {
        self.items = items.into_iter().collect();
        self
    }

    /// Run every item, keeping at most [`TASK_QUEUE_CONCURRENCY`] in flight.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn run(self) -> QueueReport<T::Output> {
        let TaskQueue {
            items,
            mut on_progress,
            on_end,
        } = self;

        let count = items.len();
        let bound = TASK_QUEUE_CONCURRENCY.max(1);
        info!(count, bound, "task queue started");

        let mut results: Vec<Option<ItemResult<T::Output>>> =
            std::iter::repeat_with(|| None).take(count).collect();
        let mut pending = items.into_iter().enumerate();
        let mut in_flight: JoinSet<anyhow::Result<T::Output>> = JoinSet::new();
        let mut index_of: HashMap<Id, (usize, String)> = HashMap::new();

        let mut spawn_next = |in_flight: &mut JoinSet<_>, index_of: &mut HashMap<_, _>| {
            if let Some((index, item)) = pending.next() {
                let label = item.label();
                debug!(index, item = %label, "task item started");
                let handle = in_flight.spawn(item.run());
                index_of.insert(handle.id(), (index, label));
            }
        };

        for _ in 0..bound {
            spawn_next(&mut in_flight, &mut index_of);
        }

        let mut finished = 0usize;
        let mut failed = 0usize;

        while let Some(joined) = in_flight.join_next_with_id().await {
            let (id, outcome) = match joined {
                Ok((id, Ok(output))) => (id, Ok(output)),
                Ok((id, Err(err))) => (id, Err(format!("{err:#}"))),
                Err(join_err) => (join_err.id(), Err(join_err.to_string())),
            };

            let Some((index, label)) = index_of.remove(&id) else {
                warn!(?id, "settled task item is not tracked by the queue");
                continue;
            };

            let result = match outcome {
                Ok(output) => {
                    debug!(index, item = %label, "task item done");
                    ItemResult::Done(output)
                }
                Err(reason) => {
                    failed += 1;
                    warn!(index, item = %label, error = %reason, "task item failed");
                    ItemResult::Failed { label, reason }
                }
            };
            results[index] = Some(result);
            finished += 1;

            if let Some(cb) = on_progress.as_mut() {
                cb(QueueProgress {
                    finished,
                    failed,
                    count,
                });
            }

            spawn_next(&mut in_flight, &mut index_of);
        }

        let report = QueueReport {
            results: results
                .into_iter()
                .map(|r| {
                    r.unwrap_or_else(|| ItemResult::Failed {
                        label: String::new(),
                        reason: "task item never settled".to_string(),
                    })
                })
                .collect(),
        };

        info!(
            count,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "task queue finished"
        );

        if let Some(cb) = on_end {
            cb(&report);
        }
        report
    }
}
