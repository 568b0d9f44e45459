// src/queue/mod.rs

//! Bounded-concurrency batch runner.
//!
//! A [`TaskQueue`] runs a finite list of independent [`TaskItem`]s with at
//! most [`TASK_QUEUE_CONCURRENCY`] of them in flight, reports progress after
//! each item settles and fires a single `end` callback once every item has
//! been attempted.
//!
//! The queue is best-effort by contract: a failing (or panicking) item is
//! recorded in the [`QueueReport`] and never stops the rest of the batch.

pub mod runner;
pub mod task;

pub use runner::{QueueProgress, QueueReport, TaskQueue, TASK_QUEUE_CONCURRENCY};
pub use task::{ItemResult, TaskItem};
