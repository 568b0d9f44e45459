// src/exec/mod.rs

//! Worker process execution layer.
//!
//! - [`backend`] provides the `WorkerBackend` trait and the production
//!   `RealWorkerBackend`, which tests replace with scripted links.
//! - [`request_runner`] drives a single request over one worker link.
//! - [`registry`] tracks in-flight requests so they can be cancelled.

pub mod backend;
pub mod registry;
pub mod request_runner;

pub use backend::{RealWorkerBackend, WorkerBackend, WorkerLink, WorkerProcess};
pub use registry::ActiveRequests;
pub use request_runner::{run_request, RequestContext};
