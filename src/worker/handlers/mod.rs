// src/worker/handlers/mod.rs

pub mod tools;

use std::sync::Arc;

use serde_json::Value;

use crate::deferred::Deferred;
use crate::fs::FileSystem;
use crate::types::WorkerCategory;

use super::context::WorkerContext;

pub use tools::ToolsHandler;

/// Implements the functions of one worker category.
pub trait Handler: Send + Sync {
    /// Start `function` with `args`. Progress goes through the returned
    /// deferred; its outcome becomes the request's terminal status.
    fn handle(&self, ctx: WorkerContext, function: &str, args: Vec<Value>) -> Deferred<Value, Value>;
}

/// Categories whose functions are not provided by this build.
#[derive(Debug, Clone, Copy)]
pub struct UnsupportedHandler {
    category: WorkerCategory,
}

impl Handler for UnsupportedHandler {
    fn handle(&self, _ctx: WorkerContext, function: &str, _args: Vec<Value>) -> Deferred<Value, Value> {
        Deferred::rejected(format!(
            "unsupported command '{function}' for worker '{}'",
            self.category
        ))
    }
}

pub fn handler_for(category: WorkerCategory, fs: Arc<dyn FileSystem>) -> Arc<dyn Handler> {
    match category {
        WorkerCategory::Tools => Arc::new(ToolsHandler::new(fs)),
        other => Arc::new(UnsupportedHandler { category: other }),
    }
}
