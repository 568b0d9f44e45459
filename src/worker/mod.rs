// src/worker/mod.rs

//! Worker side of the protocol.
//!
//! A worker process reads two frames from the coordinator (the snapshot,
//! then `[command, key, fn, ...args]`), runs `fn` on its category's
//! [`Handler`] and streams the outcome back: progress as it happens, then
//! exactly one terminal status. Every outgoing frame goes through a single
//! writer task, so the coordinator sees them in the order they were produced.

pub mod context;
pub mod handlers;

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::deferred::Deferred;
use crate::errors::{Result, StackdError};
use crate::protocol::{Envelope, FrameReader, FrameWriter, Status, WorkerMessage};
use crate::state::SharedState;
use crate::types::WorkerCategory;

pub use context::WorkerContext;
pub use handlers::{handler_for, Handler};

/// Run one request as a worker for `category`, reading frames from `reader`
/// and writing replies to `writer`.
///
/// Handlers report progress through their deferred; the listener is
/// attached as soon as the handler returns, so notifications must come from
/// a task that yields first (the worker binary runs a current-thread
/// runtime).
pub async fn run_worker<R, W>(
    category: WorkerCategory,
    handler: Arc<dyn Handler>,
    reader: R,
    writer: W,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut frames = FrameReader::new(reader);

    let snapshot: SharedState = match frames.next_value().await? {
        Some(value) => serde_json::from_value(value)
            .map_err(|e| StackdError::Protocol(format!("invalid snapshot frame: {e}")))?,
        None => {
            return Err(StackdError::Protocol(
                "coordinator closed the channel before sending the snapshot".to_string(),
            ));
        }
    };
    let envelope = match frames.next_value().await? {
        Some(value) => Envelope::from_wire(value)?,
        None => {
            return Err(StackdError::Protocol(
                "coordinator closed the channel before sending the command".to_string(),
            ));
        }
    };

    let Envelope {
        name: command,
        key,
        mut args,
    } = envelope;
    info!(%category, %command, %key, "worker received request");

    let (outbox, outbox_rx) = mpsc::unbounded_channel();
    let writer_task = spawn_writer(writer, outbox_rx);

    let function = match args.first() {
        Some(Value::String(function)) => {
            let function = function.clone();
            args.remove(0);
            Some(function)
        }
        _ => None,
    };

    let deferred = match &function {
        Some(function) => {
            let ctx = WorkerContext::new(Arc::new(snapshot), key.clone(), outbox.clone());
            handler.handle(ctx, function, args)
        }
        None => Deferred::rejected(format!("'{command}' expects a function name")),
    };

    {
        let outbox = outbox.clone();
        let command = command.clone();
        let key = key.clone();
        deferred.on_progress(move |payload| {
            let _ = outbox.send(WorkerMessage::status(
                command.clone(),
                key.clone(),
                Status::Progress(payload),
            ));
        });
    }

    let status = match deferred.await {
        Ok(data) => {
            info!(%category, %command, %key, function = ?function, "request succeeded");
            Status::Success(data)
        }
        Err(rejection) => {
            warn!(%category, %command, %key, function = ?function, reason = %rejection, "request failed");
            Status::Failure(rejection.reason().to_string())
        }
    };
    let _ = outbox.send(WorkerMessage::status(command, key, status));
    drop(outbox);

    match writer_task.await {
        Ok(result) => result,
        Err(err) => Err(StackdError::Other(err.into())),
    }
}

/// Write frames in arrival order until the terminal status is out.
fn spawn_writer<W>(
    writer: W,
    mut outbox: mpsc::UnboundedReceiver<WorkerMessage>,
) -> JoinHandle<Result<()>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut frames = FrameWriter::new(writer);
        while let Some(message) = outbox.recv().await {
            let terminal =
                matches!(&message, WorkerMessage::Status { status, .. } if status.is_terminal());
            frames.send(&message.to_wire()?).await?;
            if terminal {
                break;
            }
        }
        debug!("worker writer finished");
        Ok(())
    })
}
