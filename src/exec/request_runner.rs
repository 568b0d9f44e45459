// src/exec/request_runner.rs

//! Drives one request over one worker link.

use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncWrite;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::deferred::Settler;
use crate::engine::core::{RequestStep, RequestTracker};
use crate::engine::{send_ui, UiSink};
use crate::errors::Result;
use crate::exec::backend::WorkerLink;
use crate::protocol::{Envelope, FrameReader, FrameWriter, WorkerMessage};
use crate::state::SnapshotStore;

/// Everything a request needs besides its worker link.
#[derive(Debug)]
pub struct RequestContext {
    pub envelope: Envelope,
    pub store: SnapshotStore,
    pub ui: UiSink,
    pub settler: Settler<Value, Value>,
    pub deadline: Option<Duration>,
}

/// Run a request to completion.
///
/// - Sends the snapshot and the command envelope, then feeds every worker
///   message through a [`RequestTracker`].
/// - A terminal status, end-of-stream, a malformed frame, the deadline or a
///   cancel request all end the loop; the last four synthesize a failure.
/// - The worker's stdin is closed and its process killed before returning,
///   whatever the reason.
pub async fn run_request(
    link: WorkerLink,
    ctx: RequestContext,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let WorkerLink {
        stdin,
        stdout,
        mut process,
    } = link;
    let command = ctx.envelope.name.clone();
    let key = ctx.envelope.key.clone();
    let pid = process.id();

    let mut writer = FrameWriter::new(stdin);
    let mut reader = FrameReader::new(stdout);
    let mut tracker = RequestTracker::new(&ctx.envelope);

    debug!(%command, %key, pid, "sending request to worker");

    if let Err(err) = handshake(&mut writer, &ctx).await {
        let step = tracker.on_channel_closed(format!("failed to send request to worker: {err}"));
        apply(&ctx, step);
    } else {
        let sleep = async {
            match ctx.deadline {
                Some(deadline) => tokio::time::sleep(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(sleep);
        let mut cancel_open = true;

        loop {
            let step = tokio::select! {
                frame = reader.next_value() => match frame {
                    Ok(Some(value)) => match WorkerMessage::from_value(value) {
                        Ok(message) => tracker.on_message(message),
                        Err(err) => tracker.on_channel_closed(err.to_string()),
                    },
                    Ok(None) => {
                        tracker.on_channel_closed("worker closed its channel without a result")
                    }
                    Err(err) => tracker.on_channel_closed(err.to_string()),
                },

                cancel = &mut cancel_rx, if cancel_open => match cancel {
                    Ok(()) => {
                        info!(%command, %key, pid, "cancellation requested; killing worker");
                        tracker.on_channel_closed("request cancelled")
                    }
                    Err(_) => {
                        // Registry entry replaced or dropped: nobody can cancel anymore.
                        cancel_open = false;
                        continue;
                    }
                },

                _ = &mut sleep => {
                    warn!(%command, %key, pid, deadline = ?ctx.deadline, "worker deadline expired; killing worker");
                    tracker.on_channel_closed(format!(
                        "worker did not finish within {:?}",
                        ctx.deadline.unwrap_or_default()
                    ))
                }
            };

            let teardown = step.teardown;
            apply(&ctx, step);
            if teardown {
                break;
            }
        }
    }

    if let Err(err) = writer.shutdown().await {
        debug!(%command, %key, error = %err, "closing worker stdin failed");
    }
    if let Err(err) = process.kill().await {
        warn!(%command, %key, pid, error = %err, "failed to kill worker process");
    }
    info!(%command, %key, pid, "worker released");
}

async fn handshake<W>(writer: &mut FrameWriter<W>, ctx: &RequestContext) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let snapshot = ctx.store.current();
    writer.send(snapshot.as_ref()).await?;
    writer.send(&ctx.envelope.to_wire()).await?;
    Ok(())
}

fn apply(ctx: &RequestContext, step: RequestStep) {
    let RequestStep {
        replace_state,
        forward,
        progress,
        settle,
        teardown: _,
    } = step;

    if let Some(state) = replace_state {
        ctx.store.replace(state);
        info!(command = %ctx.envelope.name, key = %ctx.envelope.key, "shared state replaced by worker");
    }
    if let Some(message) = forward {
        send_ui(&ctx.ui, message);
    }
    if let Some(payload) = progress {
        ctx.settler.notify(payload);
    }
    match settle {
        Some(Ok(value)) => {
            info!(command = %ctx.envelope.name, key = %ctx.envelope.key, "request succeeded");
            ctx.settler.resolve(value);
        }
        Some(Err(reason)) => {
            warn!(command = %ctx.envelope.name, key = %ctx.envelope.key, %reason, "request failed");
            ctx.settler.reject(reason);
        }
        None => {}
    }
}
