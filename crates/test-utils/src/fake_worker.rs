use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::Notify;
use stackd::errors::{Result, StackdError};
use stackd::exec::{WorkerBackend, WorkerLink, WorkerProcess};
use stackd::protocol::FrameReader;
use stackd::types::WorkerCategory;

/// One action of a scripted worker, run after it has read the snapshot and
/// the command envelope.
#[derive(Debug, Clone)]
pub enum WorkerStep {
    /// Write a JSON frame.
    Frame(Value),
    /// Write a raw line, e.g. something that is not JSON.
    Line(String),
    Sleep(Duration),
    /// Close the worker's stdout right away.
    Close,
}

/// What one spawned fake worker saw.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedRequest {
    pub category: WorkerCategory,
    /// Frames read from the coordinator: snapshot first, then the envelope.
    pub frames: Vec<Value>,
}

#[derive(Debug, Default)]
struct Shared {
    scripts: Mutex<VecDeque<Vec<WorkerStep>>>,
    received: Mutex<Vec<ReceivedRequest>>,
    spawned: AtomicUsize,
    kills: AtomicUsize,
    fail_spawn: Mutex<Option<String>>,
}

/// A worker backend that never starts a process.
///
/// Each spawn pops the next script (an empty script once they run out) and
/// plays it over in-memory pipes. After its last step a scripted worker keeps
/// the channel open until it is killed.
#[derive(Debug, Clone, Default)]
pub struct FakeWorkerBackend {
    shared: Arc<Shared>,
}

impl FakeWorkerBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the script for the next spawned worker.
    pub fn push_script(&self, steps: Vec<WorkerStep>) -> &Self {
        self.shared.scripts.lock().unwrap().push_back(steps);
        self
    }

    /// Make every following spawn fail with `reason`.
    pub fn fail_spawns(&self, reason: &str) {
        *self.shared.fail_spawn.lock().unwrap() = Some(reason.to_string());
    }

    pub fn spawned(&self) -> usize {
        self.shared.spawned.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.shared.kills.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<ReceivedRequest> {
        self.shared.received.lock().unwrap().clone()
    }
}

impl WorkerBackend for FakeWorkerBackend {
    fn spawn(&self, category: WorkerCategory) -> Result<WorkerLink> {
        if let Some(reason) = self.shared.fail_spawn.lock().unwrap().clone() {
            return Err(StackdError::Spawn(reason));
        }
        self.shared.spawned.fetch_add(1, Ordering::SeqCst);

        let script = self
            .shared
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();

        let (coordinator_stdin, worker_stdin) = tokio::io::duplex(64 * 1024);
        let (worker_stdout, coordinator_stdout) = tokio::io::duplex(64 * 1024);
        let killed = Arc::new(Notify::new());

        tokio::spawn(play_script(
            category,
            script,
            worker_stdin,
            worker_stdout,
            Arc::clone(&self.shared),
            Arc::clone(&killed),
        ));

        Ok(WorkerLink {
            stdin: Box::new(coordinator_stdin),
            stdout: Box::new(coordinator_stdout),
            process: Box::new(FakeProcess {
                shared: Arc::clone(&self.shared),
                killed,
            }),
        })
    }
}

async fn play_script(
    category: WorkerCategory,
    script: Vec<WorkerStep>,
    stdin: DuplexStream,
    mut stdout: DuplexStream,
    shared: Arc<Shared>,
    killed: Arc<Notify>,
) {
    let mut reader = FrameReader::new(stdin);
    let mut frames = Vec::new();
    while frames.len() < 2 {
        match reader.next_value().await {
            Ok(Some(frame)) => frames.push(frame),
            _ => break,
        }
    }
    shared
        .received
        .lock()
        .unwrap()
        .push(ReceivedRequest { category, frames });

    for step in script {
        let written = match step {
            WorkerStep::Frame(frame) => write_line(&mut stdout, &frame.to_string()).await,
            WorkerStep::Line(line) => write_line(&mut stdout, &line).await,
            WorkerStep::Sleep(duration) => {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => true,
                    _ = killed.notified() => return,
                }
            }
            WorkerStep::Close => return,
        };
        if !written {
            return;
        }
    }
    killed.notified().await;
}

async fn write_line(out: &mut DuplexStream, line: &str) -> bool {
    out.write_all(format!("{line}\n").as_bytes()).await.is_ok() && out.flush().await.is_ok()
}

struct FakeProcess {
    shared: Arc<Shared>,
    killed: Arc<Notify>,
}

impl WorkerProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    fn kill(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.shared.kills.fetch_add(1, Ordering::SeqCst);
            self.killed.notify_one();
            Ok(())
        })
    }
}
