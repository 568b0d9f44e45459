// src/exec/backend.rs

//! Pluggable worker-process backend.
//!
//! The coordinator asks a [`WorkerBackend`] for a fresh [`WorkerLink`] per
//! request instead of spawning processes itself, so tests can hand it
//! in-memory pipes while production re-executes the current binary.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::errors::{Result, StackdError};
use crate::types::WorkerCategory;

/// Handle on the OS side of a worker.
pub trait WorkerProcess: Send {
    /// OS pid, when there is one.
    fn id(&self) -> Option<u32>;

    /// Terminate the worker. Killing an already exited worker is not an error.
    fn kill(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Both directions of a worker channel plus its process handle.
pub struct WorkerLink {
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub process: Box<dyn WorkerProcess>,
}

impl fmt::Debug for WorkerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerLink")
            .field("pid", &self.process.id())
            .finish_non_exhaustive()
    }
}

/// Trait abstracting how worker processes are started.
///
/// Production code uses [`RealWorkerBackend`]; tests provide scripted
/// implementations that never touch the OS.
pub trait WorkerBackend: Send + Sync {
    fn spawn(&self, category: WorkerCategory) -> Result<WorkerLink>;
}

/// Starts `<program> <args...> <category>` with piped stdio.
#[derive(Debug, Clone)]
pub struct RealWorkerBackend {
    program: PathBuf,
    args: Vec<String>,
}

impl RealWorkerBackend {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-execute the running binary in worker mode (`<exe> worker <category>`).
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe()?;
        Ok(Self::new(program, vec!["worker".to_string()]))
    }
}

impl WorkerBackend for RealWorkerBackend {
    fn spawn(&self, category: WorkerCategory) -> Result<WorkerLink> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(category.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            StackdError::Spawn(format!(
                "spawning worker '{}' via {:?}: {e}",
                category, self.program
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| StackdError::Spawn(format!("worker '{category}' has no stdin")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| StackdError::Spawn(format!("worker '{category}' has no stdout")))?;

        // Worker logs arrive on stderr; keep the pipe drained.
        if let Some(stderr) = child.stderr.take() {
            let pid = child.id();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(%category, pid, "worker stderr: {}", line);
                }
            });
        }

        info!(%category, pid = child.id(), "worker process spawned");

        Ok(WorkerLink {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            process: Box::new(ChildProcess { child, category }),
        })
    }
}

struct ChildProcess {
    child: Child,
    category: WorkerCategory,
}

impl WorkerProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn kill(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if let Ok(Some(status)) = self.child.try_wait() {
                debug!(category = %self.category, ?status, "worker already exited");
                return Ok(());
            }
            self.child.kill().await?;
            Ok(())
        })
    }
}
