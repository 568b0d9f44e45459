// src/session/pty.rs

//! Pseudo-terminal backend.

use std::fmt::Debug;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::thread;

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::errors::{Result, StackdError};

/// Installation prefixes searched before the inherited `PATH`.
pub const PATH_PREFIX: &str = "/opt:/opt/homebrew/bin:/opt/homebrew/sbin:/usr/bin:/usr/local/bin";
const FALLBACK_PATH: &str = "/bin:/usr/sbin:/sbin";

pub const TERM_NAME: &str = "xterm-color";
pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 34;

/// `PATH` for the interactive shell.
pub fn sanitized_path(inherited: Option<&str>) -> String {
    match inherited.filter(|p| !p.is_empty()) {
        Some(path) => format!("{PATH_PREFIX}:{path}"),
        None => format!("{PATH_PREFIX}:{FALLBACK_PATH}"),
    }
}

/// What to run under the pseudo-terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellSpec {
    pub program: String,
    pub args: Vec<String>,
    pub term: String,
    pub cols: u16,
    pub rows: u16,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl ShellSpec {
    /// The user's `$SHELL` (or `/bin/sh`) in the current directory.
    pub fn login_shell() -> Self {
        let program = std::env::var("SHELL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "/bin/sh".to_string());
        let path = sanitized_path(std::env::var("PATH").ok().as_deref());
        Self {
            program,
            args: Vec::new(),
            term: TERM_NAME.to_string(),
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            cwd: std::env::current_dir().ok(),
            env: vec![("PATH".to_string(), path)],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyEvent {
    Output(Vec<u8>),
    /// The shell exited, with its code when known.
    Exited(Option<u32>),
}

/// An event tagged with the session generation that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub generation: u64,
    pub event: PtyEvent,
}

/// Where a pty backend delivers its events.
#[derive(Debug, Clone)]
pub struct PtyEventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl PtyEventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { generation, tx }
    }

    /// Returns false once nobody listens anymore.
    pub fn send(&self, event: PtyEvent) -> bool {
        self.tx
            .send(SessionEvent {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// A running pty child.
pub trait PtyProcess: Send {
    fn pid(&self) -> Option<u32>;
    fn write(&mut self, data: &[u8]) -> Result<()>;
    fn resize(&mut self, cols: u16, rows: u16) -> Result<()>;
    fn kill(&mut self) -> Result<()>;
}

pub trait PtyBackend: Send + Sync + Debug {
    fn spawn(&self, spec: &ShellSpec, sink: PtyEventSink) -> Result<Box<dyn PtyProcess>>;
}

/// `portable-pty` on the host system.
#[derive(Debug, Clone, Default)]
pub struct NativePtyBackend;

fn pty_error(context: &str, err: impl std::fmt::Display) -> StackdError {
    StackdError::Spawn(format!("{context}: {err}"))
}

impl PtyBackend for NativePtyBackend {
    fn spawn(&self, spec: &ShellSpec, sink: PtyEventSink) -> Result<Box<dyn PtyProcess>> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: spec.rows,
                cols: spec.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| pty_error("opening pty", e))?;

        let mut cmd = CommandBuilder::new(&spec.program);
        cmd.args(&spec.args);
        cmd.env("TERM", &spec.term);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &spec.cwd {
            cmd.cwd(cwd);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| pty_error("spawning shell", e))?;
        // The child holds its own copy of the slave side.
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| pty_error("cloning pty reader", e))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| pty_error("taking pty writer", e))?;

        thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if !sink.send(PtyEvent::Output(buf[..n].to_vec())) {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(pid, error = %e, "pty read ended");
                        break;
                    }
                }
            }

            let code = match child.wait() {
                Ok(status) => Some(status.exit_code()),
                Err(e) => {
                    error!(pid, error = %e, "failed to wait for shell");
                    None
                }
            };
            sink.send(PtyEvent::Exited(code));
        });

        Ok(Box::new(NativePty {
            master: pair.master,
            writer,
            killer,
            pid,
        }))
    }
}

struct NativePty {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
}

impl PtyProcess for NativePty {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    fn resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| pty_error("resizing pty", e))
    }

    fn kill(&mut self) -> Result<()> {
        self.killer.kill()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_prefix_comes_first() {
        assert_eq!(
            sanitized_path(Some("/usr/bin:/bin")),
            format!("{PATH_PREFIX}:/usr/bin:/bin")
        );
        assert!(sanitized_path(None).ends_with(":/bin:/usr/sbin:/sbin"));
    }
}
