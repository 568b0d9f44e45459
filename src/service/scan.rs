// src/service/scan.rs

//! Process-table queries for running service daemons.

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::errors::{Result, StackdError};

/// A live process whose command line matched a daemon name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceProcess {
    pub pid: u32,
    pub command_line: String,
}

/// Source of the live process table as `"<pid> <command line>"` lines.
pub trait ProcessTable: Send + Sync + Debug {
    fn list(&self) -> Result<String>;
}

/// `ps -axo pid=,args=`.
#[derive(Debug, Clone, Default)]
pub struct PsProcessTable;

impl ProcessTable for PsProcessTable {
    fn list(&self) -> Result<String> {
        let output = Command::new("ps").args(["-axo", "pid=,args="]).output()?;
        if !output.status.success() {
            return Err(StackdError::Other(anyhow::anyhow!(
                "ps exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Which matches must never be signalled.
#[derive(Debug, Clone)]
pub struct ScanFilter {
    /// Our own pid (the query process).
    pub self_pid: u32,
    /// Substrings marking binaries bundled with the application.
    pub bundle_markers: Vec<String>,
    /// Our own executable.
    pub own_exe: Option<PathBuf>,
}

impl ScanFilter {
    pub fn for_current_process() -> Self {
        Self {
            self_pid: std::process::id(),
            bundle_markers: vec!["/Contents/MacOS/".to_string()],
            own_exe: std::env::current_exe().ok(),
        }
    }

    fn excludes(&self, pid: u32, command_line: &str) -> bool {
        if pid == self.self_pid {
            return true;
        }
        let mut tokens = command_line.split_whitespace();
        let program = tokens.next().unwrap_or_default();
        let program_name = Path::new(program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(program);

        if program_name == "grep" {
            return true;
        }
        if matches!(program_name, "sh" | "bash" | "zsh") && tokens.next() == Some("-c") {
            return true;
        }
        if self
            .bundle_markers
            .iter()
            .any(|marker| command_line.contains(marker.as_str()))
        {
            return true;
        }
        self.own_exe
            .as_deref()
            .is_some_and(|exe| Path::new(program) == exe)
    }
}

/// Processes in `listing` whose command line mentions `daemon`, minus the
/// ones `filter` protects.
pub fn find_service_processes(
    listing: &str,
    daemon: &str,
    filter: &ScanFilter,
) -> Vec<ServiceProcess> {
    listing
        .lines()
        .filter_map(|line| {
            let (pid, command_line) = line.trim_start().split_once(char::is_whitespace)?;
            let pid = pid.parse::<u32>().ok()?;
            Some((pid, command_line.trim()))
        })
        .filter(|(_, command_line)| command_line.contains(daemon))
        .filter(|(pid, command_line)| !filter.excludes(*pid, command_line))
        .map(|(pid, command_line)| ServiceProcess {
            pid,
            command_line: command_line.to_string(),
        })
        .collect()
}
