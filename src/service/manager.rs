// src/service/manager.rs

use std::path::Path;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::fs::{FileSystem, RealFileSystem};
use crate::state::{Password, SharedState};
use crate::types::ServiceType;

use super::elevate::{Elevator, SudoElevator};
use super::scan::{find_service_processes, ProcessTable, PsProcessTable, ScanFilter};
use super::table::{pid_file_path, spec_for, StopSignal};

static HOSTS_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)#X-HOSTS-BEGIN#.*?#X-HOSTS-END#")
        .unwrap_or_else(|e| unreachable!("hosts block pattern is valid: {e}"))
});

/// What a stop attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// No pid file and the service requires one: nothing was queried.
    NoPidFile,
    /// The process table had no matching daemon.
    NoProcesses,
    /// The kill command ran.
    Signalled { command: String, pids: Vec<u32> },
    /// Querying or signalling failed. Logged, never raised.
    Failed {
        command: Option<String>,
        reason: String,
    },
}

/// `kill -TERM 12 13` and the like.
pub fn kill_command(signal: StopSignal, pids: &[u32]) -> String {
    let pids: Vec<String> = pids.iter().map(u32::to_string).collect();
    format!("kill {} {}", signal.flag(), pids.join(" "))
}

/// `content` without its first `#X-HOSTS-BEGIN#...#X-HOSTS-END#` block, or
/// `None` when there is no such block.
pub fn strip_hosts_block(content: &str) -> Option<String> {
    if !HOSTS_BLOCK.is_match(content) {
        return None;
    }
    Some(HOSTS_BLOCK.replace(content, "").into_owned())
}

/// Best-effort stopping of locally managed daemons.
#[derive(Debug, Clone)]
pub struct ServiceManager {
    fs: Arc<dyn FileSystem>,
    processes: Arc<dyn ProcessTable>,
    elevator: Arc<dyn Elevator>,
    filter: ScanFilter,
}

impl ServiceManager {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        processes: Arc<dyn ProcessTable>,
        elevator: Arc<dyn Elevator>,
        filter: ScanFilter,
    ) -> Self {
        Self {
            fs,
            processes,
            elevator,
            filter,
        }
    }

    /// Real filesystem, `ps`, `sudo`.
    pub fn system() -> Self {
        Self::new(
            Arc::new(RealFileSystem),
            Arc::new(PsProcessTable),
            Arc::new(SudoElevator),
            ScanFilter::for_current_process(),
        )
    }

    /// Stop whatever instance of `service` is running.
    ///
    /// The pid file only gates the attempt; the pids that get signalled come
    /// from the live process table.
    pub fn stop_service_by_pid_file(
        &self,
        pid_file: &Path,
        service: ServiceType,
        password: Option<&Password>,
    ) -> StopOutcome {
        if service.requires_pid_file() && !self.fs.exists(pid_file) {
            debug!(%service, pid_file = %pid_file.display(), "no pid file; nothing to stop");
            return StopOutcome::NoPidFile;
        }

        let spec = spec_for(service);
        let listing = match self.processes.list() {
            Ok(listing) => listing,
            Err(err) => {
                warn!(%service, error = %err, "process table query failed");
                return StopOutcome::Failed {
                    command: None,
                    reason: err.to_string(),
                };
            }
        };

        let pids: Vec<u32> = find_service_processes(&listing, spec.daemon, &self.filter)
            .into_iter()
            .map(|p| p.pid)
            .collect();
        if pids.is_empty() {
            debug!(%service, daemon = spec.daemon, "no running daemon found");
            return StopOutcome::NoProcesses;
        }

        let command = kill_command(spec.signal, &pids);
        match self.elevator.run(password, &command) {
            Ok(()) => {
                info!(%service, ?pids, signal = spec.signal.flag(), "service signalled");
                StopOutcome::Signalled { command, pids }
            }
            Err(err) => {
                warn!(%service, ?pids, error = %err, "failed to signal service");
                StopOutcome::Failed {
                    command: Some(command),
                    reason: err.to_string(),
                }
            }
        }
    }

    /// Stop every service of the snapshot's layout, then drop the hosts
    /// block this application added.
    pub fn stop_all(
        &self,
        state: &SharedState,
        hosts_file: &Path,
    ) -> Vec<(ServiceType, StopOutcome)> {
        let password = state.password.as_ref();
        let outcomes = ServiceType::ALL
            .into_iter()
            .map(|service| {
                let pid_file = pid_file_path(state, service);
                (
                    service,
                    self.stop_service_by_pid_file(&pid_file, service, password),
                )
            })
            .collect();

        if let Err(err) = self.clean_hosts_file(hosts_file) {
            warn!(hosts_file = %hosts_file.display(), error = %err, "failed to clean hosts file");
        }
        outcomes
    }

    /// Remove the managed block from `hosts_file`. Returns whether the file
    /// was rewritten.
    pub fn clean_hosts_file(&self, hosts_file: &Path) -> Result<bool> {
        if !self.fs.exists(hosts_file) {
            return Ok(false);
        }
        let content = self.fs.read_to_string(hosts_file)?;
        match strip_hosts_block(&content) {
            Some(cleaned) => {
                self.fs.write(hosts_file, cleaned.as_bytes())?;
                info!(hosts_file = %hosts_file.display(), "removed managed hosts block");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn verify_password(&self, password: &Password) -> Result<()> {
        self.elevator.verify(password)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_command_joins_pids_after_the_flag() {
        assert_eq!(
            kill_command(StopSignal::Terminate, &[12, 13]),
            "kill -TERM 12 13"
        );
        assert_eq!(kill_command(StopSignal::Interrupt, &[7]), "kill -INT 7");
    }

    #[test]
    fn hosts_block_is_removed_across_lines() {
        let hosts = "127.0.0.1 localhost\n#X-HOSTS-BEGIN#\n127.0.0.1 a.test\n#X-HOSTS-END#\n::1 localhost\n";
        assert_eq!(
            strip_hosts_block(hosts).unwrap(),
            "127.0.0.1 localhost\n\n::1 localhost\n"
        );
        assert_eq!(strip_hosts_block("127.0.0.1 localhost\n"), None);
    }
}
