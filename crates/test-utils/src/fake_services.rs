use std::sync::{Arc, Mutex};

use stackd::errors::{Result, StackdError};
use stackd::service::{Elevator, ProcessTable, ScanFilter};
use stackd::state::Password;

/// One elevated command as the elevator saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElevatedCommand {
    pub password: Option<String>,
    pub command: String,
}

#[derive(Debug, Default)]
struct ElevatorState {
    runs: Vec<ElevatedCommand>,
    accepted_password: Option<String>,
    fail_runs: bool,
}

/// Records elevated commands instead of running them.
#[derive(Debug, Clone, Default)]
pub struct RecordingElevator {
    state: Arc<Mutex<ElevatorState>>,
}

impl RecordingElevator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only `password` passes `verify`.
    pub fn accepting(password: &str) -> Self {
        let elevator = Self::default();
        elevator.state.lock().unwrap().accepted_password = Some(password.to_string());
        elevator
    }

    pub fn fail_runs(&self) {
        self.state.lock().unwrap().fail_runs = true;
    }

    pub fn runs(&self) -> Vec<ElevatedCommand> {
        self.state.lock().unwrap().runs.clone()
    }
}

impl Elevator for RecordingElevator {
    fn run(&self, password: Option<&Password>, command: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.runs.push(ElevatedCommand {
            password: password.map(|p| p.expose().to_string()),
            command: command.to_string(),
        });
        if state.fail_runs {
            return Err(StackdError::Elevation("refused by test elevator".to_string()));
        }
        Ok(())
    }

    fn verify(&self, password: &Password) -> Result<()> {
        let state = self.state.lock().unwrap();
        match &state.accepted_password {
            Some(accepted) if accepted == password.expose() => Ok(()),
            _ => Err(StackdError::Elevation("incorrect password".to_string())),
        }
    }
}

/// A process table with a fixed listing.
#[derive(Debug, Clone)]
pub struct ScriptedProcessTable {
    listing: std::result::Result<String, String>,
}

impl ScriptedProcessTable {
    /// `lines` as `(pid, command line)`.
    pub fn with(lines: &[(u32, &str)]) -> Self {
        let listing = lines
            .iter()
            .map(|(pid, cmd)| format!("{pid:>6} {cmd}"))
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            listing: Ok(listing),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            listing: Err(reason.to_string()),
        }
    }
}

impl ProcessTable for ScriptedProcessTable {
    fn list(&self) -> Result<String> {
        self.listing
            .clone()
            .map_err(|reason| StackdError::Other(anyhow::anyhow!(reason)))
    }
}

/// A filter that only excludes pid 1 and bundle markers.
pub fn test_filter() -> ScanFilter {
    ScanFilter {
        self_pid: 1,
        bundle_markers: vec!["/Contents/MacOS/".to_string()],
        own_exe: None,
    }
}
