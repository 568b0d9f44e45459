// src/service/elevate.rs

//! Privileged command execution.

use std::fmt::Debug;
use std::io::Write;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::errors::{Result, StackdError};
use crate::state::Password;

/// Runs shell commands with elevated privileges.
pub trait Elevator: Send + Sync + Debug {
    /// Run `command` through `sh -c` as root.
    fn run(&self, password: Option<&Password>, command: &str) -> Result<()>;

    /// Check that `password` unlocks elevation.
    fn verify(&self, password: &Password) -> Result<()>;
}

/// `sudo`, with the password fed on stdin (`-S`), never on the command line.
///
/// Without a password `sudo -n` is used, which only succeeds when the
/// credentials are cached or not required.
#[derive(Debug, Clone, Default)]
pub struct SudoElevator;

impl SudoElevator {
    fn sudo(args: &[&str], password: Option<&Password>) -> Result<()> {
        let mut cmd = Command::new("sudo");
        match password {
            Some(_) => cmd.args(["-S", "-p", ""]),
            None => cmd.arg("-n"),
        };
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| StackdError::Elevation(format!("spawning sudo: {e}")))?;

        if let (Some(mut stdin), Some(password)) = (child.stdin.take(), password) {
            // sudo may not read stdin at all when credentials are cached.
            if let Err(err) = writeln!(stdin, "{}", password.expose()) {
                debug!(error = %err, "sudo did not read the password");
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| StackdError::Elevation(format!("waiting for sudo: {e}")))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(StackdError::Elevation(format!(
                "sudo exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

impl Elevator for SudoElevator {
    fn run(&self, password: Option<&Password>, command: &str) -> Result<()> {
        let password = password.filter(|p| !p.is_empty());
        Self::sudo(&["sh", "-c", command], password)
    }

    fn verify(&self, password: &Password) -> Result<()> {
        // -k drops cached credentials so the password is really checked.
        Self::sudo(&["-k", "-l"], Some(password))
    }
}
