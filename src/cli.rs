// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::types::WorkerCategory;

/// Command-line arguments for `stackd`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "stackd",
    version,
    about = "Control local development services through short-lived worker processes.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `$STACKD_CONFIG`, else `Stackd.toml` in the current working
    /// directory, else built-in defaults.
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `STACKD_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Send one UI command and print every message for it as JSON lines
    /// until its terminal status.
    Send {
        /// Command name, e.g. `app-fork:tools` or `NodePty:write`.
        command: String,

        /// Correlation key. A random one is generated when omitted.
        #[arg(long)]
        key: Option<String>,

        /// Arguments. Each is parsed as JSON when possible, else taken as a
        /// string.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Serve a single request on stdin/stdout. Started by the coordinator.
    #[command(hide = true)]
    Worker { category: WorkerCategory },

    /// End the interactive session, stop every managed service and clean the
    /// hosts file.
    StopAll,

    /// Parse + validate the config and print the resulting snapshot.
    CheckConfig,
}

impl CliArgs {
    pub fn is_worker(&self) -> bool {
        matches!(self.command, Command::Worker { .. })
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_keeps_hyphenated_args() {
        let args = CliArgs::try_parse_from([
            "stackd", "send", "app-fork:tools", "--key", "k1", "cleanBom", "-x",
        ])
        .unwrap();
        match args.command {
            Command::Send { command, key, args } => {
                assert_eq!(command, "app-fork:tools");
                assert_eq!(key.as_deref(), Some("k1"));
                assert_eq!(args, vec!["cleanBom", "-x"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn worker_category_is_parsed() {
        let args = CliArgs::try_parse_from(["stackd", "worker", "tools"]).unwrap();
        assert!(args.is_worker());
        assert!(CliArgs::try_parse_from(["stackd", "worker", "nope"]).is_err());
    }
}
