// src/service/mod.rs

//! Stopping locally managed daemons.
//!
//! - [`table`] is the fixed service -> daemon/signal/pid-file mapping.
//! - [`scan`] reads the process table and filters out processes that must
//!   never be signalled (ourselves, shell wrappers, bundled binaries).
//! - [`elevate`] runs the resulting `kill` with elevated privileges.
//! - [`manager`] combines the three. Every stop is best effort: failures are
//!   logged and reported as a [`StopOutcome`], never raised.

pub mod elevate;
pub mod manager;
pub mod scan;
pub mod table;

pub use elevate::{Elevator, SudoElevator};
pub use manager::{kill_command, strip_hosts_block, ServiceManager, StopOutcome};
pub use scan::{find_service_processes, ProcessTable, PsProcessTable, ScanFilter, ServiceProcess};
pub use table::{pid_file_path, spec_for, ServiceSpec, StopSignal, SERVICE_TABLE};
