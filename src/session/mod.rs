// src/session/mod.rs

//! Interactive shell session bridged to the UI.
//!
//! [`pty`] abstracts the pseudo-terminal (production: `portable-pty`);
//! [`manager`] enforces the single-session rule, keeps the rolling output
//! buffer and reports completion of the pending request when the shell ends.

pub mod manager;
pub mod pty;

pub use manager::{
    SessionHandle, SessionManager, CLEAR_COMMAND, OUTPUT_EVENT, RESIZE_COMMAND, STOP_COMMAND,
    WRITE_COMMAND,
};
pub use pty::{
    NativePtyBackend, PtyBackend, PtyEvent, PtyEventSink, PtyProcess, SessionEvent, ShellSpec,
};
