// src/state/mod.rs

//! Process-wide configuration snapshot.
//!
//! [`SharedState`] is what the coordinator ships to every worker as its first
//! message. It is an immutable value: the coordinator keeps exactly one
//! authoritative copy in a [`SnapshotStore`] and replaces it wholesale when a
//! worker asks for it, never merging fields.

pub mod snapshot;
pub mod store;

pub use snapshot::{parse_proxy, Password, SharedState};
pub use store::SnapshotStore;
