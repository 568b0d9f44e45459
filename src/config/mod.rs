// src/config/mod.rs

//! Configuration loading and validation.
//!
//! - TOML-backed data model (`model.rs`).
//! - Loading from disk with env-var and default fallbacks (`loader.rs`).
//! - Validation into [`Config`] (`validate.rs`), which also builds the
//!   initial [`SharedState`].

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

use crate::state::SharedState;

pub use loader::{default_config_path, load_and_validate, load_config, load_from_path};
pub use model::{Config, PathsSection, ProxySection, RawConfig, SetupSection, WorkerSection};
pub use validate::validate_config;

impl Config {
    /// The snapshot the coordinator starts from.
    pub fn initial_state(&self) -> SharedState {
        SharedState {
            static_dir: self.static_dir.clone(),
            password: self.password.clone(),
            proxy: self.proxy.clone(),
            lang: self.lang.clone(),
            is_apple_silicon: cfg!(all(target_os = "macos", target_arch = "aarch64")),
            ..SharedState::with_layout(&self.run_dir)
        }
    }
}
