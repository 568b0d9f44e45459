#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tokio::sync::mpsc;
use stackd::config::{Config, RawConfig};
use stackd::engine::UiMessage;
use stackd::protocol::Status;
use stackd::state::{Password, SharedState};

/// Builder for `Config` to simplify test setup.
pub struct ConfigBuilder {
    config: RawConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfig::default(),
        }
    }

    pub fn with_run_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.paths.run_dir = dir.into();
        self
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.config.setup.password = Some(Password::new(password));
        self
    }

    pub fn with_proxy(mut self, pairs: &str) -> Self {
        self.config.setup.proxy.on = true;
        self.config.setup.proxy.proxy = pairs.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: &str) -> Self {
        self.config.worker.timeout = Some(timeout.to_string());
        self
    }

    pub fn build(self) -> Config {
        Config::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `SharedState` snapshots.
pub struct StateBuilder {
    state: SharedState,
}

impl StateBuilder {
    pub fn new(run_dir: impl AsRef<Path>) -> Self {
        Self {
            state: SharedState::with_layout(run_dir.as_ref()),
        }
    }

    pub fn password(mut self, password: &str) -> Self {
        self.state.password = Some(Password::new(password));
        self
    }

    pub fn lang(mut self, lang: &str) -> Self {
        self.state.lang = Some(lang.to_string());
        self
    }

    pub fn proxy(mut self, pairs: &[(&str, &str)]) -> Self {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.state.proxy = Some(map);
        self
    }

    pub fn build(self) -> SharedState {
        self.state
    }
}

/// A `{command, key, info}` frame carrying `status`.
pub fn status_frame(command: &str, key: &str, status: &Status) -> Value {
    json!({ "command": command, "key": key, "info": status.to_info() })
}

pub fn progress_frame(command: &str, key: &str, msg: Value) -> Value {
    status_frame(command, key, &Status::Progress(msg))
}

pub fn success_frame(command: &str, key: &str, data: Value) -> Value {
    status_frame(command, key, &Status::Success(data))
}

pub fn failure_frame(command: &str, key: &str, reason: &str) -> Value {
    status_frame(command, key, &Status::Failure(reason.to_string()))
}

/// Drain everything currently queued on a UI receiver.
pub fn drain_ui(rx: &mut mpsc::UnboundedReceiver<UiMessage>) -> Vec<UiMessage> {
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        out.push(message);
    }
    out
}

/// Receive UI messages until the terminal one for `key` arrives.
pub async fn collect_until_terminal(
    rx: &mut mpsc::UnboundedReceiver<UiMessage>,
    key: &str,
) -> Vec<UiMessage> {
    let mut out = Vec::new();
    while let Some(message) = rx.recv().await {
        let done = message.key == key && message.is_terminal();
        out.push(message);
        if done {
            break;
        }
    }
    out
}
