// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::state::Password;

/// Configuration as read from a TOML file.
///
/// ```toml
/// [paths]
/// run_dir = "/Users/me/Library/Stackd"
/// static_dir = "/Applications/Stackd.app/Contents/Resources/static"
///
/// [setup]
/// lang = "en"
/// password = "hunter2"
/// hosts_file = "/private/etc/hosts"
///
/// [setup.proxy]
/// on = true
/// proxy = "export https_proxy=http://127.0.0.1:7890 http_proxy=http://127.0.0.1:7890"
///
/// [worker]
/// timeout = "10m"
/// ```
///
/// Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub setup: SetupSection,
    #[serde(default)]
    pub worker: WorkerSection,
}

/// `[paths]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    /// Root of the managed layout; services live under `<run_dir>/server`.
    #[serde(default = "default_run_dir")]
    pub run_dir: PathBuf,
    /// Bundled static resources handed to workers.
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

fn default_run_dir() -> PathBuf {
    PathBuf::from(".stackd")
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            run_dir: default_run_dir(),
            static_dir: None,
        }
    }
}

/// `[setup]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SetupSection {
    #[serde(default)]
    pub lang: Option<String>,
    /// Elevation password. Never logged.
    #[serde(default)]
    pub password: Option<Password>,
    #[serde(default = "default_hosts_file")]
    pub hosts_file: PathBuf,
    #[serde(default)]
    pub proxy: ProxySection,
}

fn default_hosts_file() -> PathBuf {
    PathBuf::from(crate::engine::router::DEFAULT_HOSTS_FILE)
}

impl Default for SetupSection {
    fn default() -> Self {
        Self {
            lang: None,
            password: None,
            hosts_file: default_hosts_file(),
            proxy: ProxySection::default(),
        }
    }
}

/// `[setup.proxy]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxySection {
    #[serde(default)]
    pub on: bool,
    /// Space separated `key=value` pairs; other tokens are ignored.
    #[serde(default)]
    pub proxy: String,
}

/// `[worker]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkerSection {
    /// Per-request deadline such as `"30s"` or `"10m"`. None means no limit.
    #[serde(default)]
    pub timeout: Option<String>,
}

/// Validated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub run_dir: PathBuf,
    pub static_dir: Option<PathBuf>,
    pub lang: Option<String>,
    pub password: Option<Password>,
    pub hosts_file: PathBuf,
    pub proxy: Option<BTreeMap<String, String>>,
    pub worker_timeout: Option<Duration>,
}
