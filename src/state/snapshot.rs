// src/state/snapshot.rs

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::ServiceType;

/// Elevation credential.
///
/// Serialized as a plain string (workers need it), but never printed: both
/// `Debug` and `Display` render `***`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Password(String);

impl Password {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

impl fmt::Display for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// The configuration every worker starts from.
///
/// Key names on the wire follow the existing UI/worker contract
/// (`BaseDir`, `NginxDir`, ...). Keys this crate does not know are kept in
/// `extra` so a replacement round-trips unchanged; absent keys take their
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SharedState {
    pub base_dir: PathBuf,
    pub nginx_dir: PathBuf,
    pub php_dir: PathBuf,
    pub mysql_dir: PathBuf,
    #[serde(rename = "MariaDBDir")]
    pub mariadb_dir: PathBuf,
    pub apache_dir: PathBuf,
    pub memcached_dir: PathBuf,
    pub redis_dir: PathBuf,
    #[serde(rename = "MongoDBDir")]
    pub mongodb_dir: PathBuf,
    pub cache: PathBuf,
    #[serde(rename = "Static", default, skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<Password>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(rename = "isAppleSilicon", default)]
    pub is_apple_silicon: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brew_home: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brew_cellar: Option<String>,
    #[serde(rename = "MacPorts", default, skip_serializing_if = "Option::is_none")]
    pub macports: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SharedState {
    /// Standard layout: every service lives under `<run_dir>/server/<name>`.
    pub fn with_layout(run_dir: &Path) -> Self {
        let server = run_dir.join("server");
        Self {
            nginx_dir: server.join("nginx"),
            php_dir: server.join("php"),
            mysql_dir: server.join("mysql"),
            mariadb_dir: server.join("mariadb"),
            apache_dir: server.join("apache"),
            memcached_dir: server.join("memcached"),
            redis_dir: server.join("redis"),
            mongodb_dir: server.join("mongodb"),
            cache: server.join("cache"),
            base_dir: server,
            ..Self::default()
        }
    }

    /// Installation directory of a service.
    pub fn service_dir(&self, service: ServiceType) -> &Path {
        match service {
            ServiceType::Nginx => &self.nginx_dir,
            ServiceType::Apache => &self.apache_dir,
            ServiceType::Php => &self.php_dir,
            ServiceType::Mysql => &self.mysql_dir,
            ServiceType::Mariadb => &self.mariadb_dir,
            ServiceType::Mongodb => &self.mongodb_dir,
            ServiceType::Memcached => &self.memcached_dir,
            ServiceType::Redis => &self.redis_dir,
        }
    }

    /// Every directory of the layout, for `ensure_layout`.
    pub fn layout_dirs(&self) -> Vec<&Path> {
        let mut dirs = vec![self.base_dir.as_path(), self.cache.as_path()];
        dirs.extend(ServiceType::ALL.into_iter().map(|s| self.service_dir(s)));
        dirs
    }

    /// Create the layout directories that do not exist yet.
    pub fn ensure_layout(&self) -> std::io::Result<()> {
        for dir in self.layout_dirs() {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Copy of this snapshot with a different elevation password.
    pub fn with_password(&self, password: Option<Password>) -> Self {
        Self {
            password,
            ..self.clone()
        }
    }
}

/// Parse a proxy setting such as
/// `"export https_proxy=http://127.0.0.1:7890 http_proxy=http://127.0.0.1:7890"`.
///
/// Only `key=value` tokens are kept; anything else is ignored.
pub fn parse_proxy(spec: &str) -> BTreeMap<String, String> {
    spec.split(' ')
        .filter(|token| token.find('=').is_some_and(|i| i > 0))
        .filter_map(|token| {
            let mut parts = token.splitn(2, '=');
            let key = parts.next()?;
            let value = parts.next()?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}
