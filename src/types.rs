use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Locally managed service families.
///
/// The lowercase names double as the `serviceType` strings used by the UI and
/// by worker commands (`app-fork:<name>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Nginx,
    Apache,
    Php,
    Mysql,
    Mariadb,
    Mongodb,
    Memcached,
    Redis,
}

impl ServiceType {
    /// Every service, in the order `stop_all` walks them.
    pub const ALL: [ServiceType; 8] = [
        ServiceType::Nginx,
        ServiceType::Php,
        ServiceType::Mysql,
        ServiceType::Mariadb,
        ServiceType::Apache,
        ServiceType::Memcached,
        ServiceType::Redis,
        ServiceType::Mongodb,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Nginx => "nginx",
            ServiceType::Apache => "apache",
            ServiceType::Php => "php",
            ServiceType::Mysql => "mysql",
            ServiceType::Mariadb => "mariadb",
            ServiceType::Mongodb => "mongodb",
            ServiceType::Memcached => "memcached",
            ServiceType::Redis => "redis",
        }
    }

    /// Whether a missing pid file means "nothing to stop".
    ///
    /// php-fpm is the one exception: its master may be running without the
    /// pid file we expect, so it is always scanned for.
    pub fn requires_pid_file(&self) -> bool {
        !matches!(self, ServiceType::Php)
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "nginx" => Ok(ServiceType::Nginx),
            "apache" => Ok(ServiceType::Apache),
            "php" => Ok(ServiceType::Php),
            "mysql" => Ok(ServiceType::Mysql),
            "mariadb" => Ok(ServiceType::Mariadb),
            "mongodb" => Ok(ServiceType::Mongodb),
            "memcached" => Ok(ServiceType::Memcached),
            "redis" => Ok(ServiceType::Redis),
            other => Err(format!("unknown service type: {other}")),
        }
    }
}

/// Prefix of every command that is delegated to a worker process.
pub const FORK_COMMAND_PREFIX: &str = "app-fork:";

/// Worker process families. One OS process is spawned per command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerCategory {
    Node,
    Brew,
    Nginx,
    Apache,
    Php,
    Mysql,
    Mariadb,
    Memcached,
    Redis,
    Host,
    Tools,
    Version,
    Mongodb,
    Project,
}

impl WorkerCategory {
    pub const ALL: [WorkerCategory; 14] = [
        WorkerCategory::Node,
        WorkerCategory::Brew,
        WorkerCategory::Nginx,
        WorkerCategory::Apache,
        WorkerCategory::Php,
        WorkerCategory::Mysql,
        WorkerCategory::Mariadb,
        WorkerCategory::Memcached,
        WorkerCategory::Redis,
        WorkerCategory::Host,
        WorkerCategory::Tools,
        WorkerCategory::Version,
        WorkerCategory::Mongodb,
        WorkerCategory::Project,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerCategory::Node => "node",
            WorkerCategory::Brew => "brew",
            WorkerCategory::Nginx => "nginx",
            WorkerCategory::Apache => "apache",
            WorkerCategory::Php => "php",
            WorkerCategory::Mysql => "mysql",
            WorkerCategory::Mariadb => "mariadb",
            WorkerCategory::Memcached => "memcached",
            WorkerCategory::Redis => "redis",
            WorkerCategory::Host => "host",
            WorkerCategory::Tools => "tools",
            WorkerCategory::Version => "version",
            WorkerCategory::Mongodb => "mongodb",
            WorkerCategory::Project => "project",
        }
    }

    /// Resolve a full command name such as `app-fork:php`.
    pub fn from_command(command: &str) -> Option<Self> {
        command
            .strip_prefix(FORK_COMMAND_PREFIX)
            .and_then(|name| name.parse().ok())
    }

    /// The command name the UI uses for this category.
    pub fn command(&self) -> String {
        format!("{FORK_COMMAND_PREFIX}{}", self.as_str())
    }
}

impl fmt::Display for WorkerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        WorkerCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| format!("unknown worker category: {wanted}"))
    }
}
