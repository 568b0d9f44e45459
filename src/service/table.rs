// src/service/table.rs

//! Fixed per-service facts: daemon executable, stop signal, pid file.

use std::path::PathBuf;

use crate::state::SharedState;
use crate::types::ServiceType;

/// Signal used to stop a daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// `SIGINT`, fast shutdown for stateless daemons.
    Interrupt,
    /// `SIGTERM`, graceful shutdown for the database family.
    Terminate,
}

impl StopSignal {
    /// The flag handed to `kill`.
    pub fn flag(&self) -> &'static str {
        match self {
            StopSignal::Interrupt => "-INT",
            StopSignal::Terminate => "-TERM",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSpec {
    pub service: ServiceType,
    /// Executable name searched for in the process table.
    pub daemon: &'static str,
    pub signal: StopSignal,
    /// Pid file, relative to the service's directory.
    pub pid_file: &'static str,
}

pub const SERVICE_TABLE: [ServiceSpec; 8] = [
    ServiceSpec {
        service: ServiceType::Nginx,
        daemon: "nginx",
        signal: StopSignal::Interrupt,
        pid_file: "common/logs/nginx.pid",
    },
    ServiceSpec {
        service: ServiceType::Php,
        daemon: "php-fpm",
        signal: StopSignal::Interrupt,
        pid_file: "common/var/run/php-fpm.pid",
    },
    ServiceSpec {
        service: ServiceType::Mysql,
        daemon: "mysqld",
        signal: StopSignal::Terminate,
        pid_file: "mysql.pid",
    },
    ServiceSpec {
        service: ServiceType::Mariadb,
        daemon: "mariadbd",
        signal: StopSignal::Terminate,
        pid_file: "mariadb.pid",
    },
    ServiceSpec {
        service: ServiceType::Apache,
        daemon: "httpd",
        signal: StopSignal::Interrupt,
        pid_file: "common/logs/httpd.pid",
    },
    ServiceSpec {
        service: ServiceType::Memcached,
        daemon: "memcached",
        signal: StopSignal::Interrupt,
        pid_file: "logs/memcached.pid",
    },
    ServiceSpec {
        service: ServiceType::Redis,
        daemon: "redis-server",
        signal: StopSignal::Interrupt,
        pid_file: "common/run/redis.pid",
    },
    ServiceSpec {
        service: ServiceType::Mongodb,
        daemon: "mongod",
        signal: StopSignal::Terminate,
        pid_file: "mongodb.pid",
    },
];

pub fn spec_for(service: ServiceType) -> &'static ServiceSpec {
    SERVICE_TABLE
        .iter()
        .find(|spec| spec.service == service)
        .unwrap_or_else(|| unreachable!("every ServiceType has a table entry"))
}

/// Absolute pid-file path of `service` under the snapshot's layout.
pub fn pid_file_path(state: &SharedState, service: ServiceType) -> PathBuf {
    state.service_dir(service).join(spec_for(service).pid_file)
}
