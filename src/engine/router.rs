// src/engine/router.rs

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::dns::DnsServer;
use crate::errors::{Result, StackdError};
use crate::protocol::{Envelope, Status};
use crate::serve::StaticServers;
use crate::service::{ServiceManager, StopOutcome};
use crate::session::{
    SessionHandle, CLEAR_COMMAND, RESIZE_COMMAND, STOP_COMMAND, WRITE_COMMAND,
};
use crate::state::Password;
use crate::types::{ServiceType, FORK_COMMAND_PREFIX};

use super::{send_ui, Coordinator, RequestOptions, UiMessage};

pub const PASSWORD_CHECK_COMMAND: &str = "app:password-check";
pub const DNS_START_COMMAND: &str = "DNS:start";
pub const DNS_STOP_COMMAND: &str = "DNS:stop";
pub const HTTP_SERVE_RUN_COMMAND: &str = "app-http-serve-run";
pub const HTTP_SERVE_STOP_COMMAND: &str = "app-http-serve-stop";

pub const DEFAULT_HOSTS_FILE: &str = "/private/etc/hosts";

/// Single entry point for UI commands.
#[derive(Debug, Clone)]
pub struct CommandRouter {
    coordinator: Coordinator,
    session: SessionHandle,
    services: ServiceManager,
    dns: Option<Arc<dyn DnsServer>>,
    dns_started: Arc<AtomicBool>,
    http: StaticServers,
    hosts_file: PathBuf,
}

impl CommandRouter {
    pub fn new(coordinator: Coordinator, session: SessionHandle, services: ServiceManager) -> Self {
        Self {
            coordinator,
            session,
            services,
            dns: None,
            dns_started: Arc::new(AtomicBool::new(false)),
            http: StaticServers::new(),
            hosts_file: PathBuf::from(DEFAULT_HOSTS_FILE),
        }
    }

    pub fn with_dns(mut self, dns: Arc<dyn DnsServer>) -> Self {
        self.dns = Some(dns);
        self
    }

    pub fn with_hosts_file(mut self, hosts_file: impl Into<PathBuf>) -> Self {
        self.hosts_file = hosts_file.into();
        self
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn static_servers(&self) -> &StaticServers {
        &self.http
    }

    pub fn dns_started(&self) -> bool {
        self.dns_started.load(Ordering::SeqCst)
    }

    /// Route one UI command. Replies reach the UI through the coordinator's
    /// sink, keyed by `key`.
    ///
    /// Returns `UnknownCommand` for names nobody handles; every other failure
    /// is reported to the UI as a failure status for `key`.
    pub async fn handle_command(&self, command: &str, key: &str, args: Vec<Value>) -> Result<()> {
        debug!(command, key, args = args.len(), "handling command");

        if command.starts_with(FORK_COMMAND_PREFIX) {
            // The UI follows the request through forwarded messages.
            drop(
                self.coordinator
                    .dispatch(Envelope::new(command, key, args), RequestOptions::default()),
            );
            return Ok(());
        }

        let outcome = match command {
            PASSWORD_CHECK_COMMAND => self.check_password(&args).await,
            WRITE_COMMAND => match string_arg(&args, 0) {
                Some(text) => self
                    .session
                    .write(command, key, text)
                    .await
                    .map(|()| None),
                None => Err(missing_argument(command, "text")),
            },
            CLEAR_COMMAND => self.session.clear().await.map(|()| None),
            RESIZE_COMMAND => match geometry_arg(&args) {
                Some((cols, rows)) => self.session.resize(cols, rows).await.map(|()| None),
                None => Err(missing_argument(command, "{cols, rows}")),
            },
            STOP_COMMAND => {
                self.session.stop().await;
                Ok(None)
            }
            DNS_START_COMMAND => self.start_dns().await,
            DNS_STOP_COMMAND => self.stop_dns().await,
            HTTP_SERVE_RUN_COMMAND => match string_arg(&args, 0) {
                Some(path) => self.http.run(Path::new(path)).await.and_then(|served| {
                    Ok(Some(Status::Success(serde_json::to_value(served)?)))
                }),
                None => Err(missing_argument(command, "a directory")),
            },
            HTTP_SERVE_STOP_COMMAND => match string_arg(&args, 0) {
                Some(path) => {
                    self.http.stop(Path::new(path));
                    Ok(Some(Status::Success(json!({ "path": path }))))
                }
                None => Err(missing_argument(command, "a directory")),
            },
            _ => {
                warn!(command, key, "unknown command ignored");
                return Err(StackdError::UnknownCommand(command.to_string()));
            }
        };

        match outcome {
            Ok(Some(status)) => self.reply(command, key, status),
            Ok(None) => {}
            Err(err) => {
                warn!(command, key, error = %err, "command failed");
                self.reply(command, key, Status::Failure(err.to_string()));
            }
        }
        Ok(())
    }

    /// Close DNS, end the interactive session and static servers, then stop
    /// every managed service.
    pub async fn shutdown(&self) -> Vec<(ServiceType, StopOutcome)> {
        if let Some(dns) = &self.dns {
            if let Err(err) = dns.close().await {
                warn!(error = %err, "closing dns server failed");
            }
            self.dns_started.store(false, Ordering::SeqCst);
        }
        self.session.stop().await;
        self.http.stop_all();
        let services = self.services.clone();
        let state = self.coordinator.store().current();
        let hosts_file = self.hosts_file.clone();
        match tokio::task::spawn_blocking(move || services.stop_all(&state, &hosts_file)).await {
            Ok(outcomes) => outcomes,
            Err(err) => {
                warn!(error = %err, "stop-all task failed");
                Vec::new()
            }
        }
    }

    fn reply(&self, command: &str, key: &str, status: Status) {
        send_ui(self.coordinator.ui(), UiMessage::status(command, key, status));
    }

    /// Verify the credential and, when it works, store it in a replacement
    /// snapshot. The UI only learns whether it worked.
    async fn check_password(&self, args: &[Value]) -> Result<Option<Status>> {
        let Some(secret) = string_arg(args, 0) else {
            return Err(missing_argument(PASSWORD_CHECK_COMMAND, "password"));
        };
        let password = Password::new(secret);
        let services = self.services.clone();
        let candidate = password.clone();
        let verified = tokio::task::spawn_blocking(move || services.verify_password(&candidate))
            .await
            .map_err(|e| StackdError::Other(e.into()))?;

        match verified {
            Ok(()) => {
                let store = self.coordinator.store();
                let next = store.current().with_password(Some(password));
                store.replace(next);
                info!("elevation password verified and stored");
                Ok(Some(Status::Success(Value::Bool(true))))
            }
            Err(err) => {
                info!(error = %err, "elevation password rejected");
                Ok(Some(Status::Success(Value::Bool(false))))
            }
        }
    }

    async fn start_dns(&self) -> Result<Option<Status>> {
        let Some(dns) = &self.dns else {
            return Err(StackdError::ConfigError("no DNS server configured".to_string()));
        };
        let previously_started = self.dns_started.load(Ordering::SeqCst);
        match dns.start(previously_started).await {
            Ok(()) => {
                self.dns_started.store(true, Ordering::SeqCst);
                info!("dns server started");
                Ok(Some(Status::Success(Value::Bool(true))))
            }
            Err(err) => {
                self.dns_started.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    async fn stop_dns(&self) -> Result<Option<Status>> {
        let Some(dns) = &self.dns else {
            return Err(StackdError::ConfigError("no DNS server configured".to_string()));
        };
        dns.close().await?;
        self.dns_started.store(false, Ordering::SeqCst);
        info!("dns server closed");
        Ok(Some(Status::Success(Value::Bool(true))))
    }
}

fn string_arg(args: &[Value], index: usize) -> Option<&str> {
    args.get(index).and_then(Value::as_str)
}

fn geometry_arg(args: &[Value]) -> Option<(u16, u16)> {
    let geometry = args.first()?;
    let cols = u16::try_from(geometry.get("cols")?.as_u64()?).ok()?;
    let rows = u16::try_from(geometry.get("rows")?.as_u64()?).ok()?;
    Some((cols, rows))
}

fn missing_argument(command: &str, what: &str) -> StackdError {
    StackdError::Protocol(format!("'{command}' expects {what} as its first argument"))
}
