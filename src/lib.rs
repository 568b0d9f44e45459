// src/lib.rs

pub mod cli;
pub mod config;
pub mod deferred;
pub mod dns;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod protocol;
pub mod queue;
pub mod serve;
pub mod service;
pub mod session;
pub mod state;
pub mod types;
pub mod worker;

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cli::{CliArgs, Command};
use crate::config::{load_config, Config};
use crate::engine::router::HTTP_SERVE_RUN_COMMAND;
use crate::engine::{CommandRouter, Coordinator, UiMessage, UiPayload};
use crate::exec::RealWorkerBackend;
use crate::fs::RealFileSystem;
use crate::protocol::Status;
use crate::service::{ServiceManager, StopOutcome};
use crate::session::{
    NativePtyBackend, SessionHandle, SessionManager, ShellSpec, CLEAR_COMMAND, RESIZE_COMMAND,
    STOP_COMMAND,
};
use crate::state::SnapshotStore;
use crate::types::WorkerCategory;

/// High-level entry point used by `main.rs`.
///
/// - `worker`: serve one request on stdin/stdout.
/// - `send`: wire up the coordinator, session and services, route one
///   command and print its UI messages as JSON lines.
/// - `stop-all`: the shutdown path (session, services, hosts file).
/// - `check-config`: print the validated config.
pub async fn run(args: CliArgs) -> Result<()> {
    match args.command {
        Command::Worker { category } => run_stdio_worker(category).await,
        Command::CheckConfig => {
            let cfg = load_config(args.config.as_deref())?;
            print_config(&cfg);
            Ok(())
        }
        Command::StopAll => {
            let cfg = load_config(args.config.as_deref())?;
            let (router, _ui) = build_router(&cfg)?;
            let outcomes = router.shutdown().await;
            for (service, outcome) in outcomes {
                println!("{service}: {}", describe_outcome(&outcome));
            }
            Ok(())
        }
        Command::Send { command, key, args: raw } => {
            let cfg = load_config(args.config.as_deref())?;
            send(&cfg, &command, key, &raw).await
        }
    }
}

async fn run_stdio_worker(category: WorkerCategory) -> Result<()> {
    let handler = worker::handler_for(category, Arc::new(RealFileSystem));
    worker::run_worker(category, handler, tokio::io::stdin(), tokio::io::stdout()).await?;
    debug!(%category, "worker exiting");
    Ok(())
}

/// Production wiring: workers re-execute this binary, the session runs a
/// real login shell and services are stopped through `ps` and `sudo`.
pub fn build_router(cfg: &Config) -> Result<(CommandRouter, mpsc::UnboundedReceiver<UiMessage>)> {
    let state = cfg.initial_state();
    if let Err(err) = state.ensure_layout() {
        warn!(run_dir = ?cfg.run_dir, error = %err, "could not create run directory layout");
    }

    let (ui_tx, ui_rx) = mpsc::unbounded_channel();
    let coordinator = Coordinator::new(
        Arc::new(RealWorkerBackend::current_exe()?),
        SnapshotStore::new(state),
        ui_tx.clone(),
    )
    .with_default_deadline(cfg.worker_timeout);

    let (manager, events) =
        SessionManager::new(Arc::new(NativePtyBackend), ShellSpec::login_shell(), ui_tx);
    let session = SessionHandle::spawn(manager, events);

    let router = CommandRouter::new(coordinator, session, ServiceManager::system())
        .with_hosts_file(&cfg.hosts_file);
    Ok((router, ui_rx))
}

async fn send(cfg: &Config, command: &str, key: Option<String>, raw: &[String]) -> Result<()> {
    let key = key.unwrap_or_else(|| Uuid::new_v4().to_string());
    let args: Vec<Value> = raw.iter().map(|a| parse_arg(a)).collect();
    let (router, mut ui) = build_router(cfg)?;

    info!(command, key = %key, "sending command");
    router.handle_command(command, &key, args).await?;

    // Session control commands never get a reply of their own.
    if matches!(command, CLEAR_COMMAND | RESIZE_COMMAND | STOP_COMMAND) {
        return Ok(());
    }

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut interrupted = false;

    loop {
        tokio::select! {
            message = ui.recv() => {
                let Some(message) = message else {
                    return Err(anyhow!("ui channel closed before '{command}' finished"));
                };
                println!("{}", message.to_json());
                if message.key != key || !message.is_terminal() {
                    continue;
                }
                return match message.payload {
                    UiPayload::Status(Status::Failure(reason)) => {
                        Err(anyhow!("'{command}' failed: {reason}"))
                    }
                    _ if command == HTTP_SERVE_RUN_COMMAND && !interrupted => {
                        // The server lives in this process.
                        info!(key = %key, "serving until interrupted");
                        let _ = (&mut interrupt).await;
                        router.static_servers().stop_all();
                        Ok(())
                    }
                    _ => Ok(()),
                };
            }
            _ = &mut interrupt, if !interrupted => {
                interrupted = true;
                info!(key = %key, "interrupted, cancelling");
                router.coordinator().cancel(&key);
                router.session().stop().await;
            }
        }
    }
}

/// JSON when it parses, else the raw string.
fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn describe_outcome(outcome: &StopOutcome) -> String {
    match outcome {
        StopOutcome::NoPidFile => "not running (no pid file)".to_string(),
        StopOutcome::NoProcesses => "not running".to_string(),
        StopOutcome::Signalled { command, pids } => format!("stopped {pids:?} ({command})"),
        StopOutcome::Failed { command, reason } => match command {
            Some(command) => format!("failed: {reason} ({command})"),
            None => format!("failed: {reason}"),
        },
    }
}

fn print_config(cfg: &Config) {
    println!("stackd config");
    println!("  run_dir = {}", cfg.run_dir.display());
    print_optional_path("static_dir", cfg.static_dir.as_deref());
    if let Some(lang) = &cfg.lang {
        println!("  lang = {lang}");
    }
    println!(
        "  password = {}",
        if cfg.password.is_some() { "<set>" } else { "<unset>" }
    );
    println!("  hosts_file = {}", cfg.hosts_file.display());
    if let Some(proxy) = &cfg.proxy {
        for (name, value) in proxy {
            println!("  proxy.{name} = {value}");
        }
    }
    if let Some(timeout) = cfg.worker_timeout {
        println!("  worker.timeout = {timeout:?}");
    }
    println!();

    let state = cfg.initial_state();
    println!("service directories:");
    for dir in state.layout_dirs() {
        println!("  - {}", dir.display());
    }
    debug!("check-config complete");
}

fn print_optional_path(name: &str, path: Option<&Path>) {
    if let Some(path) = path {
        println!("  {name} = {}", path.display());
    }
}
