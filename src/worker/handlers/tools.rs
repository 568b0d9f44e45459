// src/worker/handlers/tools.rs

//! The `tools` worker: file utilities and package-manager discovery.

use std::future::Future;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{debug, info};

use crate::deferred::Deferred;
use crate::fs::FileSystem;
use crate::queue::{ItemResult, TaskItem, TaskQueue};
use crate::worker::context::WorkerContext;

use super::Handler;

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// Drop a leading UTF-8 byte-order mark from `path`.
///
/// Returns whether the file was rewritten.
pub fn strip_bom(fs: &dyn FileSystem, path: &Path) -> anyhow::Result<bool> {
    let mut head = Vec::with_capacity(UTF8_BOM.len());
    fs.open_read(path)?
        .take(UTF8_BOM.len() as u64)
        .read_to_end(&mut head)
        .with_context(|| format!("reading head of {path:?}"))?;
    if head != UTF8_BOM {
        return Ok(false);
    }
    let content = fs.read(path)?;
    fs.write(path, &content[UTF8_BOM.len()..])?;
    Ok(true)
}

/// Every file below `root`, depth first, as absolute paths or relative to
/// `root`. Symlinked directories are not descended into.
pub fn collect_files(
    fs: &dyn FileSystem,
    root: &Path,
    full_path: bool,
) -> anyhow::Result<Vec<String>> {
    if !fs.is_dir(root) {
        return Err(anyhow!("{root:?} is not a directory"));
    }
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs.read_dir(&dir)?.into_iter().rev() {
            if fs.is_dir(&entry) {
                if fs.is_symlink(&entry) {
                    debug!(path = %entry.display(), "skipping directory symlink");
                } else {
                    stack.push(entry);
                }
            } else {
                let shown = if full_path {
                    entry.as_path()
                } else {
                    entry.strip_prefix(root).unwrap_or(&entry)
                };
                files.push(shown.to_string_lossy().into_owned());
            }
        }
    }
    files.sort();
    Ok(files)
}

/// One file of a `cleanBom` batch.
pub struct BomCleanTask {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
}

impl BomCleanTask {
    pub fn new(fs: Arc<dyn FileSystem>, path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            path: path.into(),
        }
    }
}

impl TaskItem for BomCleanTask {
    type Output = bool;

    fn label(&self) -> String {
        self.path.display().to_string()
    }

    fn run(self) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send>> {
        Box::pin(async move {
            let BomCleanTask { fs, path } = self;
            tokio::task::spawn_blocking(move || strip_bom(fs.as_ref(), &path)).await?
        })
    }
}

#[derive(Debug, Clone)]
pub struct ToolsHandler {
    fs: Arc<dyn FileSystem>,
}

impl ToolsHandler {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    fn get_all_file(&self, args: Vec<Value>) -> Deferred<Value, Value> {
        let Some(dir) = args.first().and_then(Value::as_str).map(PathBuf::from) else {
            return Deferred::rejected("getAllFile expects a directory");
        };
        let full_path = args.get(1).and_then(Value::as_bool).unwrap_or(true);
        let fs = Arc::clone(&self.fs);

        Deferred::spawn(move |settler| async move {
            let listed =
                tokio::task::spawn_blocking(move || collect_files(fs.as_ref(), &dir, full_path))
                    .await;
            match listed {
                Ok(Ok(files)) => {
                    debug!(count = files.len(), "files collected");
                    settler.resolve(json!(files));
                }
                Ok(Err(err)) => {
                    settler.reject(err);
                }
                Err(err) => {
                    settler.reject(anyhow::Error::from(err));
                }
            }
        })
    }

    fn clean_bom(&self, args: Vec<Value>) -> Deferred<Value, Value> {
        let files: Vec<String> = match args.into_iter().next() {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => return Deferred::rejected("cleanBom expects a list of files"),
        };
        let fs = Arc::clone(&self.fs);

        Deferred::spawn(move |settler| async move {
            let progress = settler.clone();
            let report = TaskQueue::new()
                .progress(move |p| {
                    progress.notify(json!(p));
                })
                .init_queue(files.into_iter().map(|f| BomCleanTask::new(Arc::clone(&fs), f)))
                .run()
                .await;
            let cleaned = report
                .results
                .iter()
                .filter(|r| r.output() == Some(&true))
                .count();
            let failed: Vec<Value> = report
                .results
                .iter()
                .filter_map(|r| match r {
                    ItemResult::Failed { label, reason } => {
                        Some(json!({ "file": label, "reason": reason }))
                    }
                    ItemResult::Done(_) => None,
                })
                .collect();
            info!(
                files = report.results.len(),
                cleaned,
                failed = failed.len(),
                "bom cleaning finished"
            );
            settler.resolve(json!({ "cleaned": cleaned, "failed": failed }));
        })
    }
}

impl Handler for ToolsHandler {
    fn handle(&self, ctx: WorkerContext, function: &str, args: Vec<Value>) -> Deferred<Value, Value> {
        match function {
            "getAllFile" => self.get_all_file(args),
            "cleanBom" => self.clean_bom(args),
            "detectPackageManager" => detect_package_manager(ctx),
            other => Deferred::rejected(format!("unsupported command '{other}' for worker 'tools'")),
        }
    }
}

/// Trimmed stdout of a successful command, if any.
async fn capture(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().await.ok()?;
    if !output.status.success() {
        debug!(program, ?args, status = %output.status, "package manager check failed");
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// Locate Homebrew (preferred) or MacPorts and publish the result in a
/// replacement snapshot.
fn detect_package_manager(ctx: WorkerContext) -> Deferred<Value, Value> {
    Deferred::spawn(move |settler| async move {
        let mut state = ctx.snapshot().clone();
        state.is_apple_silicon = cfg!(all(target_os = "macos", target_arch = "aarch64"));

        if capture("which", &["brew"]).await.is_some() {
            state.brew_home = capture("brew", &["--repo"]).await;
            state.brew_cellar = capture("brew", &["--cellar"]).await;
        } else {
            state.macports = capture("which", &["port"]).await;
        }
        info!(
            brew = ?state.brew_home,
            macports = ?state.macports,
            "package manager detection finished"
        );

        let summary = json!({
            "BrewHome": state.brew_home,
            "BrewCellar": state.brew_cellar,
            "MacPorts": state.macports,
        });
        ctx.replace_state(state);
        settler.resolve(summary);
    })
}
