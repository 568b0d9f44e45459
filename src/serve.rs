// src/serve.rs

//! Static HTTP servers for project directories.
//!
//! Each served directory gets its own listener on an ephemeral port of the
//! loopback interface. Every response carries permissive CORS headers so
//! pages opened from other local origins can fetch from it.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::Router;
use percent_encoding::percent_decode_str;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::errors::{Result, StackdError};

/// Where a directory is being served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServeInfo {
    pub path: String,
    pub port: u16,
    pub host: String,
}

#[derive(Debug)]
struct RunningServer {
    info: ServeInfo,
    shutdown: oneshot::Sender<()>,
}

/// The running servers, keyed by the directory they serve.
#[derive(Debug, Clone, Default)]
pub struct StaticServers {
    running: Arc<Mutex<HashMap<PathBuf, RunningServer>>>,
}

impl StaticServers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `root`, replacing any server already running for it.
    pub async fn run(&self, root: &Path) -> Result<ServeInfo> {
        let metadata = tokio::fs::metadata(root).await?;
        if !metadata.is_dir() {
            return Err(StackdError::ConfigError(format!(
                "'{}' is not a directory",
                root.display()
            )));
        }
        self.stop(root);

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let port = listener.local_addr()?.port();
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let app = static_router(root.to_path_buf());

        let served = root.display().to_string();
        tokio::spawn(async move {
            let signal = async {
                let _ = shutdown_rx.await;
            };
            if let Err(err) = axum::serve(listener, app)
                .with_graceful_shutdown(signal)
                .await
            {
                warn!(path = %served, error = %err, "static server failed");
            }
            debug!(path = %served, "static server stopped");
        });

        let info = ServeInfo {
            path: root.display().to_string(),
            port,
            host: format!("http://localhost:{port}/"),
        };
        info!(path = %info.path, port, "serving directory");
        self.lock().insert(
            root.to_path_buf(),
            RunningServer {
                info: info.clone(),
                shutdown,
            },
        );
        Ok(info)
    }

    /// Stop the server for `root`. Returns whether one was running.
    pub fn stop(&self, root: &Path) -> bool {
        match self.lock().remove(root) {
            Some(server) => {
                info!(path = %server.info.path, port = server.info.port, "stopping static server");
                let _ = server.shutdown.send(());
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let servers: Vec<RunningServer> = self.lock().drain().map(|(_, s)| s).collect();
        for server in servers {
            debug!(path = %server.info.path, "stopping static server");
            let _ = server.shutdown.send(());
        }
    }

    pub fn get(&self, root: &Path) -> Option<ServeInfo> {
        self.lock().get(root).map(|s| s.info.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, RunningServer>> {
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn static_router(root: PathBuf) -> Router {
    Router::new()
        .fallback(serve_path)
        .with_state(Arc::new(root))
        .layer(axum::middleware::map_response(allow_any_origin))
}

async fn allow_any_origin(mut response: Response) -> Response {
    let headers = response.headers_mut();
    let any = HeaderValue::from_static("*");
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, any.clone());
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, any.clone());
    headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, any);
    response
}

async fn serve_path(State(root): State<Arc<PathBuf>>, uri: Uri) -> Response {
    let Some(relative) = request_path(uri.path()) else {
        return StatusCode::FORBIDDEN.into_response();
    };
    let target = root.join(&relative);

    let Ok(metadata) = tokio::fs::metadata(&target).await else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if !metadata.is_dir() {
        return file_response(&target).await;
    }

    let index = target.join("index.html");
    if tokio::fs::metadata(&index).await.is_ok_and(|m| m.is_file()) {
        return file_response(&index).await;
    }
    match directory_listing(&target, uri.path()).await {
        Ok(page) => Html(page).into_response(),
        Err(err) => {
            debug!(path = %target.display(), error = %err, "listing directory failed");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// The request path as a relative file path. `None` for paths that would
/// leave the served directory.
fn request_path(raw: &str) -> Option<PathBuf> {
    let decoded = percent_decode_str(raw).decode_utf8().ok()?;
    let mut path = PathBuf::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => return None,
            s if s.contains('\\') || s.contains('\0') => return None,
            s => path.push(s),
        }
    }
    Some(path)
}

async fn file_response(path: &Path) -> Response {
    match tokio::fs::read(path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, content_type(path))], bytes).into_response(),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "reading file failed");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

async fn directory_listing(dir: &Path, url_path: &str) -> std::io::Result<String> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().await?.is_dir() {
            name.push('/');
        }
        names.push(name);
    }
    names.sort();

    let base = if url_path.ends_with('/') {
        url_path.to_string()
    } else {
        format!("{url_path}/")
    };
    let mut page = format!("<!DOCTYPE html>\n<title>Index of {base}</title>\n<ul>\n");
    for name in names {
        let _ = writeln!(page, "<li><a href=\"{base}{name}\">{name}</a></li>");
    }
    page.push_str("</ul>\n");
    Ok(page)
}

fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "text/javascript; charset=utf-8",
        Some("json" | "map") => "application/json",
        Some("txt" | "md") => "text/plain; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("wasm") => "application/wasm",
        Some("woff2") => "font/woff2",
        Some("woff") => "font/woff",
        _ => "application/octet-stream",
    }
}
