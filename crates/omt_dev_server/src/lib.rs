//! Development host for the module worker plugin.
//!
//! Serves a directory over HTTP. JavaScript responses pass through
//! [`OmtPlugin::on_response_body`] and are cached per cache partition, requests
//! the plugin owns (legacy worker bundles, chunks, maps) are answered by the
//! plugin, and everything else is served from disk.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use clap::Parser;
use omt_bundler::LegacyBundler;
use omt_core::paths::url_to_file_path;
use omt_core::{FileContent, FileWatcherRef, LegacyMode, OmtPlugin, RequestHeaders};
use omt_filesystem::{FileSystemRef, OsFileSystem};
use path_slash::PathExt;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, info_span, Span};

mod config;
mod response_cache;
mod watcher;

pub use config::DevServerConfig;
pub use response_cache::ResponseCache;
pub use watcher::NotifyFileWatcher;

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Serves a directory, bundling module workers for browsers without module worker support")]
pub struct Options {
  /// Directory to serve
  #[arg(long, default_value = ".")]
  pub root: PathBuf,
  #[arg(long, default_value_t = 3000)]
  pub port: u16,
  #[arg(long, default_value = "127.0.0.1")]
  pub host: String,
  /// JSON5 file with plugin and bundler options
  #[arg(long)]
  pub config: Option<PathBuf>,
  /// Overrides `legacy` from the config file [possible values: auto, always, never]
  #[arg(long)]
  pub legacy: Option<LegacyMode>,
}

#[derive(Clone)]
pub struct AppState {
  root_dir: PathBuf,
  fs: FileSystemRef,
  plugin: Arc<OmtPlugin>,
  responses: Arc<ResponseCache>,
}

impl AppState {
  /// Starts `plugin` and drops cached bodies of files `watcher` reports as changed
  pub fn new(
    root_dir: PathBuf,
    fs: FileSystemRef,
    plugin: Arc<OmtPlugin>,
    watcher: FileWatcherRef,
  ) -> Self {
    plugin.on_server_start(watcher.clone(), root_dir.clone());

    let responses = Arc::new(ResponseCache::default());
    watcher.add_change_listener(Arc::new({
      let responses = responses.clone();
      let root_dir = root_dir.clone();
      move |path: &Path| {
        let Some(url_path) = file_path_to_url(&root_dir, path) else {
          return;
        };
        if responses.invalidate(&url_path) {
          debug!(path = url_path, "Dropped cached response body");
        }
      }
    }));

    Self {
      root_dir,
      fs,
      plugin,
      responses,
    }
  }

  /// The served body of a JavaScript file on disk, `None` when it cannot be read as text
  fn javascript_body(&self, path: &str, headers: &RequestHeaders) -> Option<String> {
    let partition = self.plugin.cache_key_override(path, headers);
    if let Some(body) = self.responses.get(path, partition.as_deref()) {
      debug!(path, partition = ?partition, "Serving cached response body");
      return Some(body);
    }

    let source = self
      .fs
      .read_to_string(&url_to_file_path(&self.root_dir, path))
      .ok()?;
    let body = self
      .plugin
      .on_response_body(path, &source, true)
      .unwrap_or(source);

    self.responses.insert(path, partition, body.clone());
    Some(body)
  }
}

pub fn router(state: AppState) -> Router {
  Router::new()
    .fallback(serve)
    .with_state(state)
    .layer(
      TraceLayer::new_for_http()
        .make_span_with(|request: &Request| {
          info_span!(
            "http_request",
            method = ?request.method(),
            uri = ?request.uri(),
          )
        })
        .on_response(|response: &Response, latency: Duration, _span: &Span| {
          info!(
            "{status} {latency:?}",
            status = response.status(),
            latency = latency,
          )
        }),
    )
}

async fn serve(State(state): State<AppState>, request: Request) -> Response {
  let path = request.uri().path().to_string();
  let headers = request_headers(request.headers());

  match state.plugin.on_request(&path, &headers).await {
    Ok(Some(content)) => return content_response(&path, content),
    Ok(None) => {}
    Err(err) => {
      error!(path, "{err}");
      return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
    }
  }

  if is_javascript(&path) {
    if let Some(body) = state.javascript_body(&path, &headers) {
      return content_response(&path, FileContent::Text(body));
    }
  }

  match ServeDir::new(&state.root_dir).oneshot(request).await {
    Ok(response) => response.into_response(),
    Err(never) => match never {},
  }
}

fn request_headers(headers: &HeaderMap) -> RequestHeaders {
  headers
    .iter()
    .filter_map(|(name, value)| {
      let value = value.to_str().ok()?;
      Some((name.as_str().to_string(), value.to_string()))
    })
    .collect()
}

fn is_javascript(path: &str) -> bool {
  path.ends_with(".js") || path.ends_with(".mjs")
}

fn content_type(path: &str) -> &'static str {
  match path.rsplit_once('.').map(|(_, extension)| extension) {
    Some("js" | "mjs" | "cjs") => "text/javascript; charset=utf-8",
    Some("map" | "json") => "application/json; charset=utf-8",
    _ => "application/octet-stream",
  }
}

fn content_response(path: &str, content: FileContent) -> Response {
  let body = match content {
    FileContent::Text(text) => text.into_bytes(),
    FileContent::Binary(bytes) => bytes,
  };

  (
    [
      (header::CONTENT_TYPE, content_type(path)),
      (header::CACHE_CONTROL, "no-cache"),
    ],
    body,
  )
    .into_response()
}

/// URL path under which `file` is served from `root_dir`
fn file_path_to_url(root_dir: &Path, file: &Path) -> Option<String> {
  let relative = file.strip_prefix(root_dir).ok()?;
  Some(format!("/{}", relative.to_slash()?))
}

pub struct ServerHandle {
  join_handle: tokio::task::JoinHandle<anyhow::Result<()>>,
  local_addr: SocketAddr,
}

impl ServerHandle {
  pub fn local_addr(&self) -> SocketAddr {
    self.local_addr
  }

  pub fn stop(&self) {
    self.join_handle.abort();
  }

  /// Resolves when the server stops
  pub async fn wait(self) -> anyhow::Result<()> {
    self.join_handle.await?
  }
}

pub async fn run_server(options: Options) -> anyhow::Result<ServerHandle> {
  let fs: FileSystemRef = Arc::new(OsFileSystem);
  let root_dir = fs
    .canonicalize(&options.root)
    .with_context(|| format!("Cannot serve {}", options.root.display()))?;

  let mut config = match &options.config {
    Some(path) => DevServerConfig::load(&fs, path)?,
    None => DevServerConfig::default(),
  };
  if let Some(legacy) = options.legacy {
    config.plugin.legacy = legacy;
  }

  let watcher = Arc::new(NotifyFileWatcher::new()?);
  watcher
    .watch_recursive(&root_dir)
    .with_context(|| format!("Cannot watch {}", root_dir.display()))?;

  let pipeline = Arc::new(LegacyBundler::new(fs.clone(), config.bundler));
  let plugin = Arc::new(OmtPlugin::new(config.plugin, fs.clone(), pipeline));
  let app = router(AppState::new(root_dir.clone(), fs, plugin, watcher));

  let listener = tokio::net::TcpListener::bind((options.host.as_str(), options.port))
    .await
    .with_context(|| format!("Cannot listen on {}:{}", options.host, options.port))?;
  let local_addr = listener.local_addr()?;
  info!(root_dir = %root_dir.display(), "Listening on http://{local_addr}");

  Ok(ServerHandle {
    join_handle: tokio::spawn(async move {
      axum::serve(listener, app).await?;
      Ok(())
    }),
    local_addr,
  })
}
