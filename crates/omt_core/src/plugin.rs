use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use omt_filesystem::FileSystemRef;
use omt_sourcemap::{
  compose, find_sourcemap_url, load_sourcemap_url, sourcemap_file_path, SourceMap,
};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::browser::{wants_legacy_workers, RequestHeaders};
use crate::config::OmtOptions;
use crate::edit_buffer::EditBuffer;
use crate::error::OmtError;
use crate::paths::{normalize_url_path, url_basename, url_dirname, url_to_file_path};
use crate::pipeline::{BundleOutput, BundlePipeline, BundleRequest, OutputChunk};
use crate::registry::{CompiledWorker, WorkerEntry, WorkerRegistry};
use crate::scanner::rewrite_module_workers;
use crate::virtual_files::{FileContent, VirtualFileStore};
use crate::watcher::{ChangeListener, DependencyWatcher, FileWatcherRef};

/// Cache partition used for clients that receive legacy worker bundles
pub const LEGACY_CACHE_KEY: &str = "legacy";

#[derive(Debug, Default)]
struct PluginState {
  root_dir: PathBuf,
  registry: WorkerRegistry,
  virtual_files: VirtualFileStore,
  watcher: Option<DependencyWatcher>,
}

enum Lookup {
  Found(FileContent),
  Unbuilt,
  NotFound,
}

/// Serves module workers as legacy bundles to clients without module worker support
///
/// One instance lives for the lifetime of the dev server. The state lock is
/// never held across an await point; concurrent requests for the same unbuilt
/// worker are serialized by a per worker build lock so only one build runs.
#[derive(Debug)]
pub struct OmtPlugin {
  options: OmtOptions,
  fs: FileSystemRef,
  pipeline: Arc<dyn BundlePipeline>,
  state: Arc<Mutex<PluginState>>,
  build_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl OmtPlugin {
  pub fn new(options: OmtOptions, fs: FileSystemRef, pipeline: Arc<dyn BundlePipeline>) -> Self {
    Self {
      options,
      fs,
      pipeline,
      state: Arc::default(),
      build_locks: Mutex::default(),
    }
  }

  pub fn options(&self) -> &OmtOptions {
    &self.options
  }

  pub fn on_server_start(&self, watcher: FileWatcherRef, root_dir: impl Into<PathBuf>) {
    let root_dir = root_dir.into();
    info!(root_dir = %root_dir.display(), legacy = %self.options.legacy, "Module worker plugin started");

    let watcher = DependencyWatcher::new(watcher);
    watcher.add_change_listener(self.build_change_listener());

    let mut state = self.state.lock();
    state.root_dir = root_dir;
    state.watcher = Some(watcher);
  }

  /// Content for `path` if this plugin owns it, `None` to fall through to static serving
  pub async fn on_request(
    &self,
    path: &str,
    headers: &RequestHeaders,
  ) -> Result<Option<FileContent>, OmtError> {
    let legacy = wants_legacy_workers(self.options.legacy, headers);

    {
      let state = self.state.lock();
      if let Some(file) = state.virtual_files.get(path) {
        if legacy || !file.legacy_only {
          return Ok(Some(file.content.clone()));
        }
        return Ok(None);
      }
    }

    if !legacy {
      return Ok(None);
    }

    self.resolve(path).await
  }

  /// Content for `path`, building its worker bundle if it is not cached yet
  pub async fn resolve(&self, path: &str) -> Result<Option<FileContent>, OmtError> {
    match self.lookup(path) {
      Lookup::Found(content) => return Ok(Some(content)),
      Lookup::NotFound => return Ok(None),
      Lookup::Unbuilt => {}
    }

    let build_lock = self.build_lock(path);
    let _guard = build_lock.lock().await;

    // Another request may have finished the build while this one waited
    match self.lookup(path) {
      Lookup::Found(content) => return Ok(Some(content)),
      Lookup::NotFound => return Ok(None),
      Lookup::Unbuilt => {}
    }

    let code = self.build(path).await?;
    Ok(Some(FileContent::Text(code)))
  }

  /// Rewrites module worker constructions in a served JavaScript body
  ///
  /// Returns `None` when the body is served unchanged.
  pub fn on_response_body(&self, path: &str, body: &str, is_javascript: bool) -> Option<String> {
    if !is_javascript {
      return None;
    }

    let (rewrite, root_dir) = {
      let mut state = self.state.lock();
      let rewrite = match rewrite_module_workers(body, path, &mut state.registry) {
        Ok(Some(rewrite)) => rewrite,
        Ok(None) => return None,
        Err(error) => {
          warn!(served_path = path, %error, "Could not scan served file, serving it unchanged");
          return None;
        }
      };
      (rewrite, state.root_dir.clone())
    };

    let mut buffer = rewrite.buffer;
    if let Err(error) = self.attach_source_map(path, &root_dir, &mut buffer) {
      warn!(served_path = path, %error, "Could not create a source map for the rewritten file");
    }

    Some(buffer.to_string())
  }

  pub fn cache_key_override(&self, path: &str, headers: &RequestHeaders) -> Option<String> {
    if !wants_legacy_workers(self.options.legacy, headers) {
      return None;
    }

    let state = self.state.lock();
    let owned = state.registry.contains(path)
      || state
        .virtual_files
        .get(path)
        .is_some_and(|file| file.legacy_only);

    owned.then(|| LEGACY_CACHE_KEY.to_string())
  }

  /// Drops every cached worker bundle that depends on `path`
  pub fn handle_file_change(&self, path: &Path) -> Vec<String> {
    let invalidated = {
      let mut state = self.state.lock();
      state.registry.record_change(path);
      state.registry.invalidate_dependents(path)
    };
    for worker in &invalidated {
      info!(%worker, changed = %path.display(), "Invalidated legacy worker bundle");
    }
    invalidated
  }

  pub fn worker_entry(&self, requested_path: &str) -> Option<WorkerEntry> {
    self.state.lock().registry.get(requested_path).cloned()
  }

  pub fn virtual_file(&self, path: &str) -> Option<FileContent> {
    self
      .state
      .lock()
      .virtual_files
      .get(path)
      .map(|file| file.content.clone())
  }

  fn lookup(&self, path: &str) -> Lookup {
    let state = self.state.lock();
    if let Some(file) = state.virtual_files.get(path) {
      return Lookup::Found(file.content.clone());
    }

    match state.registry.get(path) {
      None => Lookup::NotFound,
      Some(WorkerEntry {
        compiled: Some(compiled),
        ..
      }) => Lookup::Found(FileContent::Text(compiled.code.clone())),
      Some(_) => Lookup::Unbuilt,
    }
  }

  fn build_lock(&self, path: &str) -> Arc<tokio::sync::Mutex<()>> {
    self
      .build_locks
      .lock()
      .entry(path.to_string())
      .or_default()
      .clone()
  }

  #[instrument(level = "debug", skip(self))]
  async fn build(&self, path: &str) -> Result<String, OmtError> {
    let request = {
      let mut state = self.state.lock();
      let PluginState {
        root_dir, registry, ..
      } = &mut *state;
      let Some(entry) = registry.get_mut(path) else {
        return Err(OmtError::UnknownWorker(path.to_string()));
      };
      entry.begin_build();
      BundleRequest {
        entry: entry.entry_file(root_dir),
        base_dir: entry.base_dir_path(root_dir),
        root_dir: root_dir.clone(),
        requested_path: path.to_string(),
      }
    };

    info!(worker = path, entry = %request.entry.display(), "Bundling legacy worker");
    let output = match self.pipeline.bundle(request).await {
      Ok(output) => output,
      Err(error) => {
        if let Some(entry) = self.state.lock().registry.get_mut(path) {
          entry.abort_build();
        }
        return Err(OmtError::Build {
          path: path.to_string(),
          error,
        });
      }
    };

    self.install_build(path, output)
  }

  /// Stores a finished bundle and moves the worker's watch registration to the new dependencies
  fn install_build(&self, path: &str, output: BundleOutput) -> Result<String, OmtError> {
    let BundleOutput {
      mut code,
      mut map,
      chunks,
      watch_files,
    } = output;

    let basename = url_basename(path).to_string();
    let directory = url_dirname(path).to_string();
    if self.options.append_source_map_comment {
      code = with_source_map_comment(code, &basename);
    }
    map.set_file(&basename);
    let map_json = map.to_json()?;
    let listener = self.invalidation_listener(path);

    let mut state = self.state.lock();
    let PluginState {
      root_dir,
      registry,
      virtual_files,
      watcher,
    } = &mut *state;

    let Some(entry) = registry.get_mut(path) else {
      return Err(OmtError::UnknownWorker(path.to_string()));
    };

    let entry_file = entry.entry_file(root_dir);
    let mut dependency_files: BTreeSet<PathBuf> = watch_files.into_iter().collect();
    dependency_files.insert(entry_file.clone());

    let invalidation_handle = match watcher.as_mut() {
      Some(watcher) => {
        // The previous listener must be gone before the new one is registered
        if let Some(previous) = entry.invalidation_handle.take() {
          watcher.unwatch(previous, &entry.dependency_files);
        }
        Some(watcher.watch(&dependency_files, listener))
      }
      None => None,
    };

    virtual_files.insert(format!("{path}.map"), map_json.clone(), true);
    for chunk in chunks {
      let chunk_path = normalize_url_path(&format!("{directory}/{}", chunk.file_name()));
      match chunk {
        OutputChunk::Chunk {
          file_name,
          code: chunk_code,
          map: chunk_map,
        } => {
          let chunk_code = match chunk_map {
            Some(mut chunk_map) => {
              chunk_map.set_file(&file_name);
              virtual_files.insert(format!("{chunk_path}.map"), chunk_map.to_json()?, true);
              if self.options.append_source_map_comment {
                with_source_map_comment(chunk_code, url_basename(&chunk_path))
              } else {
                chunk_code
              }
            }
            None => chunk_code,
          };
          virtual_files.insert(chunk_path, chunk_code, true);
        }
        OutputChunk::Asset { source, .. } => {
          virtual_files.insert(chunk_path, source, true);
        }
      }
    }

    let dependency_count = dependency_files.len();
    let fresh = entry.store_build(
      CompiledWorker {
        code: code.clone(),
        map: map_json,
      },
      dependency_files,
      entry_file,
      invalidation_handle,
    );
    if fresh {
      info!(worker = path, dependency_count, "Bundled legacy worker");
    } else {
      info!(worker = path, dependency_count, "Dependencies changed while bundling, rebuilding on the next request");
    }

    Ok(code)
  }

  /// Records changes for builds that have not registered their dependencies yet
  fn build_change_listener(&self) -> ChangeListener {
    let state = Arc::downgrade(&self.state);

    Arc::new(move |changed: &Path| {
      if let Some(state) = state.upgrade() {
        state.lock().registry.record_change(changed);
      }
    })
  }

  fn invalidation_listener(&self, requested_path: &str) -> ChangeListener {
    let state = Arc::downgrade(&self.state);
    let requested_path = requested_path.to_string();

    Arc::new(move |changed: &Path| {
      let Some(state) = state.upgrade() else {
        return;
      };
      if state.lock().registry.invalidate(&requested_path, changed) {
        info!(worker = %requested_path, changed = %changed.display(), "Invalidated legacy worker bundle");
      }
    })
  }

  /// Maps the rewritten body back onto the authored sources
  ///
  /// A map file the served file already references is composed under the
  /// rewrite map and served at the referenced url. Otherwise the reference is
  /// pointed at `<served path>.map`.
  fn attach_source_map(
    &self,
    path: &str,
    root_dir: &Path,
    buffer: &mut EditBuffer,
  ) -> Result<(), OmtError> {
    let served_path = normalize_url_path(path);
    let file_path = url_to_file_path(root_dir, &served_path);
    let basename = url_basename(&served_path).to_string();
    let own_comment = format!("//# sourceMappingURL={basename}.map");
    let own_map_path = format!("{served_path}.map");

    let (original_map, map_path) = match find_sourcemap_url(buffer.original()) {
      Some(found) if found.url.starts_with("data:") => {
        let original_map = self.load_original_map(root_dir, &file_path, &found.url);
        buffer.overwrite(found.range(), own_comment)?;
        (original_map, own_map_path)
      }
      Some(found) => {
        let original_map = self.load_original_map(root_dir, &file_path, &found.url);
        match (original_map, map_request_path(&served_path, &found.url)) {
          (Some(original_map), Some(map_path)) => (Some(original_map), map_path),
          (original_map, _) => {
            buffer.overwrite(found.range(), own_comment)?;
            (original_map, own_map_path)
          }
        }
      }
      None => {
        buffer.append(format!("\n{own_comment}"))?;
        (None, own_map_path)
      }
    };

    let map_dir = url_to_file_path(root_dir, url_dirname(&map_path));
    let rewrite_map = buffer.generate_map(&map_dir, &file_path, true)?;
    let mut served_map = match original_map {
      Some(original_map) => compose(&rewrite_map, &original_map)?,
      None => rewrite_map,
    };
    served_map.set_file(&basename);

    let json = served_map.to_json()?;
    debug!(%served_path, %map_path, "Stored source map of rewritten file");
    self.state.lock().virtual_files.insert(map_path, json, false);

    Ok(())
  }

  fn load_original_map(&self, root_dir: &Path, file_path: &Path, url: &str) -> Option<SourceMap> {
    if let Some(map_file) = sourcemap_file_path(file_path, url) {
      if !map_file.starts_with(root_dir) {
        warn!(file = %file_path.display(), map = %map_file.display(), "Ignoring source map outside the root directory");
        return None;
      }
    }

    match load_sourcemap_url(&self.fs, root_dir, file_path, url) {
      Ok(map) => Some(map),
      Err(error) => {
        debug!(file = %file_path.display(), %error, "No usable source map, mapping the rewrite only");
        None
      }
    }
  }
}

fn with_source_map_comment(mut code: String, basename: &str) -> String {
  code.push_str(&format!("\n//# sourceMappingURL={basename}.map"));
  code
}

/// Url path a browser requests for a `sourceMappingURL` of the file served at `served_path`
fn map_request_path(served_path: &str, url: &str) -> Option<String> {
  if url.contains("://") {
    return None;
  }
  if url.starts_with('/') {
    return Some(normalize_url_path(url));
  }
  Some(normalize_url_path(&format!(
    "{}/{}",
    url_dirname(served_path),
    url
  )))
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

  use async_trait::async_trait;
  use omt_filesystem::{FileSystem, InMemoryFileSystem};
  use omt_sourcemap::OriginalLocation;
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::config::LegacyMode;
  use crate::watcher::InMemoryFileWatcher;

  const FIREFOX: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/115.0";
  const CHROME: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

  const MAIN: &str = "const w = new Worker(new URL('./worker.js', import.meta.url), {type:'module'});\n";

  /// Concatenates the entry with `shared.js`, failing while `fail` is set
  ///
  /// With `edit_during_build` set the next build rewrites the entry after
  /// reading it, like an editor saving while the bundler runs.
  #[derive(Debug)]
  struct FakePipeline {
    fs: Arc<InMemoryFileSystem>,
    watcher: Arc<InMemoryFileWatcher>,
    builds: AtomicUsize,
    fail: AtomicBool,
    edit_during_build: AtomicBool,
    chunk: bool,
  }

  #[async_trait]
  impl BundlePipeline for FakePipeline {
    async fn bundle(&self, request: BundleRequest) -> anyhow::Result<BundleOutput> {
      tokio::task::yield_now().await;
      self.builds.fetch_add(1, Ordering::SeqCst);
      if self.fail.load(Ordering::SeqCst) {
        anyhow::bail!("Unexpected token in {}", request.entry.display());
      }

      let shared = request.root_dir.join("shared.js");
      let entry_code = self.fs.read_to_string(&request.entry)?;
      if self.edit_during_build.swap(false, Ordering::SeqCst) {
        self.fs.write_file(&request.entry, "self.version = 2;");
        self.watcher.emit_change(&request.entry);
      }
      let code = format!(
        "define(function () {{\n{}\n{}\n}});",
        entry_code,
        self.fs.read_to_string(&shared)?
      );

      let mut map = SourceMap::new(&request.root_dir);
      let source = map.add_source(&request.entry.to_string_lossy());
      map.add_mapping(1, 0, Some(OriginalLocation::new(0, 0, source, None)));

      let chunks = if self.chunk {
        vec![
          OutputChunk::Chunk {
            file_name: String::from("lazy-0123abcd.js"),
            code: String::from("define(function () {});"),
            map: Some(SourceMap::new(&request.root_dir)),
          },
          OutputChunk::Asset {
            file_name: String::from("data.bin"),
            source: vec![1, 2, 3],
          },
        ]
      } else {
        Vec::new()
      };

      Ok(BundleOutput {
        code,
        map,
        chunks,
        watch_files: vec![request.entry, shared],
      })
    }
  }

  struct Fixture {
    fs: Arc<InMemoryFileSystem>,
    watcher: Arc<InMemoryFileWatcher>,
    pipeline: Arc<FakePipeline>,
    plugin: OmtPlugin,
  }

  fn fixture(options: OmtOptions, chunk: bool) -> Fixture {
    let fs = Arc::new(InMemoryFileSystem::default());
    fs.write_file(Path::new("/app/src/a.js"), MAIN);
    fs.write_file(Path::new("/app/src/worker.js"), "self.onmessage = () => {};");
    fs.write_file(Path::new("/app/shared.js"), "const shared = 1;");

    let watcher = Arc::new(InMemoryFileWatcher::default());
    let pipeline = Arc::new(FakePipeline {
      fs: fs.clone(),
      watcher: watcher.clone(),
      builds: AtomicUsize::new(0),
      fail: AtomicBool::new(false),
      edit_during_build: AtomicBool::new(false),
      chunk,
    });
    let plugin = OmtPlugin::new(options, fs.clone(), pipeline.clone());
    plugin.on_server_start(watcher.clone(), "/app");

    Fixture {
      fs,
      watcher,
      pipeline,
      plugin,
    }
  }

  fn headers(user_agent: &str) -> RequestHeaders {
    HashMap::from([(String::from("user-agent"), user_agent.to_string())])
  }

  fn text(content: Option<FileContent>) -> String {
    content
      .and_then(|content| content.as_text().map(str::to_string))
      .unwrap()
  }

  #[tokio::test]
  async fn builds_lazily_and_caches() {
    let Fixture {
      pipeline, plugin, ..
    } = fixture(OmtOptions::default(), false);

    let rewritten = plugin.on_response_body("/src/a.js", MAIN, true).unwrap();
    assert!(rewritten.starts_with(
      r#"const w = new Worker("/src/worker.js", {"type":"module"});"#
    ));
    assert_eq!(pipeline.builds.load(Ordering::SeqCst), 0);

    let first = text(plugin.on_request("/src/worker.js", &headers(FIREFOX)).await.unwrap());
    let second = text(plugin.on_request("/src/worker.js", &headers(FIREFOX)).await.unwrap());

    assert_eq!(first, second);
    assert!(first.contains("self.onmessage"));
    assert!(first.ends_with("\n//# sourceMappingURL=worker.js.map"));
    assert_eq!(pipeline.builds.load(Ordering::SeqCst), 1);

    let entry = plugin.worker_entry("/src/worker.js").unwrap();
    assert_eq!(
      entry.dependency_files,
      BTreeSet::from([PathBuf::from("/app/shared.js"), PathBuf::from("/app/src/worker.js")])
    );
    let compiled = entry.compiled.unwrap();
    assert_eq!(
      Some(FileContent::Text(compiled.map.clone())),
      plugin.virtual_file("/src/worker.js.map")
    );
    assert!(compiled.map.contains(r#""file":"worker.js""#));
  }

  #[tokio::test]
  async fn passes_through_for_native_browsers_and_unknown_paths() {
    let Fixture {
      pipeline, plugin, ..
    } = fixture(OmtOptions::default(), false);
    plugin.on_response_body("/src/a.js", MAIN, true);

    assert_eq!(plugin.on_request("/src/worker.js", &headers(CHROME)).await.unwrap(), None);
    assert_eq!(plugin.on_request("/src/other.js", &headers(FIREFOX)).await.unwrap(), None);
    assert_eq!(plugin.resolve("/src/other.js").await.unwrap(), None);
    assert_eq!(pipeline.builds.load(Ordering::SeqCst), 0);

    plugin.resolve("/src/worker.js").await.unwrap();
    assert_eq!(plugin.on_request("/src/worker.js.map", &headers(CHROME)).await.unwrap(), None);
    assert!(plugin
      .on_request("/src/worker.js.map", &headers(FIREFOX))
      .await
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn legacy_mode_overrides_detection() {
    let Fixture { plugin, .. } = fixture(
      OmtOptions {
        legacy: LegacyMode::Always,
        ..Default::default()
      },
      false,
    );
    plugin.on_response_body("/src/a.js", MAIN, true);

    assert!(plugin
      .on_request("/src/worker.js", &headers(CHROME))
      .await
      .unwrap()
      .is_some());

    let Fixture { plugin, .. } = fixture(
      OmtOptions {
        legacy: LegacyMode::Never,
        ..Default::default()
      },
      false,
    );
    plugin.on_response_body("/src/a.js", MAIN, true);

    assert_eq!(plugin.on_request("/src/worker.js", &headers(FIREFOX)).await.unwrap(), None);
  }

  #[tokio::test]
  async fn rebuilds_after_dependency_changes() {
    let Fixture {
      fs,
      watcher,
      pipeline,
      plugin,
    } = fixture(OmtOptions::default(), false);
    plugin.on_response_body("/src/a.js", MAIN, true);

    let mut previous = text(plugin.resolve("/src/worker.js").await.unwrap());
    for round in 0..3 {
      fs.write_file(Path::new("/app/shared.js"), format!("const shared = {round} + 2;"));
      watcher.emit_change(Path::new("/app/shared.js"));
      assert!(!plugin.worker_entry("/src/worker.js").unwrap().is_built());

      let next = text(plugin.resolve("/src/worker.js").await.unwrap());
      assert_ne!(next, previous);
      // One listener for the worker's dependencies and one for running builds
      assert_eq!(watcher.listener_count(), 2);
      previous = next;
    }

    assert_eq!(pipeline.builds.load(Ordering::SeqCst), 4);
    assert_eq!(
      watcher.watched_paths(),
      BTreeSet::from([PathBuf::from("/app/shared.js"), PathBuf::from("/app/src/worker.js")])
    );
  }

  #[tokio::test]
  async fn changes_while_bundling_trigger_a_rebuild() {
    let Fixture {
      fs,
      pipeline,
      plugin,
      ..
    } = fixture(OmtOptions::default(), false);
    fs.write_file(Path::new("/app/src/worker.js"), "self.version = 1;");
    plugin.on_response_body("/src/a.js", MAIN, true);
    pipeline.edit_during_build.store(true, Ordering::SeqCst);

    let first = text(plugin.resolve("/src/worker.js").await.unwrap());
    assert!(first.contains("self.version = 1;"));
    assert!(!plugin.worker_entry("/src/worker.js").unwrap().is_built());

    let second = text(plugin.resolve("/src/worker.js").await.unwrap());
    assert!(second.contains("self.version = 2;"));
    assert!(plugin.worker_entry("/src/worker.js").unwrap().is_built());

    let third = text(plugin.resolve("/src/worker.js").await.unwrap());
    assert_eq!(third, second);
    assert_eq!(pipeline.builds.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn unrelated_changes_keep_the_cache() {
    let Fixture {
      watcher,
      pipeline,
      plugin,
      ..
    } = fixture(OmtOptions::default(), false);
    plugin.on_response_body("/src/a.js", MAIN, true);
    plugin.resolve("/src/worker.js").await.unwrap();

    watcher.emit_change(Path::new("/app/src/a.js"));
    assert!(plugin.handle_file_change(Path::new("/app/unrelated.js")).is_empty());
    plugin.resolve("/src/worker.js").await.unwrap();

    assert_eq!(pipeline.builds.load(Ordering::SeqCst), 1);
    assert_eq!(
      plugin.handle_file_change(Path::new("/app/src/worker.js")),
      vec!["/src/worker.js"]
    );
  }

  #[tokio::test]
  async fn failed_builds_are_retried() {
    let Fixture {
      pipeline,
      plugin,
      watcher,
      ..
    } = fixture(OmtOptions::default(), false);
    plugin.on_response_body("/src/a.js", MAIN, true);
    pipeline.fail.store(true, Ordering::SeqCst);

    let error = plugin.resolve("/src/worker.js").await.unwrap_err();
    assert!(matches!(error, OmtError::Build { ref path, .. } if path == "/src/worker.js"));
    assert!(error.to_string().contains("Unexpected token"));
    let entry = plugin.worker_entry("/src/worker.js").unwrap();
    assert!(!entry.is_built());
    assert_eq!(entry.pending_changes, None);
    assert_eq!(watcher.listener_count(), 1);

    pipeline.fail.store(false, Ordering::SeqCst);
    assert!(plugin.resolve("/src/worker.js").await.unwrap().is_some());
    assert_eq!(pipeline.builds.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn concurrent_requests_share_one_build() {
    let Fixture {
      pipeline, plugin, ..
    } = fixture(OmtOptions::default(), false);
    plugin.on_response_body("/src/a.js", MAIN, true);

    let (first, second) = tokio::join!(
      plugin.resolve("/src/worker.js"),
      plugin.resolve("/src/worker.js")
    );

    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(pipeline.builds.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn stores_chunks_next_to_the_worker() {
    let Fixture { plugin, .. } = fixture(OmtOptions::default(), true);
    plugin.on_response_body("/src/a.js", MAIN, true);
    plugin.resolve("/src/worker.js").await.unwrap();

    assert_eq!(
      text(plugin.virtual_file("/src/lazy-0123abcd.js")),
      "define(function () {});\n//# sourceMappingURL=lazy-0123abcd.js.map"
    );
    assert!(plugin.virtual_file("/src/lazy-0123abcd.js.map").is_some());
    assert_eq!(
      plugin.virtual_file("/src/data.bin"),
      Some(FileContent::Binary(vec![1, 2, 3]))
    );
    assert_eq!(
      plugin.cache_key_override("/src/lazy-0123abcd.js", &headers(FIREFOX)),
      Some(String::from(LEGACY_CACHE_KEY))
    );
  }

  #[tokio::test]
  async fn skips_the_comment_when_disabled() {
    let Fixture { plugin, .. } = fixture(
      OmtOptions {
        append_source_map_comment: false,
        ..Default::default()
      },
      false,
    );
    plugin.on_response_body("/src/a.js", MAIN, true);

    let code = text(plugin.resolve("/src/worker.js").await.unwrap());
    assert!(!code.contains("sourceMappingURL"));
  }

  #[test]
  fn partitions_the_cache_for_legacy_clients() {
    let Fixture { plugin, .. } = fixture(OmtOptions::default(), false);
    plugin.on_response_body("/src/a.js", MAIN, true);

    assert_eq!(
      plugin.cache_key_override("/src/worker.js", &headers(FIREFOX)),
      Some(String::from("legacy"))
    );
    assert_eq!(plugin.cache_key_override("/src/worker.js", &headers(CHROME)), None);
    assert_eq!(plugin.cache_key_override("/src/a.js", &headers(FIREFOX)), None);
  }

  #[test]
  fn leaves_files_without_module_workers_alone() {
    let Fixture { plugin, .. } = fixture(OmtOptions::default(), false);

    assert_eq!(plugin.on_response_body("/src/b.js", "new Worker('./w.js');", true), None);
    assert_eq!(plugin.on_response_body("/src/a.css", MAIN, false), None);
    assert_eq!(plugin.on_response_body("/src/c.js", "const s = 'unterminated", true), None);
    assert!(plugin.worker_entry("/src/w.js").is_none());
  }

  #[test]
  fn serves_a_rewrite_map_for_files_without_one() {
    let Fixture { plugin, .. } = fixture(OmtOptions::default(), false);

    let rewritten = plugin.on_response_body("/src/a.js", MAIN, true).unwrap();
    assert!(rewritten.ends_with("\n//# sourceMappingURL=a.js.map"));

    let map = text(plugin.virtual_file("/src/a.js.map"));
    let map = SourceMap::from_json(Path::new("/"), &map).unwrap();
    assert_eq!(map.get_sources(), &vec![String::from("a.js")]);

    let column = rewritten.find(");").unwrap() as u32;
    let original_column = MAIN.find(");").unwrap() as u32;
    assert_eq!(
      map.find_closest_mapping(0, column).unwrap().original,
      Some(OriginalLocation::new(0, original_column, 0, None))
    );
  }

  #[test]
  fn composes_with_the_original_map_file() {
    let Fixture { fs, plugin, .. } = fixture(OmtOptions::default(), false);

    // a.ts compiled to a.js with every line moved down by one
    let served = format!("\"use strict\";\n{MAIN}//# sourceMappingURL=maps/a.js.map\n");
    let mut original = SourceMap::new(Path::new("/app/src/maps"));
    let source = original.add_source("../a.ts");
    for column in 0..MAIN.len() as u32 {
      original.add_mapping(1, column, Some(OriginalLocation::new(0, column, source, None)));
    }
    fs.write_file(
      Path::new("/app/src/maps/a.js.map"),
      original.to_json().unwrap(),
    );

    let rewritten = plugin.on_response_body("/src/a.js", &served, true).unwrap();
    assert!(rewritten.ends_with("//# sourceMappingURL=maps/a.js.map\n"));
    assert!(plugin.virtual_file("/src/a.js.map").is_none());

    let map = text(plugin.virtual_file("/src/maps/a.js.map"));
    let map = SourceMap::from_json(Path::new("/"), &map).unwrap();
    let ts = map.get_source_index("../a.ts").unwrap();

    let line = rewritten.lines().nth(1).unwrap();
    let column = line.find(");").unwrap() as u32;
    let original_column = MAIN.find(");").unwrap() as u32;
    assert_eq!(
      map.find_closest_mapping(1, column).unwrap().original,
      Some(OriginalLocation::new(0, original_column, ts, None))
    );

    // Inside the replaced span everything resolves to the start of the original arguments
    let arguments = MAIN.find('(').unwrap() as u32 + 1;
    assert_eq!(
      map.find_closest_mapping(1, arguments + 4).unwrap().original,
      Some(OriginalLocation::new(0, arguments, ts, None))
    );
  }

  #[test]
  fn replaces_inline_maps() {
    let Fixture { plugin, .. } = fixture(OmtOptions::default(), false);

    let mut original = SourceMap::new(Path::new("/app/src"));
    let source = original.add_source("a.ts");
    original.add_mapping(0, 0, Some(OriginalLocation::new(3, 0, source, None)));
    let served = format!("{MAIN}//# sourceMappingURL={}", original.to_data_url().unwrap());

    let rewritten = plugin.on_response_body("/src/a.js", &served, true).unwrap();
    assert!(rewritten.ends_with("\n//# sourceMappingURL=a.js.map"));
    assert!(!rewritten.contains("data:"));

    let map = text(plugin.virtual_file("/src/a.js.map"));
    let map = SourceMap::from_json(Path::new("/"), &map).unwrap();
    let ts = map.get_source_index("a.ts").unwrap();
    assert_eq!(
      map.find_closest_mapping(0, 0).unwrap().original,
      Some(OriginalLocation::new(3, 0, ts, None))
    );
  }

  #[test]
  fn falls_back_to_the_rewrite_map_when_the_original_is_missing() {
    let Fixture { plugin, .. } = fixture(OmtOptions::default(), false);
    let served = format!("{MAIN}//# sourceMappingURL=missing.js.map");

    let rewritten = plugin.on_response_body("/src/a.js", &served, true).unwrap();

    assert!(rewritten.ends_with("\n//# sourceMappingURL=a.js.map"));
    assert!(plugin.virtual_file("/src/a.js.map").is_some());
    assert!(plugin.virtual_file("/src/missing.js.map").is_none());
  }

  #[test]
  fn ignores_map_files_outside_the_root() {
    let Fixture { fs, plugin, .. } = fixture(OmtOptions::default(), false);

    let mut secret = SourceMap::new(Path::new("/etc"));
    let source = secret.add_source("secret.ts");
    secret.add_mapping(0, 0, Some(OriginalLocation::new(0, 0, source, None)));
    fs.write_file(Path::new("/etc/a.js.map"), secret.to_json().unwrap());
    let served = format!("{MAIN}//# sourceMappingURL=../../etc/a.js.map");

    let rewritten = plugin.on_response_body("/src/a.js", &served, true).unwrap();

    assert!(rewritten.ends_with("\n//# sourceMappingURL=a.js.map"));
    let map = text(plugin.virtual_file("/src/a.js.map"));
    assert!(!map.contains("secret.ts"));
    assert!(plugin.virtual_file("/etc/a.js.map").is_none());
  }

  #[test]
  fn resolves_map_request_paths() {
    assert_eq!(
      map_request_path("/src/a.js", "a.js.map").as_deref(),
      Some("/src/a.js.map")
    );
    assert_eq!(
      map_request_path("/src/a.js", "../maps/a.js.map").as_deref(),
      Some("/maps/a.js.map")
    );
    assert_eq!(
      map_request_path("/src/a.js", "/maps/a.js.map").as_deref(),
      Some("/maps/a.js.map")
    );
    assert_eq!(map_request_path("/src/a.js", "https://cdn/a.js.map"), None);
  }
}
