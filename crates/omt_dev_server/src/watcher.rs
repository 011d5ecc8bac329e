use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use omt_core::watcher::ListenerSet;
use omt_core::{ChangeListener, FileWatcher, ListenerId};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// [`FileWatcher`] backed by the platform's native file notifications
pub struct NotifyFileWatcher {
  watcher: Mutex<RecommendedWatcher>,
  listeners: Arc<ListenerSet>,
}

impl std::fmt::Debug for NotifyFileWatcher {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("NotifyFileWatcher")
      .field("listeners", &self.listeners)
      .finish()
  }
}

impl NotifyFileWatcher {
  pub fn new() -> notify::Result<Self> {
    let listeners = Arc::new(ListenerSet::default());

    let watcher = notify::recommended_watcher({
      let listeners = listeners.clone();
      move |result: notify::Result<notify::Event>| match result {
        Ok(event) => {
          if !is_content_change(&event.kind) {
            return;
          }
          for path in &event.paths {
            debug!(path = %path.display(), "File changed");
            listeners.notify(path);
          }
        }
        Err(error) => warn!("File watcher error: {error}"),
      }
    })?;

    Ok(Self {
      watcher: Mutex::new(watcher),
      listeners,
    })
  }

  /// Watches everything below `dir`, independently of [`FileWatcher::add`]
  pub fn watch_recursive(&self, dir: &Path) -> notify::Result<()> {
    self.watcher.lock().watch(dir, RecursiveMode::Recursive)
  }
}

fn is_content_change(kind: &EventKind) -> bool {
  matches!(
    kind,
    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
  )
}

impl FileWatcher for NotifyFileWatcher {
  fn add(&self, paths: &[PathBuf]) {
    let mut watcher = self.watcher.lock();
    for path in paths {
      if let Err(error) = watcher.watch(path, RecursiveMode::NonRecursive) {
        warn!(path = %path.display(), "Could not watch file: {error}");
      }
    }
  }

  fn unwatch(&self, paths: &[PathBuf]) {
    let mut watcher = self.watcher.lock();
    for path in paths {
      // Deleted files are already gone from the native watcher
      if let Err(error) = watcher.unwatch(path) {
        debug!(path = %path.display(), "Could not unwatch file: {error}");
      }
    }
  }

  fn add_change_listener(&self, listener: ChangeListener) -> ListenerId {
    self.listeners.insert(listener)
  }

  fn remove_change_listener(&self, id: ListenerId) {
    self.listeners.remove(id);
  }
}
