//! Host file watching seam.
//!
//! The host owns the actual watcher; the plugin only tells it which files it
//! cares about and registers listeners for change notifications.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

pub type ChangeListener = Arc<dyn Fn(&Path) + Send + Sync>;

/// Handle returned when registering a change listener
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub trait FileWatcher: Send + Sync {
  fn add(&self, paths: &[PathBuf]);

  fn unwatch(&self, paths: &[PathBuf]);

  fn add_change_listener(&self, listener: ChangeListener) -> ListenerId;

  /// Removing a listener that is not registered does nothing
  fn remove_change_listener(&self, id: ListenerId);
}

pub type FileWatcherRef = Arc<dyn FileWatcher>;

/// Listener bookkeeping shared by watcher implementations
#[derive(Default)]
pub struct ListenerSet {
  next_id: AtomicU64,
  listeners: Mutex<Vec<(ListenerId, ChangeListener)>>,
}

impl fmt::Debug for ListenerSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ListenerSet")
      .field("len", &self.len())
      .finish()
  }
}

impl ListenerSet {
  pub fn insert(&self, listener: ChangeListener) -> ListenerId {
    let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
    self.listeners.lock().push((id, listener));
    id
  }

  pub fn remove(&self, id: ListenerId) {
    self.listeners.lock().retain(|(listener_id, _)| *listener_id != id);
  }

  pub fn len(&self) -> usize {
    self.listeners.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Calls every listener with `path`, outside of the internal lock
  pub fn notify(&self, path: &Path) {
    let listeners: Vec<ChangeListener> = self
      .listeners
      .lock()
      .iter()
      .map(|(_, listener)| listener.clone())
      .collect();

    for listener in listeners {
      listener(path);
    }
  }
}

/// A watcher that never touches the file system; changes are emitted by hand
#[derive(Debug, Default)]
pub struct InMemoryFileWatcher {
  watched: Mutex<HashSet<PathBuf>>,
  listeners: ListenerSet,
}

impl InMemoryFileWatcher {
  pub fn emit_change(&self, path: &Path) {
    self.listeners.notify(path);
  }

  pub fn is_watched(&self, path: &Path) -> bool {
    self.watched.lock().contains(path)
  }

  pub fn watched_paths(&self) -> BTreeSet<PathBuf> {
    self.watched.lock().iter().cloned().collect()
  }

  pub fn listener_count(&self) -> usize {
    self.listeners.len()
  }
}

impl FileWatcher for InMemoryFileWatcher {
  fn add(&self, paths: &[PathBuf]) {
    self.watched.lock().extend(paths.iter().cloned());
  }

  fn unwatch(&self, paths: &[PathBuf]) {
    let mut watched = self.watched.lock();
    for path in paths {
      watched.remove(path);
    }
  }

  fn add_change_listener(&self, listener: ChangeListener) -> ListenerId {
    self.listeners.insert(listener)
  }

  fn remove_change_listener(&self, id: ListenerId) {
    self.listeners.remove(id);
  }
}

/// Reference counts watched dependency files across worker entries
///
/// Two workers may share a dependency. The file is only unwatched once no
/// entry depends on it anymore.
pub struct DependencyWatcher {
  watcher: FileWatcherRef,
  watch_counts: HashMap<PathBuf, usize>,
}

impl fmt::Debug for DependencyWatcher {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DependencyWatcher")
      .field("watch_counts", &self.watch_counts)
      .finish()
  }
}

impl DependencyWatcher {
  pub fn new(watcher: FileWatcherRef) -> Self {
    Self {
      watcher,
      watch_counts: HashMap::new(),
    }
  }

  pub fn watch(&mut self, paths: &BTreeSet<PathBuf>, listener: ChangeListener) -> ListenerId {
    let mut added = Vec::new();
    for path in paths {
      let count = self.watch_counts.entry(path.clone()).or_insert(0);
      if *count == 0 {
        added.push(path.clone());
      }
      *count += 1;
    }

    if !added.is_empty() {
      self.watcher.add(&added);
    }

    self.watcher.add_change_listener(listener)
  }

  /// Listens to every change the underlying watcher reports
  pub fn add_change_listener(&self, listener: ChangeListener) -> ListenerId {
    self.watcher.add_change_listener(listener)
  }

  pub fn unwatch(&mut self, id: ListenerId, paths: &BTreeSet<PathBuf>) {
    self.watcher.remove_change_listener(id);

    let mut removed = Vec::new();
    for path in paths {
      if let Some(count) = self.watch_counts.get_mut(path) {
        *count -= 1;
        if *count == 0 {
          self.watch_counts.remove(path);
          removed.push(path.clone());
        }
      }
    }

    if !removed.is_empty() {
      self.watcher.unwatch(&removed);
    }
  }
}
