use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use crate::options::WorkerOptions;
use crate::paths::join_normalized;
use crate::watcher::ListenerId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledWorker {
  pub code: String,
  pub map: String,
}

/// A module worker found in served code, keyed by the url path it is requested at
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerEntry {
  pub requested_path: String,
  /// The specifier as written, relative to `base_dir`
  pub source_file: String,
  /// Directory of the file that constructs the worker, relative to the root
  pub base_dir: String,
  pub options: WorkerOptions,
  pub compiled: Option<CompiledWorker>,
  pub dependency_files: BTreeSet<PathBuf>,
  pub invalidation_handle: Option<ListenerId>,
  /// Files reported as changed while a build runs, `None` when no build runs
  pub pending_changes: Option<BTreeSet<PathBuf>>,
}

impl WorkerEntry {
  pub fn new(
    requested_path: impl Into<String>,
    source_file: impl Into<String>,
    base_dir: impl Into<String>,
    options: WorkerOptions,
  ) -> Self {
    Self {
      requested_path: requested_path.into(),
      source_file: source_file.into(),
      base_dir: base_dir.into(),
      options,
      compiled: None,
      dependency_files: BTreeSet::new(),
      invalidation_handle: None,
      pending_changes: None,
    }
  }

  pub fn is_built(&self) -> bool {
    self.compiled.is_some()
  }

  pub fn base_dir_path(&self, root_dir: &Path) -> PathBuf {
    join_normalized(root_dir, &self.base_dir)
  }

  pub fn entry_file(&self, root_dir: &Path) -> PathBuf {
    join_normalized(&self.base_dir_path(root_dir), &self.source_file)
  }

  pub fn begin_build(&mut self) {
    self.pending_changes = Some(BTreeSet::new());
  }

  pub fn abort_build(&mut self) {
    self.pending_changes = None;
  }

  /// Stores a finished build, returns `false` when it is already stale
  ///
  /// The dependency set always contains at least the entry file. A build is
  /// stale when one of its dependencies changed after [`Self::begin_build`];
  /// its watch registration is kept but the code is not cached.
  pub fn store_build(
    &mut self,
    compiled: CompiledWorker,
    mut dependency_files: BTreeSet<PathBuf>,
    entry_file: PathBuf,
    invalidation_handle: Option<ListenerId>,
  ) -> bool {
    dependency_files.insert(entry_file);
    let stale = self
      .pending_changes
      .take()
      .is_some_and(|changes| changes.iter().any(|path| dependency_files.contains(path)));

    self.compiled = (!stale).then_some(compiled);
    self.dependency_files = dependency_files;
    self.invalidation_handle = invalidation_handle;
    !stale
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
  Added,
  /// Same worker registered again, any cached build is kept
  Unchanged,
  /// Options changed, the cached build was dropped
  Replaced,
}

#[derive(Debug, Default)]
pub struct WorkerRegistry {
  entries: HashMap<String, WorkerEntry>,
}

impl WorkerRegistry {
  /// Inserts or refreshes the entry for `entry.requested_path`
  ///
  /// The latest registration wins. Re-registering keeps the watcher handle and
  /// dependency set of the existing entry so a later build can release them.
  pub fn register(&mut self, entry: WorkerEntry) -> Registration {
    match self.entries.get_mut(&entry.requested_path) {
      None => {
        self.entries.insert(entry.requested_path.clone(), entry);
        Registration::Added
      }
      Some(existing) => {
        let options_changed = existing.options != entry.options;
        existing.source_file = entry.source_file;
        existing.base_dir = entry.base_dir;
        existing.options = entry.options;

        if options_changed {
          existing.compiled = None;
          Registration::Replaced
        } else {
          Registration::Unchanged
        }
      }
    }
  }

  pub fn get(&self, requested_path: &str) -> Option<&WorkerEntry> {
    self.entries.get(requested_path)
  }

  pub fn get_mut(&mut self, requested_path: &str) -> Option<&mut WorkerEntry> {
    self.entries.get_mut(requested_path)
  }

  pub fn contains(&self, requested_path: &str) -> bool {
    self.entries.contains_key(requested_path)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Drops the cached build of `requested_path` if it depends on `changed`
  pub fn invalidate(&mut self, requested_path: &str, changed: &Path) -> bool {
    let Some(entry) = self.entries.get_mut(requested_path) else {
      return false;
    };

    if entry.is_built() && entry.dependency_files.contains(changed) {
      entry.compiled = None;
      true
    } else {
      false
    }
  }

  /// Remembers `changed` for every build that is currently running
  pub fn record_change(&mut self, changed: &Path) {
    for pending in self
      .entries
      .values_mut()
      .filter_map(|entry| entry.pending_changes.as_mut())
    {
      pending.insert(changed.to_path_buf());
    }
  }

  /// Drops the cached build of every entry that depends on `changed`
  pub fn invalidate_dependents(&mut self, changed: &Path) -> Vec<String> {
    let mut invalidated: Vec<String> = self
      .entries
      .values_mut()
      .filter(|entry| entry.is_built() && entry.dependency_files.contains(changed))
      .map(|entry| {
        entry.compiled = None;
        entry.requested_path.clone()
      })
      .collect();
    invalidated.sort();
    invalidated
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::options::WorkerType;

  fn module_options() -> WorkerOptions {
    WorkerOptions {
      worker_type: WorkerType::Module,
      ..Default::default()
    }
  }

  fn built_entry() -> WorkerEntry {
    let mut entry = WorkerEntry::new("/src/w.js", "./w.js", "src", module_options());
    entry.store_build(
      CompiledWorker {
        code: String::from("code"),
        map: String::from("{}"),
      },
      BTreeSet::from([PathBuf::from("/app/src/dep.js")]),
      entry.entry_file(Path::new("/app")),
      None,
    );
    entry
  }

  #[test]
  fn resolves_entry_file() {
    let entry = WorkerEntry::new("/src/w/w.js", "./w/w.js", "src", module_options());

    assert_eq!(entry.entry_file(Path::new("/app")), PathBuf::from("/app/src/w/w.js"));
    assert_eq!(entry.base_dir_path(Path::new("/app")), PathBuf::from("/app/src"));

    let root_entry = WorkerEntry::new("/w.js", "./w.js", "", module_options());
    assert_eq!(root_entry.entry_file(Path::new("/app")), PathBuf::from("/app/w.js"));
  }

  #[test]
  fn built_entries_always_depend_on_their_entry_file() {
    let entry = built_entry();

    assert!(entry.is_built());
    assert_eq!(
      entry.dependency_files,
      BTreeSet::from([
        PathBuf::from("/app/src/dep.js"),
        PathBuf::from("/app/src/w.js")
      ])
    );
  }

  #[test]
  fn registering_twice_keeps_the_build() {
    let mut registry = WorkerRegistry::default();
    registry.register(built_entry());

    let again = WorkerEntry::new("/src/w.js", "./w.js", "src", module_options());
    assert_eq!(registry.register(again), Registration::Unchanged);
    assert!(registry.get("/src/w.js").unwrap().is_built());
    assert_eq!(registry.len(), 1);
  }

  #[test]
  fn changed_options_drop_the_build() {
    let mut registry = WorkerRegistry::default();
    registry.register(built_entry());

    let mut options = module_options();
    options.name = Some(String::from("renamed"));
    let again = WorkerEntry::new("/src/w.js", "./w.js", "src", options);

    assert_eq!(registry.register(again), Registration::Replaced);
    let entry = registry.get("/src/w.js").unwrap();
    assert!(!entry.is_built());
    assert_eq!(entry.dependency_files.len(), 2);
  }

  #[test]
  fn invalidates_only_dependents() {
    let mut registry = WorkerRegistry::default();
    registry.register(built_entry());

    assert!(!registry.invalidate("/src/w.js", Path::new("/app/src/other.js")));
    assert!(registry.get("/src/w.js").unwrap().is_built());

    assert!(registry.invalidate("/src/w.js", Path::new("/app/src/dep.js")));
    assert!(!registry.get("/src/w.js").unwrap().is_built());

    assert!(!registry.invalidate("/src/w.js", Path::new("/app/src/dep.js")));
    assert!(!registry.invalidate("/missing.js", Path::new("/app/src/dep.js")));
  }

  #[test]
  fn invalidates_every_entry_sharing_a_dependency() {
    let mut registry = WorkerRegistry::default();
    registry.register(built_entry());
    let mut other = built_entry();
    other.requested_path = String::from("/src/other.js");
    registry.register(other);
    registry.register(WorkerEntry::new("/unbuilt.js", "./unbuilt.js", "", module_options()));

    assert_eq!(
      registry.invalidate_dependents(Path::new("/app/src/dep.js")),
      vec!["/src/other.js", "/src/w.js"]
    );
    assert!(registry.invalidate_dependents(Path::new("/app/src/dep.js")).is_empty());
    assert_eq!(registry.get("/src/w.js").unwrap().dependency_files.len(), 2);
  }

  #[test]
  fn builds_racing_a_change_are_not_cached() {
    let mut registry = WorkerRegistry::default();
    registry.register(WorkerEntry::new("/src/w.js", "./w.js", "src", module_options()));
    registry.register(WorkerEntry::new("/other.js", "./other.js", "", module_options()));
    let compiled = CompiledWorker {
      code: String::from("code"),
      map: String::from("{}"),
    };

    registry.get_mut("/src/w.js").unwrap().begin_build();
    registry.record_change(Path::new("/app/src/w.js"));
    assert!(registry.get("/other.js").unwrap().pending_changes.is_none());

    let entry = registry.get_mut("/src/w.js").unwrap();
    let fresh = entry.store_build(
      compiled.clone(),
      BTreeSet::new(),
      PathBuf::from("/app/src/w.js"),
      None,
    );
    assert!(!fresh);
    assert!(!entry.is_built());
    assert_eq!(entry.dependency_files, BTreeSet::from([PathBuf::from("/app/src/w.js")]));

    entry.begin_build();
    registry.record_change(Path::new("/app/unrelated.js"));
    let entry = registry.get_mut("/src/w.js").unwrap();
    assert!(entry.store_build(compiled, BTreeSet::new(), PathBuf::from("/app/src/w.js"), None));
    assert!(entry.is_built());
    assert_eq!(entry.pending_changes, None);
  }
}
