use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use omt_filesystem::FileSystemRef;
use omt_sourcemap::{find_sourcemap_url, load_sourcemap_url, sourcemap_file_path, SourceMap};
use path_slash::PathExt;

use crate::error::BundleError;
use crate::esm::{DependencyKind, ModuleSyntax};
use crate::options::LegacyBundlerOptions;
use crate::resolver::Resolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
  Script,
  Json,
}

#[derive(Debug)]
pub struct Module {
  /// Root relative forward slash path
  pub id: String,
  pub path: PathBuf,
  pub code: String,
  pub kind: ModuleKind,
  pub syntax: ModuleSyntax,
  /// Module index of every entry in `syntax.dependencies`
  pub dependencies: Vec<usize>,
  /// A map the module's own `sourceMappingURL` comment points at
  pub input_map: Option<SourceMap>,
}

impl Module {
  fn edges(&self, kinds: &[DependencyKind]) -> impl Iterator<Item = usize> + '_ {
    let kinds = kinds.to_vec();
    self
      .syntax
      .dependencies
      .iter()
      .zip(&self.dependencies)
      .filter(move |(dependency, _)| kinds.contains(&dependency.kind))
      .map(|(_, index)| *index)
  }
}

pub fn module_id(root_dir: &Path, path: &Path) -> String {
  pathdiff::diff_paths(path, root_dir)
    .unwrap_or_else(|| path.to_path_buf())
    .to_slash_lossy()
}

/// Every module reachable from an entry, in discovery order
#[derive(Debug, Default)]
pub struct ModuleGraph {
  /// The entry is always the first module
  pub modules: Vec<Module>,
  /// Every file read while loading the graph
  pub watch_files: BTreeSet<PathBuf>,
}

struct GraphLoader<'a> {
  fs: &'a FileSystemRef,
  options: &'a LegacyBundlerOptions,
  root_dir: &'a Path,
  map_dir: &'a Path,
}

impl ModuleGraph {
  /// Loads the graph of `entry` breadth first
  ///
  /// Pre-existing maps are loaded relative to `map_dir`, the directory the
  /// bundle's map will be served from.
  #[tracing::instrument(level = "debug", skip(fs, options))]
  pub fn load(
    fs: &FileSystemRef,
    options: &LegacyBundlerOptions,
    root_dir: &Path,
    map_dir: &Path,
    entry: &Path,
  ) -> Result<Self, BundleError> {
    let loader = GraphLoader {
      fs,
      options,
      root_dir,
      map_dir,
    };
    let resolver = Resolver::new(fs, options, root_dir);

    let mut graph = ModuleGraph::default();
    let mut indexes: HashMap<PathBuf, usize> = HashMap::new();
    let mut queue = VecDeque::from([0]);

    graph.add_module(&loader, entry)?;
    indexes.insert(entry.to_path_buf(), 0);

    while let Some(current) = queue.pop_front() {
      let from = graph.modules[current].path.clone();
      let specifiers: Vec<String> = graph.modules[current]
        .syntax
        .dependencies
        .iter()
        .map(|dependency| dependency.specifier.clone())
        .collect();

      let mut resolved = Vec::with_capacity(specifiers.len());
      for specifier in specifiers {
        let path = resolver.resolve(&specifier, &from, &mut graph.watch_files)?;
        let index = match indexes.get(&path) {
          Some(index) => *index,
          None => {
            let index = graph.add_module(&loader, &path)?;
            indexes.insert(path, index);
            queue.push_back(index);
            index
          }
        };
        resolved.push(index);
      }

      graph.modules[current].dependencies = resolved;
    }

    tracing::debug!(
      "Loaded {} modules for {}",
      graph.modules.len(),
      entry.display()
    );

    Ok(graph)
  }

  fn add_module(&mut self, loader: &GraphLoader<'_>, path: &Path) -> Result<usize, BundleError> {
    let code = loader
      .fs
      .read_to_string(path)
      .map_err(|error| BundleError::Read {
        path: path.to_path_buf(),
        error,
      })?;
    self.watch_files.insert(path.to_path_buf());

    let is_json = path.extension().is_some_and(|extension| extension == "json");
    let (kind, syntax, input_map) = if is_json {
      (ModuleKind::Json, ModuleSyntax::default(), None)
    } else {
      let syntax = ModuleSyntax::analyze(path, &code).map_err(|error| BundleError::Syntax {
        path: path.to_path_buf(),
        error,
      })?;

      let input_map = match find_sourcemap_url(&code) {
        Some(found) if loader.options.extract_source_maps => {
          self.load_input_map(loader, path, &found.url)
        }
        _ => None,
      };

      (ModuleKind::Script, syntax, input_map)
    };

    self.modules.push(Module {
      id: module_id(loader.root_dir, path),
      path: path.to_path_buf(),
      code,
      kind,
      syntax,
      dependencies: Vec::new(),
      input_map,
    });

    Ok(self.modules.len() - 1)
  }

  fn load_input_map(
    &mut self,
    loader: &GraphLoader<'_>,
    path: &Path,
    url: &str,
  ) -> Option<SourceMap> {
    let module_dir = path.parent().unwrap_or(loader.root_dir);
    let map_file = sourcemap_file_path(path, url);

    match load_sourcemap_url(loader.fs, loader.map_dir, path, url) {
      Ok(mut map) => {
        let sources_dir = match &map_file {
          Some(map_file) => {
            self.watch_files.insert(map_file.clone());
            map_file.parent().unwrap_or(module_dir).to_path_buf()
          }
          None => module_dir.to_path_buf(),
        };
        map.relocate_sources(&sources_dir);
        Some(map)
      }
      Err(error) => {
        tracing::debug!(
          "Ignoring source map {url} of {}: {error}",
          path.display()
        );
        None
      }
    }
  }

  pub fn entry(&self) -> &Module {
    &self.modules[0]
  }

  /// Modules `root` needs synchronously, dependencies first
  ///
  /// Modules in `exclude` and everything only reachable through them are skipped.
  pub fn static_order(&self, root: usize, exclude: &HashSet<usize>) -> Vec<usize> {
    let mut order = Vec::new();
    let mut visited = HashSet::new();
    self.visit(root, exclude, &mut visited, &mut order);
    order
  }

  fn visit(
    &self,
    index: usize,
    exclude: &HashSet<usize>,
    visited: &mut HashSet<usize>,
    order: &mut Vec<usize>,
  ) {
    if exclude.contains(&index) || !visited.insert(index) {
      return;
    }

    let edges = self.modules[index].edges(&[DependencyKind::Static, DependencyKind::Require]);
    for dependency in edges {
      self.visit(dependency, exclude, visited, order);
    }
    order.push(index);
  }

  /// Targets of `import()` anywhere in the graph, in discovery order
  pub fn dynamic_targets(&self) -> Vec<usize> {
    let mut seen = HashSet::new();
    self
      .modules
      .iter()
      .flat_map(|module| module.edges(&[DependencyKind::Dynamic]))
      .filter(|index| seen.insert(*index))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use omt_filesystem::{InMemoryFileSystem, MockFileSystem};
  use pretty_assertions::assert_eq;

  use super::*;

  fn load(files: &[(&str, &str)]) -> Result<ModuleGraph, BundleError> {
    let fs = InMemoryFileSystem::default();
    for (path, code) in files {
      fs.write_file(Path::new(path), code.to_string());
    }
    let fs: FileSystemRef = Arc::new(fs);

    ModuleGraph::load(
      &fs,
      &LegacyBundlerOptions::default(),
      Path::new("/app"),
      Path::new("/app/src"),
      Path::new("/app/src/worker.js"),
    )
  }

  fn ids(graph: &ModuleGraph, indexes: &[usize]) -> Vec<String> {
    indexes
      .iter()
      .map(|index| graph.modules[*index].id.clone())
      .collect()
  }

  #[test]
  fn loads_modules_once() {
    let graph = load(&[
      (
        "/app/src/worker.js",
        "import { a } from './a.js';\nimport { b } from './b.js';\n",
      ),
      ("/app/src/a.js", "import { b } from './b.js';\nexport const a = b;\n"),
      ("/app/src/b.js", "export const b = 1;\n"),
    ])
    .unwrap();

    assert_eq!(
      ids(&graph, &[0, 1, 2]),
      vec!["src/worker.js", "src/a.js", "src/b.js"]
    );
    assert_eq!(graph.modules[0].dependencies, vec![1, 2]);
    assert_eq!(graph.modules[1].dependencies, vec![2]);
    assert_eq!(
      graph.static_order(0, &HashSet::new()),
      vec![2, 1, 0]
    );
    assert_eq!(
      graph.watch_files,
      BTreeSet::from([
        PathBuf::from("/app/src/a.js"),
        PathBuf::from("/app/src/b.js"),
        PathBuf::from("/app/src/worker.js"),
      ])
    );
  }

  #[test]
  fn survives_import_cycles() {
    let graph = load(&[
      ("/app/src/worker.js", "import './a.js';\n"),
      ("/app/src/a.js", "import './b.js';\n"),
      ("/app/src/b.js", "import './a.js';\n"),
    ])
    .unwrap();

    assert_eq!(graph.modules.len(), 3);
    assert_eq!(graph.static_order(0, &HashSet::new()), vec![2, 1, 0]);
  }

  #[test]
  fn separates_dynamic_imports() {
    let graph = load(&[
      (
        "/app/src/worker.js",
        "import './shared.js';\nimport('./lazy.js');\n",
      ),
      ("/app/src/lazy.js", "import './shared.js';\nimport './only-lazy.js';\n"),
      ("/app/src/shared.js", ""),
      ("/app/src/only-lazy.js", ""),
    ])
    .unwrap();

    let main = graph.static_order(0, &HashSet::new());
    assert_eq!(ids(&graph, &main), vec!["src/shared.js", "src/worker.js"]);

    let targets = graph.dynamic_targets();
    assert_eq!(ids(&graph, &targets), vec!["src/lazy.js"]);

    let excluded: HashSet<usize> = main.into_iter().collect();
    assert_eq!(
      ids(&graph, &graph.static_order(targets[0], &excluded)),
      vec!["src/only-lazy.js", "src/lazy.js"]
    );
  }

  #[test]
  fn loads_existing_source_maps() {
    let map = r#"{"version":3,"sources":["../ts/worker.ts"],"names":[],"mappings":"AAAA"}"#;
    let graph = load(&[
      (
        "/app/src/worker.js",
        "self.x = 1;\n//# sourceMappingURL=maps/worker.js.map",
      ),
      ("/app/src/maps/worker.js.map", map),
    ])
    .unwrap();

    let module = graph.entry();
    assert_eq!(
      module.input_map.as_ref().unwrap().get_sources(),
      &[String::from("ts/worker.ts")]
    );
    assert!(graph
      .watch_files
      .contains(Path::new("/app/src/maps/worker.js.map")));
  }

  #[test]
  fn ignores_missing_source_maps() {
    let graph = load(&[(
      "/app/src/worker.js",
      "self.x = 1;\n//# sourceMappingURL=worker.js.map",
    )])
    .unwrap();

    assert!(graph.entry().input_map.is_none());
    assert_eq!(graph.watch_files.len(), 1);
  }

  #[test]
  fn reports_unresolved_imports() {
    let error = load(&[("/app/src/worker.js", "import './missing.js';\n")]).unwrap_err();

    assert_eq!(
      error.to_string(),
      "Failed to resolve './missing.js' from /app/src/worker.js"
    );
  }

  #[test]
  fn reports_syntax_errors() {
    let error = load(&[("/app/src/worker.js", "const s = 'oops\n")]).unwrap_err();

    assert!(matches!(error, BundleError::Syntax { .. }));
  }

  #[test]
  fn reports_unreadable_modules() {
    let mut fs = MockFileSystem::new();
    fs.expect_read_to_string().returning(|_| {
      Err(std::io::Error::new(
        std::io::ErrorKind::PermissionDenied,
        "permission denied",
      ))
    });
    let fs: FileSystemRef = Arc::new(fs);

    let error = ModuleGraph::load(
      &fs,
      &LegacyBundlerOptions::default(),
      Path::new("/app"),
      Path::new("/app/src"),
      Path::new("/app/src/worker.js"),
    )
    .unwrap_err();

    match error {
      BundleError::Read { path, error } => {
        assert_eq!(path, PathBuf::from("/app/src/worker.js"));
        assert_eq!(error.kind(), std::io::ErrorKind::PermissionDenied);
      }
      other => panic!("expected a read error, got {other:?}"),
    }
  }
}
