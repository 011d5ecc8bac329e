use std::path::{Component, Path, PathBuf};

use path_slash::PathExt;

/// Turns an absolute source path into one relative to `project_root`
///
/// URLs and already relative paths are returned as they are.
pub fn make_relative_path(project_root: &Path, source: &str) -> String {
  if project_root.as_os_str().is_empty() || source.contains("://") {
    return source.to_string();
  }

  let source_path = Path::new(source);
  if !source_path.is_absolute() {
    return source.to_string();
  }

  match pathdiff::diff_paths(source_path, project_root) {
    Some(relative) => relative.to_slash_lossy(),
    None => source.to_string(),
  }
}

/// Resolves `.` and `..` components without touching the file system
pub fn normalize_path(path: &Path) -> PathBuf {
  let mut normalized = PathBuf::new();
  for component in path.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        normalized.pop();
      }
      component => normalized.push(component),
    }
  }
  normalized
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn relative_sources_are_untouched() {
    assert_eq!(make_relative_path(Path::new("/root"), "src/a.js"), "src/a.js");
    assert_eq!(make_relative_path(Path::new(""), "/abs/a.js"), "/abs/a.js");
    assert_eq!(
      make_relative_path(Path::new("/root"), "webpack://app/a.js"),
      "webpack://app/a.js"
    );
  }

  #[test]
  fn absolute_sources_become_root_relative() {
    assert_eq!(make_relative_path(Path::new("/root"), "/root/src/a.js"), "src/a.js");
    assert_eq!(make_relative_path(Path::new("/root/app"), "/root/lib/b.js"), "../lib/b.js");
  }
}
