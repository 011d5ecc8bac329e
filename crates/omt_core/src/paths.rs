use std::path::{Component, Path, PathBuf};

/// Directory part of a root relative url path, `/` for files at the root
pub fn url_dirname(path: &str) -> &str {
  match path.rfind('/') {
    Some(0) | None => "/",
    Some(index) => &path[..index],
  }
}

pub fn url_basename(path: &str) -> &str {
  path.rsplit('/').next().unwrap_or(path)
}

pub fn is_relative_specifier(specifier: &str) -> bool {
  specifier.starts_with("./") || specifier.starts_with("../")
}

/// Collapses `.`, `..` and empty segments, always returning an absolute path
///
/// `..` never climbs above the root.
pub fn normalize_url_path(path: &str) -> String {
  let mut segments: Vec<&str> = Vec::new();
  for segment in path.split('/') {
    match segment {
      "" | "." => {}
      ".." => {
        segments.pop();
      }
      segment => segments.push(segment),
    }
  }
  format!("/{}", segments.join("/"))
}

/// Resolves a relative specifier against the directory of a served file
///
/// Returns `None` for anything that is not `./` or `../` relative.
pub fn resolve_url_path(served_path: &str, specifier: &str) -> Option<String> {
  if !is_relative_specifier(specifier) {
    return None;
  }

  Some(normalize_url_path(&format!(
    "{}/{}",
    url_dirname(served_path),
    specifier
  )))
}

/// Joins forward slash separated `relative` onto `base`, resolving `.` and `..` lexically
pub fn join_normalized(base: &Path, relative: &str) -> PathBuf {
  let mut result = PathBuf::new();
  let joined = base.join(relative.trim_start_matches('/'));
  for component in joined.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        result.pop();
      }
      component => result.push(component),
    }
  }
  result
}

/// Absolute file path of a root relative url path
///
/// The url path is normalized first, so the result never leaves `root_dir`.
pub fn url_to_file_path(root_dir: &Path, url_path: &str) -> PathBuf {
  join_normalized(root_dir, &normalize_url_path(url_path))
}
