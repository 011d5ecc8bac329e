use std::path::{Path, PathBuf};

use omt_filesystem::FileSystemRef;

use crate::utils::normalize_path;
use crate::{SourceMap, SourceMapError};

/// Loads the map a `sourceMappingURL` comment of `file_path` points at
///
/// `data:` urls are decoded in place, anything else is read relative to the
/// directory of `file_path`.
pub fn load_sourcemap_url(
  fs: &FileSystemRef,
  project_root: &Path,
  file_path: &Path,
  url: &str,
) -> Result<SourceMap, SourceMapError> {
  match sourcemap_file_path(file_path, url) {
    None => SourceMap::from_data_url(project_root, url),
    Some(source_map_path) => {
      let json = fs.read_to_string(&source_map_path)?;
      SourceMap::from_json(project_root, &json)
    }
  }
}

/// File a `sourceMappingURL` of `file_path` refers to, `None` for `data:` urls
pub fn sourcemap_file_path(file_path: &Path, url: &str) -> Option<PathBuf> {
  let path = match url.split_once(':') {
    Some(("data", _)) => return None,
    Some(("file", _)) => PathBuf::from(url.replacen("file://", "", 1)),
    _ => PathBuf::from(url),
  };

  if path.is_absolute() {
    return Some(normalize_path(&path));
  }

  let dir = file_path.parent().unwrap_or(Path::new(""));
  Some(normalize_path(&dir.join(path)))
}
