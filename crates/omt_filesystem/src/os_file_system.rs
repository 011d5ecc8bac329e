use std::path::Path;
use std::path::PathBuf;

use crate::FileSystem;

#[derive(Default, Debug)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
  fn canonicalize(&self, path: &Path) -> std::io::Result<PathBuf> {
    std::fs::canonicalize(path)
  }

  fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
    std::fs::read(path)
  }

  fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
    std::fs::read_to_string(path)
  }

  fn is_file(&self, path: &Path) -> bool {
    path.is_file()
  }

  fn is_dir(&self, path: &Path) -> bool {
    path.is_dir()
  }
}
