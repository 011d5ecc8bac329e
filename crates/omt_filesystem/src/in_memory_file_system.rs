use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};

use parking_lot::RwLock;

use crate::FileSystem;

/// Files kept in a sorted map; a directory exists while any file lives below it
///
/// Paths are folded to absolute form before every lookup, so `/app/src/../a.js`
/// and `/app/a.js` name the same file. Relative paths resolve against `/`.
#[derive(Debug, Default)]
pub struct InMemoryFileSystem {
  files: RwLock<BTreeMap<PathBuf, Vec<u8>>>,
}

impl InMemoryFileSystem {
  pub fn write_file(&self, path: &Path, contents: impl Into<Vec<u8>>) {
    self.files.write().insert(absolute(path), contents.into());
  }

  fn not_found(path: &Path) -> io::Error {
    io::Error::new(
      io::ErrorKind::NotFound,
      format!("No such file: {}", path.display()),
    )
  }
}

fn absolute(path: &Path) -> PathBuf {
  let mut folded = PathBuf::from("/");
  for component in path.components() {
    match component {
      Component::ParentDir => {
        folded.pop();
      }
      Component::Normal(name) => folded.push(name),
      Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
    }
  }
  folded
}

impl FileSystem for InMemoryFileSystem {
  fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
    let path = absolute(path);
    if self.is_file(&path) || self.is_dir(&path) {
      Ok(path)
    } else {
      Err(Self::not_found(&path))
    }
  }

  fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
    let path = absolute(path);
    if let Some(contents) = self.files.read().get(&path) {
      return Ok(contents.clone());
    }

    if self.is_dir(&path) {
      return Err(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("{} is a directory", path.display()),
      ));
    }
    Err(Self::not_found(&path))
  }

  fn read_to_string(&self, path: &Path) -> io::Result<String> {
    String::from_utf8(self.read(path)?)
      .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))
  }

  fn is_file(&self, path: &Path) -> bool {
    self.files.read().contains_key(&absolute(path))
  }

  fn is_dir(&self, path: &Path) -> bool {
    let dir = absolute(path);
    let files = self.files.read();
    files
      .range(dir.clone()..)
      .next()
      .is_some_and(|(file, _)| file != &dir && file.starts_with(&dir))
  }
}
