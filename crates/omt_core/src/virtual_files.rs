use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
  Text(String),
  Binary(Vec<u8>),
}

impl FileContent {
  pub fn as_text(&self) -> Option<&str> {
    match self {
      FileContent::Text(text) => Some(text),
      FileContent::Binary(_) => None,
    }
  }
}

impl From<String> for FileContent {
  fn from(value: String) -> Self {
    FileContent::Text(value)
  }
}

impl From<Vec<u8>> for FileContent {
  fn from(value: Vec<u8>) -> Self {
    FileContent::Binary(value)
  }
}

/// A file that only exists in memory and is served at `path`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualFile {
  pub path: String,
  pub content: FileContent,
  /// Output of a legacy worker build, only served to clients that get legacy workers
  pub legacy_only: bool,
}

/// Generated artifacts keyed by url path, last write wins
#[derive(Debug, Default)]
pub struct VirtualFileStore {
  files: HashMap<String, VirtualFile>,
}

impl VirtualFileStore {
  pub fn insert(&mut self, path: impl Into<String>, content: impl Into<FileContent>, legacy_only: bool) {
    let path = path.into();
    self.files.insert(
      path.clone(),
      VirtualFile {
        path,
        content: content.into(),
        legacy_only,
      },
    );
  }

  pub fn get(&self, path: &str) -> Option<&VirtualFile> {
    self.files.get(path)
  }

  pub fn contains(&self, path: &str) -> bool {
    self.files.contains_key(path)
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn last_write_wins() {
    let mut store = VirtualFileStore::default();
    store.insert("/w.js.map", String::from("first"), true);
    store.insert("/w.js.map", String::from("second"), false);

    let file = store.get("/w.js.map").unwrap();
    assert_eq!(file.content, FileContent::Text(String::from("second")));
    assert!(!file.legacy_only);
    assert_eq!(store.len(), 1);
  }

  #[test]
  fn keeps_binary_assets() {
    let mut store = VirtualFileStore::default();
    store.insert("/logo.png", vec![0x89, 0x50], true);

    let file = store.get("/logo.png").unwrap();
    assert_eq!(file.content, FileContent::Binary(vec![0x89, 0x50]));
    assert_eq!(file.content.as_text(), None);
    assert!(!store.contains("/other.png"));
  }
}
