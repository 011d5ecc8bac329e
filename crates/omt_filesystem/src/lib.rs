use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

/// In-memory file-system for tests
pub mod in_memory_file_system;

/// File-system implementation using std::fs
pub mod os_file_system;

pub use in_memory_file_system::InMemoryFileSystem;
pub use os_file_system::OsFileSystem;

/// FileSystem abstraction instance
///
/// This should be `OsFileSystem` for non-testing environments and `InMemoryFileSystem` for testing.
pub type FileSystemRef = Arc<dyn FileSystem + Send + Sync>;

/// Trait abstracting the file-system reads the plugin and the bundler need
#[mockall::automock]
pub trait FileSystem: std::fmt::Debug {
  fn canonicalize(&self, path: &Path) -> std::io::Result<PathBuf>;
  fn read(&self, path: &Path) -> std::io::Result<Vec<u8>>;
  fn read_to_string(&self, path: &Path) -> std::io::Result<String>;
  fn is_file(&self, path: &Path) -> bool;
  fn is_dir(&self, path: &Path) -> bool;
}
