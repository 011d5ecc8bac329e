use std::path::PathBuf;

use omt_core::edit_buffer::EditError;
use omt_sourcemap::SourceMapError;

use crate::esm::{ParseError, TransformError};

#[derive(Debug, thiserror::Error)]
pub enum BundleError {
  #[error("Failed to resolve '{specifier}' from {}", .from.display())]
  Unresolved { specifier: String, from: PathBuf },

  #[error("Failed to read {}: {error}", .path.display())]
  Read {
    path: PathBuf,
    error: std::io::Error,
  },

  #[error("Failed to parse {}: {error}", .path.display())]
  Syntax { path: PathBuf, error: ParseError },

  #[error("Failed to transform {}: {error}", .path.display())]
  Transform {
    path: PathBuf,
    error: TransformError,
  },

  #[error(transparent)]
  Edit(#[from] EditError),

  #[error(transparent)]
  SourceMap(#[from] SourceMapError),
}
