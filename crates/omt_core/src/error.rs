use omt_sourcemap::SourceMapError;

use crate::edit_buffer::EditError;

#[derive(Debug, thiserror::Error)]
pub enum OmtError {
  /// The bundling pipeline failed, the worker stays unbuilt and is retried on the next request
  #[error("Failed to bundle worker {path}: {error:#}")]
  Build { path: String, error: anyhow::Error },

  #[error("{0} is not a registered module worker")]
  UnknownWorker(String),

  #[error("Invalid option: {0}")]
  InvalidOption(String),

  #[error(transparent)]
  Edit(#[from] EditError),

  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  SourceMap(#[from] SourceMapError),
}
