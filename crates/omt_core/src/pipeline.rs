use std::fmt::Debug;
use std::path::PathBuf;

use async_trait::async_trait;
use omt_sourcemap::SourceMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleRequest {
  /// Absolute path of the worker's entry module
  pub entry: PathBuf,
  /// Absolute directory of the file that constructed the worker
  pub base_dir: PathBuf,
  pub root_dir: PathBuf,
  /// Url path the bundle is served at
  pub requested_path: String,
}

#[derive(Debug, Clone)]
pub enum OutputChunk {
  /// Additional code loaded by the main bundle, served next to it
  Chunk {
    file_name: String,
    code: String,
    map: Option<SourceMap>,
  },
  Asset {
    file_name: String,
    source: Vec<u8>,
  },
}

impl OutputChunk {
  pub fn file_name(&self) -> &str {
    match self {
      OutputChunk::Chunk { file_name, .. } => file_name,
      OutputChunk::Asset { file_name, .. } => file_name,
    }
  }
}

#[derive(Debug, Clone)]
pub struct BundleOutput {
  pub code: String,
  pub map: SourceMap,
  pub chunks: Vec<OutputChunk>,
  /// Every file read while bundling
  pub watch_files: Vec<PathBuf>,
}

/// Bundles a module worker into a script a classic worker can run
#[async_trait]
pub trait BundlePipeline: Debug + Send + Sync {
  async fn bundle(&self, request: BundleRequest) -> anyhow::Result<BundleOutput>;
}
