use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use omt_core::edit_buffer::EditBuffer;
use omt_core::paths::{url_dirname, url_to_file_path};
use omt_core::{BundleOutput, BundlePipeline, BundleRequest, OutputChunk};
use omt_filesystem::FileSystemRef;
use omt_sourcemap::compose;
use xxhash_rust::xxh3::Xxh3;

use crate::error::BundleError;
use crate::esm::{DependencyKind, RenderTarget};
use crate::module_graph::{Module, ModuleGraph, ModuleKind};
use crate::options::LegacyBundlerOptions;
use crate::packager::{package, RenderedModule};

/// Bundles a module worker's graph into classic scripts loaded with `importScripts`
#[derive(Debug)]
pub struct LegacyBundler {
  fs: FileSystemRef,
  options: LegacyBundlerOptions,
}

impl LegacyBundler {
  pub fn new(fs: FileSystemRef, options: LegacyBundlerOptions) -> Self {
    Self { fs, options }
  }
}

#[async_trait]
impl BundlePipeline for LegacyBundler {
  async fn bundle(&self, request: BundleRequest) -> anyhow::Result<BundleOutput> {
    let fs = Arc::clone(&self.fs);
    let options = self.options.clone();
    let output =
      tokio::task::spawn_blocking(move || bundle_worker(&fs, &options, &request)).await??;
    Ok(output)
  }
}

/// Runs the whole build for one worker entry
#[tracing::instrument(level = "info", skip_all, fields(worker = %request.requested_path))]
pub fn bundle_worker(
  fs: &FileSystemRef,
  options: &LegacyBundlerOptions,
  request: &BundleRequest,
) -> Result<BundleOutput, BundleError> {
  let map_dir = url_to_file_path(&request.root_dir, url_dirname(&request.requested_path));
  let graph = ModuleGraph::load(fs, options, &request.root_dir, &map_dir, &request.entry)?;

  let main = graph.static_order(0, &HashSet::new());
  let in_main: HashSet<usize> = main.iter().copied().collect();

  let mut chunks = Vec::new();
  let mut chunk_files: HashMap<usize, String> = HashMap::new();
  for target in graph.dynamic_targets() {
    if in_main.contains(&target) {
      continue;
    }
    let order = graph.static_order(target, &in_main);
    let file_name = chunk_file_name(&graph, target, &order);
    chunk_files.insert(target, file_name.clone());
    chunks.push((file_name, order));
  }

  let rendered = graph
    .modules
    .iter()
    .map(|module| render_module(module, &graph, &chunk_files, &map_dir))
    .collect::<Result<Vec<_>, BundleError>>()?;
  let select = |order: &[usize]| order.iter().map(|index| &rendered[*index]).collect::<Vec<_>>();

  let bundle = package(&select(&main), Some(graph.entry().id.as_str()), &map_dir)?;

  let mut output_chunks = Vec::with_capacity(chunks.len());
  for (file_name, order) in chunks {
    let chunk = package(&select(&order), None, &map_dir)?;
    output_chunks.push(OutputChunk::Chunk {
      file_name,
      code: chunk.code,
      map: Some(chunk.map),
    });
  }

  tracing::info!(
    "Bundled {} modules into {} and {} chunks",
    graph.modules.len(),
    request.requested_path,
    output_chunks.len()
  );

  Ok(BundleOutput {
    code: bundle.code,
    map: bundle.map,
    chunks: output_chunks,
    watch_files: graph.watch_files.into_iter().collect(),
  })
}

fn render_module(
  module: &Module,
  graph: &ModuleGraph,
  chunk_files: &HashMap<usize, String>,
  map_dir: &Path,
) -> Result<RenderedModule, BundleError> {
  let (code, mut map) = match module.kind {
    ModuleKind::Json => {
      let mut buffer = EditBuffer::new(module.code.as_str());
      buffer.overwrite(0..0, "module.exports = ")?;
      buffer.append(";")?;
      let map = buffer.generate_map(map_dir, &module.path, true)?;
      (buffer.to_string(), map)
    }
    ModuleKind::Script => {
      let targets: Vec<RenderTarget> = module
        .syntax
        .dependencies
        .iter()
        .zip(&module.dependencies)
        .map(|(dependency, index)| RenderTarget {
          id: graph.modules[*index].id.clone(),
          chunk: match dependency.kind {
            DependencyKind::Dynamic => chunk_files.get(index).cloned(),
            _ => None,
          },
        })
        .collect();

      let url_path = format!("/{}", module.id);
      let rendered = module
        .syntax
        .render(&module.path, &module.code, &targets, &url_path, map_dir)
        .map_err(|error| BundleError::Transform {
          path: module.path.clone(),
          error,
        })?;
      (rendered.code, rendered.map)
    }
  };

  if let Some(input_map) = &module.input_map {
    map = compose(&map, input_map)?;
  }

  Ok(RenderedModule {
    id: module.id.clone(),
    code,
    map,
  })
}

/// `<stem>-<hash>.js`, hashed over the ids and sources of the chunk's modules
fn chunk_file_name(graph: &ModuleGraph, target: usize, order: &[usize]) -> String {
  let mut hasher = Xxh3::new();
  for index in order {
    let module = &graph.modules[*index];
    hasher.update(module.id.as_bytes());
    hasher.update(module.code.as_bytes());
  }
  let hash = format!("{:016x}", hasher.digest());

  let stem = graph.modules[target]
    .path
    .file_stem()
    .map(|stem| stem.to_string_lossy().into_owned())
    .unwrap_or_else(|| String::from("chunk"));

  format!("{stem}-{}.js", &hash[..8])
}
