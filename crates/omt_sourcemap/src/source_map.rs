use std::path::{Path, PathBuf};

use data_url::DataUrl;
use serde::{Deserialize, Serialize};

use crate::mapping::{Mapping, OriginalLocation};
use crate::mapping_line::MappingLine;
use crate::sourcemap_error::{SourceMapError, SourceMapErrorType};
use crate::utils::{make_relative_path, normalize_path};
use crate::vlq_utils::{decode_mappings, encode_mappings};

/// A version 3 source map
///
/// Absolute source paths are stored relative to `project_root`. All lines and
/// columns are 0 based.
#[derive(Clone, Debug)]
pub struct SourceMap {
  project_root: PathBuf,
  file: Option<String>,
  sources: Vec<String>,
  /// One entry per source, empty when the content is unknown
  sources_content: Vec<String>,
  names: Vec<String>,
  lines: Vec<MappingLine>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SourceMapJson {
  #[serde(default)]
  file: Option<String>,
  mappings: String,
  #[serde(default)]
  source_root: Option<String>,
  sources: Vec<Option<String>>,
  #[serde(default)]
  sources_content: Vec<Option<String>>,
  #[serde(default)]
  names: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceMapOutput<'a> {
  version: u8,
  #[serde(skip_serializing_if = "Option::is_none")]
  file: Option<&'a str>,
  mappings: String,
  sources: &'a [String],
  sources_content: &'a [String],
  names: &'a [String],
}

impl SourceMap {
  pub fn new(project_root: &Path) -> Self {
    Self {
      project_root: project_root.to_path_buf(),
      file: None,
      sources: Vec::new(),
      sources_content: Vec::new(),
      names: Vec::new(),
      lines: Vec::new(),
    }
  }

  pub fn set_file(&mut self, file: &str) {
    self.file = Some(file.to_string());
  }

  pub fn add_mapping(
    &mut self,
    generated_line: u32,
    generated_column: u32,
    original: Option<OriginalLocation>,
  ) {
    let line = generated_line as usize;
    if self.lines.len() <= line {
      self.lines.resize_with(line + 1, MappingLine::default);
    }
    self.lines[line].add_mapping(generated_column, original);
  }

  /// The last mapping on `generated_line` that starts at or before `generated_column`
  pub fn find_closest_mapping(&self, generated_line: u32, generated_column: u32) -> Option<Mapping> {
    let found = self
      .lines
      .get(generated_line as usize)?
      .find_closest_mapping(generated_column)?;

    Some(Mapping {
      generated_line,
      generated_column: found.generated_column,
      original: found.original,
    })
  }

  /// Every mapping ordered by generated position
  pub fn mappings(&self) -> impl Iterator<Item = Mapping> + '_ {
    self.lines.iter().enumerate().flat_map(|(line, mappings)| {
      mappings.mappings().iter().map(move |mapping| Mapping {
        generated_line: line as u32,
        generated_column: mapping.generated_column,
        original: mapping.original,
      })
    })
  }

  /// Index of `source`, added if the map does not name it yet
  pub fn add_source(&mut self, source: &str) -> u32 {
    let source = make_relative_path(&self.project_root, source);
    let index = match self.sources.iter().position(|existing| *existing == source) {
      Some(index) => index,
      None => {
        self.sources.push(source);
        self.sources_content.push(String::new());
        self.sources.len() - 1
      }
    };
    index as u32
  }

  pub fn get_source_index(&self, source: &str) -> Option<u32> {
    let source = make_relative_path(&self.project_root, source);
    self
      .sources
      .iter()
      .position(|existing| *existing == source)
      .map(|index| index as u32)
  }

  pub fn get_source(&self, index: u32) -> Result<&str, SourceMapError> {
    self
      .sources
      .get(index as usize)
      .map(String::as_str)
      .ok_or_else(|| SourceMapError::new(SourceMapErrorType::SourceOutOfRange))
  }

  pub fn get_sources(&self) -> &[String] {
    &self.sources
  }

  pub fn set_source_content(&mut self, index: usize, content: &str) -> Result<(), SourceMapError> {
    let slot = self
      .sources_content
      .get_mut(index)
      .ok_or_else(|| SourceMapError::new(SourceMapErrorType::SourceOutOfRange))?;
    *slot = content.to_string();
    Ok(())
  }

  pub fn get_source_content(&self, index: u32) -> Result<&str, SourceMapError> {
    self
      .sources_content
      .get(index as usize)
      .map(String::as_str)
      .ok_or_else(|| SourceMapError::new(SourceMapErrorType::SourceOutOfRange))
  }

  fn add_name(&mut self, name: &str) -> u32 {
    let index = match self.names.iter().position(|existing| existing == name) {
      Some(index) => index,
      None => {
        self.names.push(name.to_string());
        self.names.len() - 1
      }
    };
    index as u32
  }

  /// Adds the sources, their content and the names of `other`
  ///
  /// Returns the index each of `other`'s sources and names has in this map.
  fn merge_tables(&mut self, other: &SourceMap) -> (Vec<u32>, Vec<u32>) {
    let mut sources = Vec::with_capacity(other.sources.len());
    for (source, content) in other.sources.iter().zip(&other.sources_content) {
      let index = self.add_source(source);
      if !content.is_empty() {
        self.sources_content[index as usize] = content.clone();
      }
      sources.push(index);
    }

    let names = other.names.iter().map(|name| self.add_name(name)).collect();
    (sources, names)
  }

  /// Appends every mapping of `other`, moved down by `line_offset` lines
  pub fn add_sourcemap(&mut self, other: &SourceMap, line_offset: u32) -> Result<(), SourceMapError> {
    let (sources, names) = self.merge_tables(other);
    for mapping in other.mappings() {
      let original = mapping
        .original
        .map(|location| reindex(location, &sources, &names))
        .transpose()?;
      self.add_mapping(
        mapping.generated_line + line_offset,
        mapping.generated_column,
        original,
      );
    }
    Ok(())
  }

  /// Replaces every original location with the one `original` maps it to
  ///
  /// Locations `original` has no line for are kept. A segment of `original`
  /// without an original location unmaps the segment.
  pub(crate) fn trace_through(&mut self, original: &SourceMap) -> Result<(), SourceMapError> {
    let (sources, names) = self.merge_tables(original);

    for line in &mut self.lines {
      for slot in line.originals_mut() {
        let Some(location) = *slot else {
          continue;
        };
        let Some(found) =
          original.find_closest_mapping(location.original_line, location.original_column)
        else {
          continue;
        };

        *slot = match found.original {
          Some(traced) => {
            let mut traced = reindex(traced, &sources, &names)?;
            traced.name = traced.name.or(location.name);
            Some(traced)
          }
          None => None,
        };
      }
    }

    Ok(())
  }

  /// Rewrites sources written relative to `map_dir` to be relative to the project root
  ///
  /// Maps loaded from disk name their sources relative to the map file.
  pub fn relocate_sources(&mut self, map_dir: &Path) {
    for source in &mut self.sources {
      if source.contains("://") || Path::new(source.as_str()).is_absolute() {
        continue;
      }

      let absolute = normalize_path(&map_dir.join(source.as_str()));
      *source = make_relative_path(&self.project_root, &absolute.to_string_lossy());
    }
  }

  pub fn from_json(project_root: &Path, input: &str) -> Result<Self, SourceMapError> {
    let json: SourceMapJson = serde_json::from_str(input)?;
    let source_root = json
      .source_root
      .as_deref()
      .filter(|root| !root.is_empty())
      .map(|root| root.trim_end_matches('/'));

    let mut map = Self::new(project_root);
    map.file = json.file;

    let mut sources = Vec::with_capacity(json.sources.len());
    for (position, source) in json.sources.into_iter().enumerate() {
      let source = source.unwrap_or_default();
      let index = match source_root {
        Some(root) => map.add_source(&format!("{root}/{source}")),
        None => map.add_source(&source),
      };
      if let Some(Some(content)) = json.sources_content.get(position) {
        map.sources_content[index as usize] = content.clone();
      }
      sources.push(index);
    }
    let names: Vec<u32> = json.names.iter().map(|name| map.add_name(name)).collect();

    for mapping in decode_mappings(&json.mappings)? {
      let original = mapping
        .original
        .map(|location| reindex(location, &sources, &names))
        .transpose()?;
      map.add_mapping(mapping.generated_line, mapping.generated_column, original);
    }

    Ok(map)
  }

  pub fn to_json(&self) -> Result<String, SourceMapError> {
    let output = SourceMapOutput {
      version: 3,
      file: self.file.as_deref(),
      mappings: encode_mappings(&self.lines)?,
      sources: &self.sources,
      sources_content: &self.sources_content,
      names: &self.names,
    };

    Ok(serde_json::to_string(&output)?)
  }

  /// Reads a `data:application/json` url, base64 or percent encoded
  pub fn from_data_url(project_root: &Path, data_url: &str) -> Result<Self, SourceMapError> {
    let url = DataUrl::process(data_url)?;
    let mime = url.mime_type();
    if mime.type_ != "application" || mime.subtype != "json" {
      return Err(SourceMapError::new(SourceMapErrorType::DataUrlError));
    }

    let json = url
      .decode_to_vec()
      .ok()
      .and_then(|(bytes, _)| String::from_utf8(bytes).ok())
      .ok_or_else(|| SourceMapError::new(SourceMapErrorType::DataUrlError))?;

    Self::from_json(project_root, &json)
  }

  pub fn to_data_url(&self) -> Result<String, SourceMapError> {
    let json = self.to_json()?;
    Ok(format!(
      "data:application/json;charset=utf-8;base64,{}",
      base64_simd::STANDARD.encode_to_string(json.as_bytes())
    ))
  }
}

/// Points `location` at the given source and name indexes
fn reindex(
  location: OriginalLocation,
  sources: &[u32],
  names: &[u32],
) -> Result<OriginalLocation, SourceMapError> {
  let source = sources
    .get(location.source as usize)
    .copied()
    .ok_or_else(|| SourceMapError::new(SourceMapErrorType::SourceOutOfRange))?;
  let name = location
    .name
    .map(|name| {
      names
        .get(name as usize)
        .copied()
        .ok_or_else(|| SourceMapError::new(SourceMapErrorType::NameOutOfRange))
    })
    .transpose()?;

  Ok(OriginalLocation {
    source,
    name,
    ..location
  })
}
