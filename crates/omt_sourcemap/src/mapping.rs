/// A position in one of the map's sources, all values 0 based
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OriginalLocation {
  pub original_line: u32,
  pub original_column: u32,
  pub source: u32,
  pub name: Option<u32>,
}

impl OriginalLocation {
  pub fn new(original_line: u32, original_column: u32, source: u32, name: Option<u32>) -> Self {
    Self {
      original_line,
      original_column,
      source,
      name,
    }
  }
}

/// A single segment of a source map
///
/// A mapping without an `original` location marks generated code that has no
/// counterpart in any source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
  pub generated_line: u32,
  pub generated_column: u32,
  pub original: Option<OriginalLocation>,
}
