//! Span replacement over an immutable original text.
//!
//! Edits are recorded against offsets of the original text and only applied
//! when the result is rendered, so every edit can be expressed with original
//! offsets no matter how many edits precede it. The buffer also knows how to
//! describe the rewrite as a source map and as an offset table.

use std::fmt;
use std::ops::Range;
use std::path::Path;

use omt_sourcemap::{OriginalLocation, SourceMap, SourceMapError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditError {
  #[error("edit {start}..{end} overlaps an existing edit")]
  Overlap { start: usize, end: usize },
  #[error("edit {start}..{end} is not a valid range of the {len} byte source")]
  OutOfBounds { start: usize, end: usize, len: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Edit {
  range: Range<usize>,
  content: String,
}

impl Edit {
  fn sort_key(&self) -> (usize, bool) {
    (self.range.start, !self.range.is_empty())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditSpan {
  pub original: Range<usize>,
  pub rewritten: Range<usize>,
}

/// Byte offsets of every edit in both the original and the rewritten text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditMap {
  spans: Vec<EditSpan>,
}

impl EditMap {
  pub fn spans(&self) -> &[EditSpan] {
    &self.spans
  }

  /// Offset in the rewritten text of an offset in the original text
  ///
  /// Offsets inside a replaced span resolve to the start of its replacement.
  pub fn rewritten_offset(&self, offset: usize) -> usize {
    let mut delta: isize = 0;
    for span in &self.spans {
      if offset < span.original.start {
        break;
      }
      if offset < span.original.end {
        return span.rewritten.start;
      }
      delta = span.rewritten.end as isize - span.original.end as isize;
    }
    (offset as isize + delta) as usize
  }
}

#[derive(Debug, Clone, Copy, Default)]
struct Position {
  line: u32,
  column: u32,
}

impl Position {
  fn advance(&mut self, text: &str) {
    for ch in text.chars() {
      if ch == '\n' {
        self.line += 1;
        self.column = 0;
      } else {
        self.column += ch.len_utf16() as u32;
      }
    }
  }
}

#[derive(Debug, Clone)]
pub struct EditBuffer {
  original: String,
  edits: Vec<Edit>,
}

impl EditBuffer {
  pub fn new(original: impl Into<String>) -> Self {
    Self {
      original: original.into(),
      edits: Vec::new(),
    }
  }

  pub fn original(&self) -> &str {
    &self.original
  }

  /// Replaces `range` of the original text with `content`
  ///
  /// An empty range inserts. Several inserts at one offset render in the
  /// order they were made, before a replacement starting at that offset.
  pub fn overwrite(
    &mut self,
    range: Range<usize>,
    content: impl Into<String>,
  ) -> Result<(), EditError> {
    let len = self.original.len();
    if range.start > range.end
      || range.end > len
      || !self.original.is_char_boundary(range.start)
      || !self.original.is_char_boundary(range.end)
    {
      return Err(EditError::OutOfBounds {
        start: range.start,
        end: range.end,
        len,
      });
    }

    let overlaps = self.edits.iter().any(|edit| {
      if range.is_empty() {
        edit.range.start < range.start && range.start < edit.range.end
      } else if edit.range.is_empty() {
        range.start < edit.range.start && edit.range.start < range.end
      } else {
        range.start < edit.range.end && edit.range.start < range.end
      }
    });
    if overlaps {
      return Err(EditError::Overlap {
        start: range.start,
        end: range.end,
      });
    }

    let edit = Edit {
      range,
      content: content.into(),
    };
    let index = self
      .edits
      .partition_point(|existing| existing.sort_key() <= edit.sort_key());
    self.edits.insert(index, edit);

    Ok(())
  }

  pub fn append(&mut self, content: impl Into<String>) -> Result<(), EditError> {
    let len = self.original.len();
    self.overwrite(len..len, content)
  }

  pub fn edit_map(&self) -> EditMap {
    let mut spans = Vec::with_capacity(self.edits.len());
    let mut delta: isize = 0;
    for edit in &self.edits {
      let start = (edit.range.start as isize + delta) as usize;
      let end = start + edit.content.len();
      spans.push(EditSpan {
        original: edit.range.clone(),
        rewritten: start..end,
      });
      delta += edit.content.len() as isize - edit.range.len() as isize;
    }
    EditMap { spans }
  }

  /// A high resolution map from the rewritten text back onto `source`
  ///
  /// Every character of unchanged text gets its own segment. A replacement
  /// gets one segment at its start pointing at the start of the replaced
  /// text. Columns are counted in UTF-16 code units.
  pub fn generate_map(
    &self,
    project_root: &Path,
    source: &Path,
    include_content: bool,
  ) -> Result<SourceMap, SourceMapError> {
    let mut map = SourceMap::new(project_root);
    let source_index = map.add_source(&source.to_string_lossy());
    if include_content {
      map.set_source_content(source_index as usize, &self.original)?;
    }

    let mut generated = Position::default();
    let mut original = Position::default();
    let mut cursor = 0;

    for edit in &self.edits {
      map_unchanged(
        &mut map,
        source_index,
        &self.original[cursor..edit.range.start],
        &mut generated,
        &mut original,
      );

      if !edit.content.is_empty() {
        map.add_mapping(
          generated.line,
          generated.column,
          Some(OriginalLocation::new(
            original.line,
            original.column,
            source_index,
            None,
          )),
        );
      }

      generated.advance(&edit.content);
      original.advance(&self.original[edit.range.clone()]);
      cursor = edit.range.end;
    }

    map_unchanged(
      &mut map,
      source_index,
      &self.original[cursor..],
      &mut generated,
      &mut original,
    );

    Ok(map)
  }
}

fn map_unchanged(
  map: &mut SourceMap,
  source_index: u32,
  text: &str,
  generated: &mut Position,
  original: &mut Position,
) {
  for ch in text.chars() {
    if ch == '\n' {
      generated.advance("\n");
      original.advance("\n");
      continue;
    }

    map.add_mapping(
      generated.line,
      generated.column,
      Some(OriginalLocation::new(
        original.line,
        original.column,
        source_index,
        None,
      )),
    );

    let width = ch.len_utf16() as u32;
    generated.column += width;
    original.column += width;
  }
}

impl fmt::Display for EditBuffer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut cursor = 0;
    for edit in &self.edits {
      f.write_str(&self.original[cursor..edit.range.start])?;
      f.write_str(&edit.content)?;
      cursor = edit.range.end;
    }
    f.write_str(&self.original[cursor..])
  }
}
