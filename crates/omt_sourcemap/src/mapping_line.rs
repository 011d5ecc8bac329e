use crate::mapping::OriginalLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineMapping {
  pub generated_column: u32,
  pub original: Option<OriginalLocation>,
}

/// Mappings that start on one generated line, ordered by generated column
#[derive(Debug, Clone, Default)]
pub struct MappingLine {
  mappings: Vec<LineMapping>,
}

impl MappingLine {
  /// Mappings at the same column keep the order they were added in
  pub fn add_mapping(&mut self, generated_column: u32, original: Option<OriginalLocation>) {
    let mapping = LineMapping {
      generated_column,
      original,
    };

    match self.mappings.last() {
      Some(last) if last.generated_column > generated_column => {
        let index = self
          .mappings
          .partition_point(|existing| existing.generated_column <= generated_column);
        self.mappings.insert(index, mapping);
      }
      _ => self.mappings.push(mapping),
    }
  }

  pub fn mappings(&self) -> &[LineMapping] {
    &self.mappings
  }

  /// Columns stay untouched, so the order holds
  pub fn originals_mut(&mut self) -> impl Iterator<Item = &mut Option<OriginalLocation>> {
    self.mappings.iter_mut().map(|mapping| &mut mapping.original)
  }

  /// The last mapping that starts at or before `generated_column`
  pub fn find_closest_mapping(&self, generated_column: u32) -> Option<LineMapping> {
    let end = self
      .mappings
      .partition_point(|mapping| mapping.generated_column <= generated_column);
    end.checked_sub(1).map(|index| self.mappings[index])
  }
}
