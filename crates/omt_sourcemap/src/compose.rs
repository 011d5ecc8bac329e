use crate::{SourceMap, SourceMapError};

/// Composes a two stage map chain into one map
///
/// `rewrite` maps the rewritten file onto the requested file and `original`
/// maps the requested file onto the authored sources. The result maps the
/// rewritten file onto the authored sources. Positions `original` knows
/// nothing about keep resolving to the requested file.
pub fn compose(rewrite: &SourceMap, original: &SourceMap) -> Result<SourceMap, SourceMapError> {
  let mut composed = rewrite.clone();
  composed.trace_through(original)?;
  Ok(composed)
}
