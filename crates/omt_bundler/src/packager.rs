use std::path::Path;

use omt_sourcemap::{SourceMap, SourceMapError};

const PRELUDE: &str = include_str!("../prelude/prelude.js");

/// A module converted to the body of its `define()` factory
#[derive(Debug, Clone)]
pub struct RenderedModule {
  pub id: String,
  pub code: String,
  pub map: SourceMap,
}

#[derive(Debug)]
pub struct PackagedChunk {
  pub code: String,
  pub map: SourceMap,
}

fn quote(value: &str) -> String {
  serde_json::Value::from(value).to_string()
}

/// Joins `modules` into one classic script
///
/// The loader prelude comes first, then every module wrapped in a
/// `__omt.define()` call in the given order. When `entry` is set the script
/// ends by requiring it. Module maps are shifted to the line their body
/// starts on.
pub fn package(
  modules: &[&RenderedModule],
  entry: Option<&str>,
  map_dir: &Path,
) -> Result<PackagedChunk, SourceMapError> {
  let mut code = String::with_capacity(
    PRELUDE.len() + modules.iter().map(|module| module.code.len() + 64).sum::<usize>(),
  );
  let mut map = SourceMap::new(map_dir);

  code.push_str(PRELUDE.trim_end());
  code.push('\n');
  let mut line = code.matches('\n').count();

  for module in modules {
    code.push_str(&format!(
      "__omt.define({}, function (require, module, exports) {{\n",
      quote(&module.id)
    ));
    line += 1;

    map.add_sourcemap(&module.map, line as u32)?;
    code.push_str(&module.code);
    line += module.code.matches('\n').count();
    if !module.code.ends_with('\n') {
      code.push('\n');
      line += 1;
    }

    code.push_str("});\n");
    line += 1;
  }

  if let Some(entry) = entry {
    code.push_str(&format!("__omt.require({});\n", quote(entry)));
  }

  Ok(PackagedChunk { code, map })
}
