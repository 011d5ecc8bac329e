use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LegacyBundlerOptions {
  /// Prefer the `browser` entry point of packages over `module` and `main`
  pub browser_field: bool,
  /// Extensions tried in order when a specifier has none
  pub extensions: Vec<String>,
  /// Chain the maps referenced by `sourceMappingURL` comments of bundled modules
  pub extract_source_maps: bool,
}

impl Default for LegacyBundlerOptions {
  fn default() -> Self {
    Self {
      browser_field: true,
      extensions: [".js", ".mjs", ".cjs", ".json"]
        .into_iter()
        .map(String::from)
        .collect(),
      extract_source_maps: true,
    }
  }
}
