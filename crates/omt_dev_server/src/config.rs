use std::path::Path;

use anyhow::Context;
use omt_bundler::LegacyBundlerOptions;
use omt_core::OmtOptions;
use omt_filesystem::FileSystemRef;
use serde::Deserialize;

/// Contents of the `--config` file
///
/// Plugin options sit at the top level, options of the default bundling
/// pipeline under `bundler`:
///
/// ```json5
/// {
///   legacy: "always",
///   bundler: { browserField: false },
/// }
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DevServerConfig {
  #[serde(flatten)]
  pub plugin: OmtOptions,
  pub bundler: LegacyBundlerOptions,
}

impl DevServerConfig {
  pub fn load(fs: &FileSystemRef, path: &Path) -> anyhow::Result<Self> {
    let source = fs
      .read_to_string(path)
      .with_context(|| format!("Failed to read config {}", path.display()))?;

    json5::from_str(&source).with_context(|| format!("Invalid config {}", path.display()))
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use omt_core::LegacyMode;
  use omt_filesystem::InMemoryFileSystem;
  use pretty_assertions::assert_eq;

  use super::*;

  fn load(source: &str) -> anyhow::Result<DevServerConfig> {
    let fs = InMemoryFileSystem::default();
    fs.write_file(Path::new("/app/omt.json5"), source);
    let fs: FileSystemRef = Arc::new(fs);
    DevServerConfig::load(&fs, Path::new("/app/omt.json5"))
  }

  #[test]
  fn reads_plugin_and_bundler_options() {
    let config = load(
      r#"{
        // comments are fine
        legacy: "always",
        appendSourceMapComment: false,
        bundler: { browserField: false, extensions: [".js"] },
      }"#,
    )
    .unwrap();

    assert_eq!(config.plugin.legacy, LegacyMode::Always);
    assert!(!config.plugin.append_source_map_comment);
    assert!(!config.bundler.browser_field);
    assert_eq!(config.bundler.extensions, vec![String::from(".js")]);
    assert!(config.bundler.extract_source_maps);
  }

  #[test]
  fn defaults_missing_sections() {
    let config = load("{}").unwrap();

    assert_eq!(config.plugin, OmtOptions::default());
    assert_eq!(config.bundler, LegacyBundlerOptions::default());
  }

  #[test]
  fn names_the_file_in_errors() {
    let error = load("{ legacy: 'sometimes' }").unwrap_err();
    assert!(error.to_string().contains("/app/omt.json5"));

    let fs: FileSystemRef = Arc::new(InMemoryFileSystem::default());
    let error = DevServerConfig::load(&fs, Path::new("/missing.json5")).unwrap_err();
    assert_eq!(error.to_string(), "Failed to read config /missing.json5");
  }
}
