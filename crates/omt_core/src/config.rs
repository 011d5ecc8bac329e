use std::fmt;
use std::path::Path;
use std::str::FromStr;

use omt_filesystem::FileSystemRef;
use serde::{Deserialize, Serialize};

use crate::error::OmtError;

/// When module workers are served as legacy bundles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LegacyMode {
  /// Decide per request from the user agent
  #[default]
  Auto,
  Always,
  Never,
}

impl FromStr for LegacyMode {
  type Err = OmtError;

  fn from_str(value: &str) -> Result<Self, Self::Err> {
    match value {
      "auto" => Ok(LegacyMode::Auto),
      "always" => Ok(LegacyMode::Always),
      "never" => Ok(LegacyMode::Never),
      other => Err(OmtError::InvalidOption(format!(
        "unknown legacy mode '{other}', expected auto, always or never"
      ))),
    }
  }
}

impl fmt::Display for LegacyMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      LegacyMode::Auto => "auto",
      LegacyMode::Always => "always",
      LegacyMode::Never => "never",
    })
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OmtOptions {
  pub legacy: LegacyMode,
  /// Whether worker bundles end with a `//# sourceMappingURL=` comment
  pub append_source_map_comment: bool,
}

impl Default for OmtOptions {
  fn default() -> Self {
    Self {
      legacy: LegacyMode::Auto,
      append_source_map_comment: true,
    }
  }
}

impl OmtOptions {
  pub fn from_json5_str(source: &str) -> Result<Self, OmtError> {
    json5::from_str(source).map_err(|error| OmtError::InvalidOption(error.to_string()))
  }

  pub fn from_json5_file(fs: &FileSystemRef, path: &Path) -> Result<Self, OmtError> {
    let source = fs.read_to_string(path)?;
    Self::from_json5_str(&source).map_err(|error| {
      OmtError::InvalidOption(format!("{}: {error}", path.display()))
    })
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use omt_filesystem::InMemoryFileSystem;
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn defaults() {
    assert_eq!(
      OmtOptions::from_json5_str("{}").unwrap(),
      OmtOptions {
        legacy: LegacyMode::Auto,
        append_source_map_comment: true,
      }
    );
  }

  #[test]
  fn parses_json5() {
    let options = OmtOptions::from_json5_str(
      "{\n  // serve bundles to everyone\n  legacy: 'always',\n  appendSourceMapComment: false,\n}",
    )
    .unwrap();

    assert_eq!(options.legacy, LegacyMode::Always);
    assert!(!options.append_source_map_comment);
  }

  #[test]
  fn rejects_unknown_modes() {
    assert!(OmtOptions::from_json5_str("{ legacy: 'sometimes' }").is_err());
    assert!("sometimes".parse::<LegacyMode>().is_err());
    assert_eq!("never".parse::<LegacyMode>().unwrap(), LegacyMode::Never);
  }

  #[test]
  fn loads_files() {
    let fs = InMemoryFileSystem::default();
    fs.write_file(Path::new("/app/omt.json5"), "{ legacy: 'never' }");
    let fs: FileSystemRef = Arc::new(fs);

    let options = OmtOptions::from_json5_file(&fs, Path::new("/app/omt.json5")).unwrap();
    assert_eq!(options.legacy, LegacyMode::Never);

    let missing = OmtOptions::from_json5_file(&fs, Path::new("/app/missing.json5"));
    assert!(matches!(missing, Err(OmtError::Io(_))));
  }
}
