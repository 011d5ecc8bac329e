use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerType {
  #[default]
  Classic,
  Module,
}

/// The options object literal passed as the second argument of `new Worker(...)`
///
/// Parsed as JSON5 so that single quotes, unquoted keys and trailing commas
/// are accepted. Anything that is not a literal (identifiers, calls, spreads)
/// makes the whole object unparseable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct WorkerOptions {
  #[serde(rename = "type", default)]
  pub worker_type: WorkerType,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub credentials: Option<String>,
}

impl WorkerOptions {
  pub fn parse(source: &str) -> Result<Self, json5::Error> {
    json5::from_str(source)
  }

  pub fn is_module(&self) -> bool {
    self.worker_type == WorkerType::Module
  }

  /// Serializes the options as compact JSON, which is also a valid JS object literal
  pub fn to_literal(&self) -> Result<String, serde_json::Error> {
    serde_json::to_string(self)
  }
}
