use std::collections::HashMap;

use crate::config::LegacyMode;

/// Request headers with lower case names
pub type RequestHeaders = HashMap<String, String>;

/// User agent fragments of browsers known to support module workers
const MODULE_WORKER_BROWSERS: &[&str] = &["edg/", "chrome", "chromium"];

pub fn header<'a>(headers: &'a RequestHeaders, name: &str) -> Option<&'a str> {
  headers
    .iter()
    .find(|(key, _)| key.eq_ignore_ascii_case(name))
    .map(|(_, value)| value.as_str())
}

pub fn supports_module_workers(user_agent: &str) -> bool {
  let user_agent = user_agent.to_ascii_lowercase();
  MODULE_WORKER_BROWSERS
    .iter()
    .any(|fragment| user_agent.contains(fragment))
}

/// Whether the client sending `headers` gets legacy worker bundles
pub fn wants_legacy_workers(mode: LegacyMode, headers: &RequestHeaders) -> bool {
  match mode {
    LegacyMode::Always => true,
    LegacyMode::Never => false,
    LegacyMode::Auto => !header(headers, "user-agent").is_some_and(supports_module_workers),
  }
}
