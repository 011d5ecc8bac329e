use std::collections::HashMap;

use parking_lot::Mutex;

/// Served JavaScript bodies keyed by URL path and cache partition
///
/// The partition is the plugin's cache key override, `None` for the default
/// partition.
#[derive(Debug, Default)]
pub struct ResponseCache {
  bodies: Mutex<HashMap<String, HashMap<Option<String>, String>>>,
}

impl ResponseCache {
  pub fn get(&self, path: &str, partition: Option<&str>) -> Option<String> {
    self
      .bodies
      .lock()
      .get(path)?
      .get(&partition.map(str::to_string))
      .cloned()
  }

  pub fn insert(&self, path: &str, partition: Option<String>, body: String) {
    self
      .bodies
      .lock()
      .entry(path.to_string())
      .or_default()
      .insert(partition, body);
  }

  /// Drops the bodies of every partition of `path`
  pub fn invalidate(&self, path: &str) -> bool {
    self.bodies.lock().remove(path).is_some()
  }
}
