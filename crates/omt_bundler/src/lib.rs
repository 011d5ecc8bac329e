//! The default [`omt_core::BundlePipeline`].
//!
//! Loads a worker's module graph from the file system, converts ES module
//! syntax to a small `define()`/`require()` module format and packages the
//! result into classic scripts a browser without module worker support can
//! start. Modules only reached through `import()` go to separate chunks.

pub mod error;
pub mod esm;
mod legacy_bundler;
pub mod module_graph;
pub mod options;
pub mod packager;
pub mod resolver;

pub use error::BundleError;
pub use legacy_bundler::{bundle_worker, LegacyBundler};
pub use options::LegacyBundlerOptions;
