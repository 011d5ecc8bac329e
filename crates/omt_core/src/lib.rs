//! Serves ES module workers to browsers that cannot start them.
//!
//! Served JavaScript is scanned for `new Worker(<path>, { type: "module" })`
//! constructions, which are rewritten to a canonical absolute path and
//! registered. Requests for a registered path from a client without module
//! worker support are answered with a lazily built, cached legacy bundle
//! produced by a [`BundlePipeline`].

pub mod browser;
pub mod config;
pub mod edit_buffer;
pub mod error;
pub mod lexer;
pub mod options;
pub mod paths;
pub mod pipeline;
pub mod plugin;
pub mod registry;
pub mod scanner;
pub mod virtual_files;
pub mod watcher;

pub use browser::RequestHeaders;
pub use config::{LegacyMode, OmtOptions};
pub use error::OmtError;
pub use options::{WorkerOptions, WorkerType};
pub use pipeline::{BundleOutput, BundlePipeline, BundleRequest, OutputChunk};
pub use plugin::{OmtPlugin, LEGACY_CACHE_KEY};
pub use registry::{WorkerEntry, WorkerRegistry};
pub use virtual_files::FileContent;
pub use watcher::{ChangeListener, FileWatcher, FileWatcherRef, InMemoryFileWatcher, ListenerId};
