mod compose;
mod find_source_map_url;
mod load_source_map_url;
mod mapping;
mod mapping_line;
mod source_map;
mod sourcemap_error;
mod utils;
mod vlq_utils;

pub use compose::compose;
pub use find_source_map_url::{find_sourcemap_url, SourceMapUrlMatch};
pub use load_source_map_url::{load_sourcemap_url, sourcemap_file_path};
pub use mapping::{Mapping, OriginalLocation};
pub use source_map::SourceMap;
pub use sourcemap_error::{SourceMapError, SourceMapErrorType};
