pub mod types;
pub mod text;
pub mod header;
pub mod record;
pub mod format;
pub mod subscription;
pub mod recovery;
pub mod dataset;
pub mod metadata;
pub mod io_stream;
pub mod ulog;
pub mod csv;

pub use dataset::{Dataset, DatasetError};
pub use format::{ResolvedField, TypeDefinition, TypeRegistry};
pub use header::{FileHeader, FlagBits, HeaderError};
pub use text::TextDecoding;
pub use types::{PrimitiveType, Value};
pub use ulog::{ReaderOptions, ULog, ULogError};
