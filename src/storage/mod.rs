//! Storage abstraction layer.
//!
//! Provides a pluggable interface for index file storage with in-memory
//! and file-system backends, plus structured binary readers/writers used
//! by the segment codecs.

pub mod file;
pub mod memory;
pub mod structured;
pub mod traits;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use structured::{StructReader, StructWriter};
pub use traits::{Storage, StorageConfig, StorageError, StorageInput, StorageOutput};
