//! Segment management.
//!
//! A segment is an immutable, self-contained slice of the index. This
//! module defines the capability traits a segment reader exposes, the
//! writers for the per-segment data files, and the merge engine that
//! combines segments:
//!
//! - [`reader`]: the consumed `SegmentReader` / `PostingsCursor` traits
//! - [`memory`] / [`disk`]: in-memory and on-disk reader implementations
//! - [`fields`] / [`vectors`]: stored-document and term-vector files
//! - [`doc_map`]: old-to-new document id tables around deletions
//! - [`queue`]: the generic k-way merge queue
//! - [`abort`]: cooperative cancellation accounting
//! - [`merger`]: the segment merge engine itself
//! - [`compound`]: compound file packaging of merged output

pub mod abort;
pub mod compound;
pub mod disk;
pub mod doc_map;
pub mod fields;
pub mod memory;
pub mod merger;
pub mod queue;
pub mod reader;
pub mod vectors;

pub use abort::{AbortChecker, AbortFlag};
pub use disk::DiskSegmentReader;
pub use doc_map::DocIdMaps;
pub use memory::MemorySegment;
pub use merger::{MergeOutcome, SegmentMerger};
pub use reader::{PostingsCursor, SegmentReader};
