//! # Pilum
//!
//! A segment-based inverted index storage engine for Rust.
//!
//! The heart of the crate is the segment merger: it combines any number of
//! immutable, independently built index segments into a single new segment,
//! dropping documents marked deleted in the inputs and remapping document
//! ids into a fresh contiguous space.
//!
//! ## Features
//!
//! - Pure Rust implementation
//! - Pluggable storage backends
//! - Bulk byte-copy fast path for format-compatible segments
//! - Cooperative cancellation of long-running merges
//! - Compound file packaging for merged output

pub mod codec;
pub mod document;
pub mod error;
pub mod schema;
pub mod segment;
pub mod storage;
pub mod util;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
