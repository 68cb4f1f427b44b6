//! Postings codec interface.
//!
//! The merge engine does not know how postings are laid out on disk; it
//! feeds merged postings into a [`PostingsSink`] in a strict nesting order
//! and lets the codec do the encoding. [`standard`] provides the default
//! term-dictionary + postings-file codec.

pub mod standard;

pub use standard::{StandardPostingsReader, StandardPostingsWriter};

use crate::error::Result;
use crate::schema::FieldDescriptor;

/// Receives postings in strict field/term/doc nesting order.
///
/// The required protocol is:
///
/// ```text
/// (begin_field
///     (begin_term (add_doc (add_position)* finish_doc)* finish_term)*
///  finish_field)*
/// finish
/// ```
///
/// Fields arrive in ascending name order and terms in strictly ascending
/// byte order with no duplicates; documents arrive in ascending remapped
/// id order. Calling out of order is a programming-contract violation, not
/// a recoverable runtime condition, and implementations are free to panic.
pub trait PostingsSink {
    /// Open a field. Only indexed fields are ever opened.
    fn begin_field(&mut self, field: &FieldDescriptor) -> Result<()>;

    /// Open a term within the current field.
    fn begin_term(&mut self, term: &[u8]) -> Result<()>;

    /// Add one document to the current term's postings.
    fn add_doc(&mut self, doc: u32, freq: u32) -> Result<()>;

    /// Add one position (with optional payload, empty slice = none) to the
    /// current document. Never called for fields that omit positions.
    fn add_position(&mut self, position: u32, payload: &[u8]) -> Result<()>;

    /// Close the current document.
    fn finish_doc(&mut self) -> Result<()>;

    /// Close the current term. `doc_freq` is the number of documents added.
    fn finish_term(&mut self, doc_freq: u32) -> Result<()>;

    /// Close the current field.
    fn finish_field(&mut self) -> Result<()>;

    /// Close the sink, flushing all output files.
    fn finish(&mut self) -> Result<()>;

    /// Names of the files this sink writes.
    fn files(&self) -> Vec<String>;
}
