//! The segment reader capability interface consumed by the merge engine.
//!
//! The merge engine never depends on a concrete segment representation;
//! it only needs the capabilities below. Backends that can re-emit their
//! on-disk records without decoding expose the optional raw bulk-copy
//! capability; everything else falls back to decode and re-encode.

use crate::document::{Document, TermVector};
use crate::error::Result;
use crate::schema::FieldSchema;

/// Read-only access to one immutable segment.
pub trait SegmentReader: Send + Sync {
    /// One past the highest document id ever assigned in this segment,
    /// including deleted documents.
    fn max_doc(&self) -> u32;

    /// Number of live (not deleted) documents.
    fn num_docs(&self) -> u32;

    /// Whether any document is marked deleted.
    fn has_deletions(&self) -> bool;

    /// Whether `doc` is marked deleted.
    fn is_deleted(&self, doc: u32) -> bool;

    /// The segment's field schema.
    fn schema(&self) -> &FieldSchema;

    /// Decode the stored fields of `doc`.
    fn document(&self, doc: u32) -> Result<Document>;

    /// Raw stored-record bulk access, the fast-copy capability.
    ///
    /// When supported, returns the concatenated on-disk record bytes for
    /// documents `start..start + count` and fills `lengths[..count]` with
    /// the per-document record lengths. Returns `Ok(None)` when the backend
    /// cannot serve raw bytes, in which case callers must use
    /// [`SegmentReader::document`].
    fn raw_documents(&self, start: u32, count: u32, lengths: &mut [u32]) -> Result<Option<Vec<u8>>>;

    /// Decode the term vectors of `doc`, one per vector-bearing field.
    fn term_vectors(&self, doc: u32) -> Result<Vec<TermVector>>;

    /// Raw term-vector bulk access, mirroring [`SegmentReader::raw_documents`].
    fn raw_vectors(&self, start: u32, count: u32, lengths: &mut [u32]) -> Result<Option<Vec<u8>>>;

    /// Copy the norm byte of every document (deleted included) for `field`
    /// into `buffer`, resizing it to `max_doc` first. Returns false when the
    /// segment holds no norms for that field.
    fn norms(&self, field: &str, buffer: &mut Vec<u8>) -> Result<bool>;

    /// Open a postings cursor over this segment's term dictionaries.
    fn postings(&self) -> Result<Box<dyn PostingsCursor + '_>>;
}

/// Deletion-aware cursor over a segment's postings, field by field,
/// term by term, document by document.
///
/// A fresh cursor is positioned before the first field; each level is
/// entered by the corresponding `advance` call. Documents yielded by
/// [`PostingsCursor::advance_doc`] are already filtered by the segment's
/// deletion predicate and their ids are in the segment's own id space.
pub trait PostingsCursor {
    /// Advance to the next field. Returns false when no fields remain.
    fn advance_field(&mut self) -> Result<bool>;

    /// Name of the current field.
    fn field(&self) -> &str;

    /// Advance to the next term of the current field. Returns false when
    /// the field's terms are exhausted.
    fn advance_term(&mut self) -> Result<bool>;

    /// Bytes of the current term.
    fn term(&self) -> &[u8];

    /// Next live (doc, freq) entry of the current term, or None when its
    /// postings are exhausted.
    fn advance_doc(&mut self) -> Result<Option<(u32, u32)>>;

    /// Next position of the current document. The payload, if any, is
    /// copied into `payload` (grown on demand, never shrunk); the returned
    /// length is 0 when there is no payload.
    fn next_position(&mut self, payload: &mut Vec<u8>) -> Result<(u32, usize)>;
}
