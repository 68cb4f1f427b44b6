//! A heap-resident segment, used as merge input and in tests.
//!
//! Everything a segment can hold (stored documents, term vectors, norms,
//! postings, deletions) lives in plain collections here, which makes it
//! easy to stage exact merge scenarios. The raw bulk-copy capability is
//! served by encoding records on the fly, so raw bytes always equal what
//! re-encoding would produce; it can be switched off to force the slow
//! path.

use std::collections::BTreeMap;

use ahash::AHashMap;
use bit_vec::BitVec;

use crate::document::{Document, TermVector};
use crate::error::Result;
use crate::schema::FieldSchema;
use crate::segment::fields::encode_document;
use crate::segment::merger::DEFAULT_NORM;
use crate::segment::reader::{PostingsCursor, SegmentReader};
use crate::segment::vectors::encode_vectors;

/// One posting of one term: a document with its positions and payloads.
#[derive(Debug, Clone, Default)]
pub struct Posting {
    /// Segment-local document id.
    pub doc: u32,

    /// Occurrence count within the document.
    pub freq: u32,

    /// (position, payload) pairs; the payload is empty when absent.
    pub positions: Vec<(u32, Vec<u8>)>,
}

type TermMap = BTreeMap<Vec<u8>, Vec<Posting>>;

/// A mutable, heap-resident segment.
pub struct MemorySegment {
    schema: FieldSchema,
    docs: Vec<Document>,
    vectors: Vec<Vec<TermVector>>,
    norms: AHashMap<String, Vec<u8>>,
    postings: BTreeMap<String, TermMap>,
    deletions: BitVec,
    raw_capable: bool,
}

impl Default for MemorySegment {
    fn default() -> Self {
        MemorySegment::new()
    }
}

impl MemorySegment {
    /// Create an empty segment with an empty schema.
    pub fn new() -> Self {
        MemorySegment {
            schema: FieldSchema::new(),
            docs: Vec::new(),
            vectors: Vec::new(),
            norms: AHashMap::new(),
            postings: BTreeMap::new(),
            deletions: BitVec::new(),
            raw_capable: true,
        }
    }

    /// Mutable access to the segment's schema, for staging fields.
    pub fn schema_mut(&mut self) -> &mut FieldSchema {
        &mut self.schema
    }

    /// Append a stored document, returning its id.
    pub fn add_document(&mut self, doc: Document) -> u32 {
        let id = self.docs.len() as u32;
        self.docs.push(doc);
        self.vectors.push(Vec::new());
        self.deletions.push(false);
        id
    }

    /// Append a document with no stored fields, returning its id.
    pub fn add_empty_document(&mut self) -> u32 {
        self.add_document(Document::new())
    }

    /// Replace the term vectors of `doc`.
    pub fn set_vectors(&mut self, doc: u32, vectors: Vec<TermVector>) {
        self.vectors[doc as usize] = vectors;
    }

    /// Set the norm byte of `doc` for `field`. Documents never given a
    /// norm read back as [`DEFAULT_NORM`].
    pub fn set_norm(&mut self, field: &str, doc: u32, value: u8) {
        let bytes = self.norms.entry(field.to_string()).or_default();
        if bytes.len() <= doc as usize {
            bytes.resize(doc as usize + 1, DEFAULT_NORM);
        }
        bytes[doc as usize] = value;
    }

    /// Record that `doc` contains `term` in `field` at the given positions.
    pub fn add_posting(&mut self, field: &str, term: &[u8], doc: u32, positions: &[u32]) {
        self.add_posting_with_payloads(
            field,
            term,
            doc,
            &positions.iter().map(|&p| (p, Vec::new())).collect::<Vec<_>>(),
        );
    }

    /// Like [`MemorySegment::add_posting`], with a payload per position.
    pub fn add_posting_with_payloads(
        &mut self,
        field: &str,
        term: &[u8],
        doc: u32,
        positions: &[(u32, Vec<u8>)],
    ) {
        let terms = self.postings.entry(field.to_string()).or_default();
        let postings = terms.entry(term.to_vec()).or_default();
        if let Some(last) = postings.last_mut() {
            if last.doc == doc {
                last.positions.extend_from_slice(positions);
                last.freq = last.positions.len().max(1) as u32;
                return;
            }
        }
        postings.push(Posting {
            doc,
            freq: positions.len().max(1) as u32,
            positions: positions.to_vec(),
        });
    }

    /// Mark `doc` deleted.
    pub fn delete_document(&mut self, doc: u32) {
        self.deletions.set(doc as usize, true);
    }

    /// Enable or disable the raw bulk-copy capability.
    pub fn set_raw_capable(&mut self, capable: bool) {
        self.raw_capable = capable;
    }

    fn raw_run<F>(&self, start: u32, count: u32, lengths: &mut [u32], encode: F) -> Result<Option<Vec<u8>>>
    where
        F: Fn(&Self, u32) -> Result<Vec<u8>>,
    {
        if !self.raw_capable {
            return Ok(None);
        }
        let mut bytes = Vec::new();
        for i in 0..count {
            let record = encode(self, start + i)?;
            lengths[i as usize] = record.len() as u32;
            bytes.extend_from_slice(&record);
        }
        Ok(Some(bytes))
    }
}

impl SegmentReader for MemorySegment {
    fn max_doc(&self) -> u32 {
        self.docs.len() as u32
    }

    fn num_docs(&self) -> u32 {
        self.max_doc() - self.deletions.iter().filter(|&d| d).count() as u32
    }

    fn has_deletions(&self) -> bool {
        self.deletions.any()
    }

    fn is_deleted(&self, doc: u32) -> bool {
        self.deletions.get(doc as usize).unwrap_or(false)
    }

    fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    fn document(&self, doc: u32) -> Result<Document> {
        Ok(self.docs[doc as usize].clone())
    }

    fn raw_documents(&self, start: u32, count: u32, lengths: &mut [u32]) -> Result<Option<Vec<u8>>> {
        self.raw_run(start, count, lengths, |seg, doc| {
            encode_document(&seg.docs[doc as usize], &seg.schema)
        })
    }

    fn term_vectors(&self, doc: u32) -> Result<Vec<TermVector>> {
        Ok(self.vectors[doc as usize].clone())
    }

    fn raw_vectors(&self, start: u32, count: u32, lengths: &mut [u32]) -> Result<Option<Vec<u8>>> {
        self.raw_run(start, count, lengths, |seg, doc| {
            encode_vectors(&seg.vectors[doc as usize], &seg.schema)
        })
    }

    fn norms(&self, field: &str, buffer: &mut Vec<u8>) -> Result<bool> {
        let Some(bytes) = self.norms.get(field) else {
            return Ok(false);
        };
        buffer.clear();
        buffer.extend_from_slice(bytes);
        buffer.resize(self.max_doc() as usize, DEFAULT_NORM);
        Ok(true)
    }

    fn postings(&self) -> Result<Box<dyn PostingsCursor + '_>> {
        Ok(Box::new(MemoryPostingsCursor {
            segment: self,
            fields: self.postings.iter().collect(),
            field_idx: None,
            terms: Vec::new(),
            term_idx: None,
            docs: &[],
            doc_idx: 0,
            positions: &[],
            pos_idx: 0,
        }))
    }
}

struct MemoryPostingsCursor<'a> {
    segment: &'a MemorySegment,
    fields: Vec<(&'a String, &'a TermMap)>,
    field_idx: Option<usize>,
    terms: Vec<(&'a Vec<u8>, &'a Vec<Posting>)>,
    term_idx: Option<usize>,
    docs: &'a [Posting],
    doc_idx: usize,
    positions: &'a [(u32, Vec<u8>)],
    pos_idx: usize,
}

impl PostingsCursor for MemoryPostingsCursor<'_> {
    fn advance_field(&mut self) -> Result<bool> {
        let next = self.field_idx.map_or(0, |i| i + 1);
        if next >= self.fields.len() {
            return Ok(false);
        }
        self.field_idx = Some(next);
        self.terms = self.fields[next].1.iter().collect();
        self.term_idx = None;
        Ok(true)
    }

    fn field(&self) -> &str {
        self.fields[self.field_idx.expect("advance_field not called")].0
    }

    fn advance_term(&mut self) -> Result<bool> {
        let next = self.term_idx.map_or(0, |i| i + 1);
        if next >= self.terms.len() {
            return Ok(false);
        }
        self.term_idx = Some(next);
        self.docs = self.terms[next].1;
        self.doc_idx = 0;
        Ok(true)
    }

    fn term(&self) -> &[u8] {
        self.terms[self.term_idx.expect("advance_term not called")].0
    }

    fn advance_doc(&mut self) -> Result<Option<(u32, u32)>> {
        while self.doc_idx < self.docs.len() {
            let posting = &self.docs[self.doc_idx];
            self.doc_idx += 1;
            if self.segment.is_deleted(posting.doc) {
                continue;
            }
            self.positions = &posting.positions;
            self.pos_idx = 0;
            return Ok(Some((posting.doc, posting.freq)));
        }
        Ok(None)
    }

    fn next_position(&mut self, payload: &mut Vec<u8>) -> Result<(u32, usize)> {
        let (pos, bytes) = &self.positions[self.pos_idx];
        self.pos_idx += 1;
        if payload.len() < bytes.len() {
            payload.resize(bytes.len(), 0);
        }
        payload[..bytes.len()].copy_from_slice(bytes);
        Ok((*pos, bytes.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staged_segment() -> MemorySegment {
        let mut segment = MemorySegment::new();
        segment
            .schema_mut()
            .add("body", true, false, false, false, false, false, false);
        let mut doc = Document::new();
        doc.add_text("body", "apple pear");
        segment.add_document(doc);
        segment.add_empty_document();
        segment.add_posting("body", b"apple", 0, &[0]);
        segment.add_posting("body", b"pear", 0, &[1]);
        segment.add_posting("body", b"apple", 1, &[3]);
        segment
    }

    #[test]
    fn test_doc_counts_track_deletions() {
        let mut segment = staged_segment();
        assert_eq!(segment.max_doc(), 2);
        assert_eq!(segment.num_docs(), 2);
        assert!(!segment.has_deletions());

        segment.delete_document(0);
        assert_eq!(segment.max_doc(), 2);
        assert_eq!(segment.num_docs(), 1);
        assert!(segment.is_deleted(0));
    }

    #[test]
    fn test_cursor_walks_fields_terms_docs() {
        let segment = staged_segment();
        let mut cursor = segment.postings().unwrap();

        assert!(cursor.advance_field().unwrap());
        assert_eq!(cursor.field(), "body");

        assert!(cursor.advance_term().unwrap());
        assert_eq!(cursor.term(), b"apple");
        assert_eq!(cursor.advance_doc().unwrap(), Some((0, 1)));
        assert_eq!(cursor.advance_doc().unwrap(), Some((1, 1)));
        assert_eq!(cursor.advance_doc().unwrap(), None);

        assert!(cursor.advance_term().unwrap());
        assert_eq!(cursor.term(), b"pear");
        assert!(!cursor.advance_term().unwrap());
        assert!(!cursor.advance_field().unwrap());
    }

    #[test]
    fn test_cursor_skips_deleted_docs() {
        let mut segment = staged_segment();
        segment.delete_document(0);
        let mut cursor = segment.postings().unwrap();

        cursor.advance_field().unwrap();
        cursor.advance_term().unwrap();
        assert_eq!(cursor.advance_doc().unwrap(), Some((1, 1)));
        assert_eq!(cursor.advance_doc().unwrap(), None);
    }

    #[test]
    fn test_raw_capability_can_be_disabled() {
        let mut segment = staged_segment();
        let mut lengths = [0u32; 2];
        assert!(segment.raw_documents(0, 2, &mut lengths).unwrap().is_some());

        segment.set_raw_capable(false);
        assert!(segment.raw_documents(0, 2, &mut lengths).unwrap().is_none());
        assert!(segment.raw_vectors(0, 2, &mut lengths).unwrap().is_none());
    }

    #[test]
    fn test_norms_pad_unset_docs_with_the_default() {
        let mut segment = staged_segment();
        segment.set_norm("body", 0, 0x70);

        // Doc 1 never got a norm; it pads the same way a segment that
        // never indexed the field would be padded during a merge.
        let mut buffer = Vec::new();
        assert!(segment.norms("body", &mut buffer).unwrap());
        assert_eq!(buffer, vec![0x70, DEFAULT_NORM]);
        assert!(!segment.norms("missing", &mut buffer).unwrap());
    }
}
