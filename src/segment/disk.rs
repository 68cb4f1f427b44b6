//! Reader over a segment's on-disk files.
//!
//! Opens the schema, stored fields, postings and, when present, norms and
//! term vectors of one segment. Merged output is read back through this
//! type, which also makes it a merge input: re-merging an already merged
//! segment uses the raw bulk-copy capability served straight from its
//! data files.

use std::io::Read;

use ahash::AHashMap;

use crate::codec::standard::{FieldTerms, PostingsDecoder, StandardPostingsReader};
use crate::document::{Document, TermVector};
use crate::error::{PilumError, Result};
use crate::schema::{FieldDescriptor, FieldSchema};
use crate::segment::fields::FieldsReader;
use crate::segment::merger::{NORMS_EXTENSION, NORMS_HEADER, SCHEMA_EXTENSION};
use crate::segment::reader::{PostingsCursor, SegmentReader};
use crate::segment::vectors::{VECTORS_INDEX_EXTENSION, VectorsReader};
use crate::storage::{Storage, StorageInput, StructReader};

/// A segment reader backed by storage files. Freshly merged segments have
/// no deletions, so this reader's deletion predicate is constant.
pub struct DiskSegmentReader {
    schema: FieldSchema,
    fields: FieldsReader,
    vectors: Option<VectorsReader>,
    postings: StandardPostingsReader,
    norms: AHashMap<String, Vec<u8>>,
    max_doc: u32,
}

impl DiskSegmentReader {
    /// Open every file of `segment` in `storage`.
    pub fn open(storage: &dyn Storage, segment: &str) -> Result<Self> {
        let schema = FieldSchema::load(storage, &format!("{segment}.{SCHEMA_EXTENSION}"))?;
        let fields = FieldsReader::open(storage, segment)?;
        let max_doc = fields.doc_count();

        let vectors = if storage.file_exists(&format!("{segment}.{VECTORS_INDEX_EXTENSION}")) {
            Some(VectorsReader::open(storage, segment)?)
        } else {
            None
        };
        let postings = StandardPostingsReader::open(storage, segment)?;
        let norms = Self::load_norms(storage, segment, &schema, max_doc)?;

        Ok(DiskSegmentReader {
            schema,
            fields,
            vectors,
            postings,
            norms,
            max_doc,
        })
    }

    fn load_norms(
        storage: &dyn Storage,
        segment: &str,
        schema: &FieldSchema,
        max_doc: u32,
    ) -> Result<AHashMap<String, Vec<u8>>> {
        let name = format!("{segment}.{NORMS_EXTENSION}");
        let mut norms = AHashMap::new();
        if !storage.file_exists(&name) {
            return Ok(norms);
        }

        let mut input = storage.open_input(&name)?;
        let size = input.size()?;
        let mut header = [0u8; 4];
        input.read_exact(&mut header)?;
        if header != NORMS_HEADER {
            return Err(PilumError::corruption(format!(
                "norms file for segment {segment} has a bad header"
            )));
        }

        let norm_fields: Vec<&FieldDescriptor> =
            schema.fields().filter(|f| f.has_norms()).collect();
        let expected = NORMS_HEADER.len() as u64 + norm_fields.len() as u64 * max_doc as u64;
        if size != expected {
            return Err(PilumError::corruption(format!(
                "norms file for segment {segment} is {size} bytes where {expected} were expected"
            )));
        }

        for field in norm_fields {
            let mut bytes = vec![0u8; max_doc as usize];
            input.read_exact(&mut bytes)?;
            norms.insert(field.name.clone(), bytes);
        }
        Ok(norms)
    }
}

impl SegmentReader for DiskSegmentReader {
    fn max_doc(&self) -> u32 {
        self.max_doc
    }

    fn num_docs(&self) -> u32 {
        self.max_doc
    }

    fn has_deletions(&self) -> bool {
        false
    }

    fn is_deleted(&self, _doc: u32) -> bool {
        false
    }

    fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    fn document(&self, doc: u32) -> Result<Document> {
        self.fields.document(doc, &self.schema)
    }

    fn raw_documents(&self, start: u32, count: u32, lengths: &mut [u32]) -> Result<Option<Vec<u8>>> {
        Ok(Some(self.fields.raw_documents(start, count, lengths)?))
    }

    fn term_vectors(&self, doc: u32) -> Result<Vec<TermVector>> {
        match &self.vectors {
            Some(vectors) => vectors.document_vectors(doc, &self.schema),
            None => Ok(Vec::new()),
        }
    }

    fn raw_vectors(&self, start: u32, count: u32, lengths: &mut [u32]) -> Result<Option<Vec<u8>>> {
        match &self.vectors {
            Some(vectors) => Ok(Some(vectors.raw_documents(start, count, lengths)?)),
            None => Ok(None),
        }
    }

    fn norms(&self, field: &str, buffer: &mut Vec<u8>) -> Result<bool> {
        let Some(bytes) = self.norms.get(field) else {
            return Ok(false);
        };
        buffer.clear();
        buffer.extend_from_slice(bytes);
        Ok(true)
    }

    fn postings(&self) -> Result<Box<dyn PostingsCursor + '_>> {
        let mut fields: Vec<(&FieldDescriptor, &FieldTerms)> = Vec::new();
        for terms in self.postings.fields() {
            let field = self.schema.by_ordinal(terms.ordinal).ok_or_else(|| {
                PilumError::corruption(format!(
                    "term dictionary references unknown field ordinal {}",
                    terms.ordinal
                ))
            })?;
            fields.push((field, terms));
        }
        // The dictionary is stored in write order; the merge walks fields
        // in name order.
        fields.sort_by(|a, b| a.0.name.cmp(&b.0.name));

        Ok(Box::new(DiskPostingsCursor {
            reader: self,
            fields,
            field_idx: None,
            term_idx: None,
            stream: None,
            decoder: None,
        }))
    }
}

struct DiskPostingsCursor<'a> {
    reader: &'a DiskSegmentReader,
    fields: Vec<(&'a FieldDescriptor, &'a FieldTerms)>,
    field_idx: Option<usize>,
    term_idx: Option<usize>,
    stream: Option<StructReader<Box<dyn StorageInput>>>,
    decoder: Option<PostingsDecoder>,
}

impl PostingsCursor for DiskPostingsCursor<'_> {
    fn advance_field(&mut self) -> Result<bool> {
        let next = self.field_idx.map_or(0, |i| i + 1);
        if next >= self.fields.len() {
            return Ok(false);
        }
        self.field_idx = Some(next);
        self.term_idx = None;
        self.decoder = None;
        Ok(true)
    }

    fn field(&self) -> &str {
        let idx = self.field_idx.expect("advance_field not called");
        &self.fields[idx].0.name
    }

    fn advance_term(&mut self) -> Result<bool> {
        let idx = self.field_idx.expect("advance_field not called");
        let (field, terms) = self.fields[idx];
        let next = self.term_idx.map_or(0, |i| i + 1);
        if next >= terms.terms.len() {
            return Ok(false);
        }
        self.term_idx = Some(next);

        let entry = &terms.terms[next];
        match &mut self.stream {
            Some(stream) => stream.seek(entry.offset)?,
            None => self.stream = Some(self.reader.postings.postings_stream(entry)?),
        }
        self.decoder = Some(PostingsDecoder::new(field, entry.doc_freq));
        Ok(true)
    }

    fn term(&self) -> &[u8] {
        let field_idx = self.field_idx.expect("advance_field not called");
        let term_idx = self.term_idx.expect("advance_term not called");
        &self.fields[field_idx].1.terms[term_idx].term
    }

    fn advance_doc(&mut self) -> Result<Option<(u32, u32)>> {
        let decoder = self.decoder.as_mut().expect("advance_term not called");
        let stream = self.stream.as_mut().expect("advance_term not called");
        decoder.advance_doc(stream)
    }

    fn next_position(&mut self, payload: &mut Vec<u8>) -> Result<(u32, usize)> {
        let decoder = self.decoder.as_mut().expect("advance_term not called");
        let stream = self.stream.as_mut().expect("advance_term not called");
        decoder.next_position(stream, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{FieldValue, VectorEntry};
    use crate::segment::memory::MemorySegment;
    use crate::segment::merger::SegmentMerger;
    use crate::storage::MemoryStorage;

    fn staged_segment() -> MemorySegment {
        let mut segment = MemorySegment::new();
        segment
            .schema_mut()
            .add("title", true, true, true, false, false, false, false);
        segment
            .schema_mut()
            .add("year", false, false, false, false, true, false, false);

        let mut doc = Document::new();
        doc.add_text("title", "the pilum")
            .add_field("year", FieldValue::Integer(-101));
        segment.add_document(doc);
        segment.set_norm("title", 0, 0x75);
        segment.add_posting("title", b"pilum", 0, &[1]);
        segment.add_posting("title", b"the", 0, &[0]);
        segment.set_vectors(
            0,
            vec![TermVector {
                field: "title".to_string(),
                entries: vec![VectorEntry {
                    term: b"pilum".to_vec(),
                    freq: 1,
                    positions: vec![1],
                    offsets: vec![],
                }],
            }],
        );
        segment
    }

    fn merged_storage() -> MemoryStorage {
        let storage = MemoryStorage::new_default();
        let source = staged_segment();
        let mut merger = SegmentMerger::new(&storage, "seg");
        merger.add_reader(&source);
        merger.merge(true).unwrap();
        storage
    }

    #[test]
    fn test_open_and_read_documents() {
        let storage = merged_storage();
        let reader = DiskSegmentReader::open(&storage, "seg").unwrap();

        assert_eq!(reader.max_doc(), 1);
        assert!(!reader.has_deletions());
        let doc = reader.document(0).unwrap();
        assert_eq!(doc.get("title"), Some(&FieldValue::Text("the pilum".into())));
        assert_eq!(doc.get("year"), Some(&FieldValue::Integer(-101)));
    }

    #[test]
    fn test_norms_round_trip() {
        let storage = merged_storage();
        let reader = DiskSegmentReader::open(&storage, "seg").unwrap();

        let mut buffer = Vec::new();
        assert!(reader.norms("title", &mut buffer).unwrap());
        assert_eq!(buffer, vec![0x75]);
        assert!(!reader.norms("year", &mut buffer).unwrap());
    }

    #[test]
    fn test_cursor_replays_postings() {
        let storage = merged_storage();
        let reader = DiskSegmentReader::open(&storage, "seg").unwrap();

        let mut cursor = reader.postings().unwrap();
        assert!(cursor.advance_field().unwrap());
        assert_eq!(cursor.field(), "title");

        assert!(cursor.advance_term().unwrap());
        assert_eq!(cursor.term(), b"pilum");
        assert_eq!(cursor.advance_doc().unwrap(), Some((0, 1)));
        let mut payload = Vec::new();
        assert_eq!(cursor.next_position(&mut payload).unwrap(), (1, 0));
        assert_eq!(cursor.advance_doc().unwrap(), None);

        assert!(cursor.advance_term().unwrap());
        assert_eq!(cursor.term(), b"the");
        assert!(!cursor.advance_term().unwrap());
        assert!(!cursor.advance_field().unwrap());
    }

    #[test]
    fn test_vectors_round_trip() {
        let storage = merged_storage();
        let reader = DiskSegmentReader::open(&storage, "seg").unwrap();

        let vectors = reader.term_vectors(0).unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].field, "title");
        assert_eq!(vectors[0].entries[0].term, b"pilum");
    }
}
