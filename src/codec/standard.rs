//! The standard postings codec.
//!
//! Writes two files per segment:
//!
//! - `<seg>.tix` is the term dictionary: one block per field holding the
//!   field ordinal, the term count, and per term its bytes, document
//!   frequency and postings offset.
//! - `<seg>.pst` holds the postings: per document a varint doc-id delta,
//!   and unless the field omits positions a varint frequency followed by
//!   position deltas with optional payloads.

use parking_lot::Mutex;

use crate::error::{PilumError, Result};
use crate::schema::{FieldDescriptor, FieldSchema};
use crate::storage::{Storage, StorageInput, StorageOutput, StructReader, StructWriter};

use super::PostingsSink;

/// File extension of the term dictionary.
pub const TERMS_EXTENSION: &str = "tix";

/// File extension of the postings file.
pub const POSTINGS_EXTENSION: &str = "pst";

#[derive(Debug, Clone, Copy, PartialEq)]
enum SinkState {
    Idle,
    InField,
    InTerm,
    InDoc,
    Finished,
}

struct TermDictEntry {
    term: Vec<u8>,
    doc_freq: u32,
    offset: u64,
}

/// Standard codec writer implementing [`PostingsSink`].
pub struct StandardPostingsWriter {
    terms_name: String,
    postings_name: String,

    terms_out: Option<StructWriter<Box<dyn StorageOutput>>>,
    postings_out: Option<StructWriter<Box<dyn StorageOutput>>>,

    state: SinkState,

    // Current field context.
    field_ordinal: u32,
    omits_positions: bool,
    stores_payloads: bool,
    field_terms: Vec<TermDictEntry>,

    // Current term context.
    last_term: Option<Vec<u8>>,
    pending_term: Vec<u8>,
    pending_offset: u64,
    docs_in_term: u32,
    last_doc: u32,
    cur_freq: u32,
    positions_in_doc: u32,
    last_position: u32,
}

impl StandardPostingsWriter {
    /// Create a writer for segment `segment` in `storage`.
    pub fn new(storage: &dyn Storage, segment: &str) -> Result<Self> {
        let terms_name = format!("{segment}.{TERMS_EXTENSION}");
        let postings_name = format!("{segment}.{POSTINGS_EXTENSION}");
        let terms_out = StructWriter::new(storage.create_output(&terms_name)?);
        let postings_out = StructWriter::new(storage.create_output(&postings_name)?);
        Ok(StandardPostingsWriter {
            terms_name,
            postings_name,
            terms_out: Some(terms_out),
            postings_out: Some(postings_out),
            state: SinkState::Idle,
            field_ordinal: 0,
            omits_positions: false,
            stores_payloads: false,
            field_terms: Vec::new(),
            last_term: None,
            pending_term: Vec::new(),
            pending_offset: 0,
            docs_in_term: 0,
            last_doc: 0,
            cur_freq: 0,
            positions_in_doc: 0,
            last_position: 0,
        })
    }

    fn terms_out(&mut self) -> &mut StructWriter<Box<dyn StorageOutput>> {
        self.terms_out.as_mut().expect("terms output already closed")
    }

    fn postings_out(&mut self) -> &mut StructWriter<Box<dyn StorageOutput>> {
        self.postings_out
            .as_mut()
            .expect("postings output already closed")
    }
}

impl PostingsSink for StandardPostingsWriter {
    fn begin_field(&mut self, field: &FieldDescriptor) -> Result<()> {
        assert_eq!(self.state, SinkState::Idle, "begin_field outside field scope");
        self.state = SinkState::InField;
        self.field_ordinal = field.ordinal;
        self.omits_positions = field.omits_positions;
        self.stores_payloads = field.stores_payloads;
        self.field_terms.clear();
        self.last_term = None;
        Ok(())
    }

    fn begin_term(&mut self, term: &[u8]) -> Result<()> {
        assert_eq!(self.state, SinkState::InField, "begin_term outside field");
        if let Some(last) = &self.last_term {
            assert!(
                last.as_slice() < term,
                "terms must arrive in strictly ascending order"
            );
        }
        self.state = SinkState::InTerm;
        self.last_term = Some(term.to_vec());
        self.pending_term.clear();
        self.pending_term.extend_from_slice(term);
        self.pending_offset = self.postings_out().position();
        self.docs_in_term = 0;
        self.last_doc = 0;
        Ok(())
    }

    fn add_doc(&mut self, doc: u32, freq: u32) -> Result<()> {
        assert_eq!(self.state, SinkState::InTerm, "add_doc outside term");
        assert!(
            self.docs_in_term == 0 || doc > self.last_doc,
            "documents must arrive in ascending order"
        );
        self.state = SinkState::InDoc;

        let delta = if self.docs_in_term == 0 {
            doc
        } else {
            doc - self.last_doc
        };
        let omits_positions = self.omits_positions;
        let out = self.postings_out();
        out.write_varint(delta as u64)?;
        if !omits_positions {
            out.write_varint(freq as u64)?;
        }

        self.last_doc = doc;
        self.cur_freq = freq;
        self.docs_in_term += 1;
        self.positions_in_doc = 0;
        self.last_position = 0;
        Ok(())
    }

    fn add_position(&mut self, position: u32, payload: &[u8]) -> Result<()> {
        assert_eq!(self.state, SinkState::InDoc, "add_position outside doc");
        assert!(!self.omits_positions, "field omits positions");

        let delta = if self.positions_in_doc == 0 {
            position
        } else {
            position - self.last_position
        };
        let stores_payloads = self.stores_payloads;
        let out = self.postings_out();
        out.write_varint(delta as u64)?;
        if stores_payloads {
            out.write_bytes(payload)?;
        }

        self.last_position = position;
        self.positions_in_doc += 1;
        Ok(())
    }

    fn finish_doc(&mut self) -> Result<()> {
        assert_eq!(self.state, SinkState::InDoc, "finish_doc outside doc");
        assert!(
            self.omits_positions || self.positions_in_doc == self.cur_freq,
            "position count {} does not match frequency {}",
            self.positions_in_doc,
            self.cur_freq
        );
        self.state = SinkState::InTerm;
        Ok(())
    }

    fn finish_term(&mut self, doc_freq: u32) -> Result<()> {
        assert_eq!(self.state, SinkState::InTerm, "finish_term outside term");
        assert_eq!(
            doc_freq, self.docs_in_term,
            "declared doc_freq does not match documents added"
        );
        self.state = SinkState::InField;

        // Terms with no surviving documents are not recorded.
        if doc_freq > 0 {
            self.field_terms.push(TermDictEntry {
                term: std::mem::take(&mut self.pending_term),
                doc_freq,
                offset: self.pending_offset,
            });
        }
        Ok(())
    }

    fn finish_field(&mut self) -> Result<()> {
        assert_eq!(self.state, SinkState::InField, "finish_field outside field");
        self.state = SinkState::Idle;

        let entries = std::mem::take(&mut self.field_terms);
        let ordinal = self.field_ordinal;
        let out = self.terms_out();
        out.write_varint(ordinal as u64)?;
        out.write_varint(entries.len() as u64)?;
        for entry in &entries {
            out.write_bytes(&entry.term)?;
            out.write_varint(entry.doc_freq as u64)?;
            out.write_varint(entry.offset)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        assert_eq!(self.state, SinkState::Idle, "finish inside open field");
        self.state = SinkState::Finished;
        if let Some(out) = self.terms_out.take() {
            out.close()?;
        }
        if let Some(out) = self.postings_out.take() {
            out.close()?;
        }
        Ok(())
    }

    fn files(&self) -> Vec<String> {
        vec![self.terms_name.clone(), self.postings_name.clone()]
    }
}

/// One term dictionary entry.
#[derive(Debug, Clone, PartialEq)]
pub struct TermEntry {
    /// Term bytes.
    pub term: Vec<u8>,

    /// Number of documents holding the term.
    pub doc_freq: u32,

    /// Byte offset of the term's postings in the postings file.
    pub offset: u64,
}

/// The term dictionary of one field.
#[derive(Debug, Clone)]
pub struct FieldTerms {
    /// Field ordinal in the segment's schema.
    pub ordinal: u32,

    /// Terms in ascending byte order.
    pub terms: Vec<TermEntry>,
}

/// A decoded posting, used by tests and the slow-path readers.
#[derive(Debug, Clone, PartialEq)]
pub struct PostingDoc {
    /// Document id within the segment.
    pub doc: u32,

    /// Term frequency within the document.
    pub freq: u32,

    /// (position, optional payload) pairs; empty for fields omitting positions.
    pub positions: Vec<(u32, Option<Vec<u8>>)>,
}

/// Streaming decoder for one term's postings.
///
/// The caller positions the postings reader at the term's offset and then
/// alternates [`PostingsDecoder::advance_doc`] with `freq` calls to
/// [`PostingsDecoder::next_position`] (for position-bearing fields).
#[derive(Debug)]
pub struct PostingsDecoder {
    omits_positions: bool,
    stores_payloads: bool,
    remaining_docs: u32,
    last_doc: u32,
    first: bool,
    remaining_positions: u32,
    last_position: u32,
}

impl PostingsDecoder {
    /// Create a decoder for a term with `doc_freq` documents in `field`.
    pub fn new(field: &FieldDescriptor, doc_freq: u32) -> Self {
        PostingsDecoder {
            omits_positions: field.omits_positions,
            stores_payloads: field.stores_payloads,
            remaining_docs: doc_freq,
            last_doc: 0,
            first: true,
            remaining_positions: 0,
            last_position: 0,
        }
    }

    /// Decode the next (doc, freq) entry, or None when the term is exhausted.
    ///
    /// Skips over any positions of the previous document that were not
    /// consumed through [`PostingsDecoder::next_position`].
    pub fn advance_doc<R: StorageInput>(
        &mut self,
        reader: &mut StructReader<R>,
    ) -> Result<Option<(u32, u32)>> {
        while self.remaining_positions > 0 {
            let mut scratch = Vec::new();
            self.next_position(reader, &mut scratch)?;
        }

        if self.remaining_docs == 0 {
            return Ok(None);
        }
        self.remaining_docs -= 1;

        let delta = reader.read_varint()? as u32;
        let doc = if self.first { delta } else { self.last_doc + delta };
        self.first = false;
        self.last_doc = doc;

        let freq = if self.omits_positions {
            1
        } else {
            reader.read_varint()? as u32
        };
        self.remaining_positions = if self.omits_positions { 0 } else { freq };
        self.last_position = 0;
        Ok(Some((doc, freq)))
    }

    /// Decode the next position of the current document.
    ///
    /// The payload bytes, if any, are copied into `payload` (grown as
    /// needed, never shrunk); the returned length is 0 when the position
    /// carries no payload.
    pub fn next_position<R: StorageInput>(
        &mut self,
        reader: &mut StructReader<R>,
        payload: &mut Vec<u8>,
    ) -> Result<(u32, usize)> {
        if self.remaining_positions == 0 {
            return Err(PilumError::index("no positions left in current document"));
        }
        self.remaining_positions -= 1;

        let delta = reader.read_varint()? as u32;
        let position = self.last_position + delta;
        self.last_position = position;

        let payload_len = if self.stores_payloads {
            let len = reader.read_varint()? as usize;
            if payload.len() < len {
                payload.resize(len, 0);
            }
            let bytes = reader.read_raw(len)?;
            payload[..len].copy_from_slice(&bytes);
            len
        } else {
            0
        };
        Ok((position, payload_len))
    }
}

/// Reader over the standard codec's files for one segment.
pub struct StandardPostingsReader {
    fields: Vec<FieldTerms>,
    postings_input: Mutex<Box<dyn StorageInput>>,
}

impl StandardPostingsReader {
    /// Open the codec files for `segment`, loading the term dictionary.
    pub fn open(storage: &dyn Storage, segment: &str) -> Result<Self> {
        let terms_input = storage.open_input(&format!("{segment}.{TERMS_EXTENSION}"))?;
        let mut reader = StructReader::new(terms_input)?;

        let mut fields = Vec::new();
        while !reader.is_eof() {
            let ordinal = reader.read_varint()? as u32;
            let term_count = reader.read_varint()? as usize;
            let mut terms = Vec::with_capacity(term_count);
            for _ in 0..term_count {
                let term = reader.read_bytes()?;
                let doc_freq = reader.read_varint()? as u32;
                let offset = reader.read_varint()?;
                terms.push(TermEntry {
                    term,
                    doc_freq,
                    offset,
                });
            }
            fields.push(FieldTerms { ordinal, terms });
        }
        if !reader.verify_checksum()? {
            return Err(PilumError::corruption(format!(
                "term dictionary checksum mismatch for segment {segment}"
            )));
        }

        let postings_input = storage.open_input(&format!("{segment}.{POSTINGS_EXTENSION}"))?;
        Ok(StandardPostingsReader {
            fields,
            postings_input: Mutex::new(postings_input),
        })
    }

    /// Per-field term dictionaries, in the order fields were written.
    pub fn fields(&self) -> &[FieldTerms] {
        &self.fields
    }

    /// Term dictionary for one field ordinal.
    pub fn field(&self, ordinal: u32) -> Option<&FieldTerms> {
        self.fields.iter().find(|f| f.ordinal == ordinal)
    }

    /// Open an independent postings stream positioned at `entry`.
    pub fn postings_stream(&self, entry: &TermEntry) -> Result<StructReader<Box<dyn StorageInput>>> {
        let input = self.postings_input.lock().clone_input()?;
        let mut reader = StructReader::new(input)?;
        reader.seek(entry.offset)?;
        Ok(reader)
    }

    /// Decode and materialize one term's postings. Convenience for tests
    /// and consumers that do not need streaming access.
    pub fn read_postings(
        &self,
        schema: &FieldSchema,
        ordinal: u32,
        entry: &TermEntry,
    ) -> Result<Vec<PostingDoc>> {
        let field = schema
            .by_ordinal(ordinal)
            .ok_or_else(|| PilumError::schema(format!("unknown field ordinal {ordinal}")))?;
        let mut reader = self.postings_stream(entry)?;
        let mut decoder = PostingsDecoder::new(field, entry.doc_freq);

        let mut docs = Vec::with_capacity(entry.doc_freq as usize);
        let mut payload = Vec::new();
        while let Some((doc, freq)) = decoder.advance_doc(&mut reader)? {
            let mut positions = Vec::new();
            if !field.omits_positions {
                for _ in 0..freq {
                    let (position, payload_len) =
                        decoder.next_position(&mut reader, &mut payload)?;
                    let data = if payload_len > 0 {
                        Some(payload[..payload_len].to_vec())
                    } else {
                        None
                    };
                    positions.push((position, data));
                }
            }
            docs.push(PostingDoc {
                doc,
                freq,
                positions,
            });
        }
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn test_schema() -> FieldSchema {
        let mut schema = FieldSchema::new();
        // body: positions + payloads
        schema.add("body", true, false, false, false, false, true, false);
        // tag: docs only
        schema.add("tag", true, false, false, false, true, false, true);
        schema
    }

    #[test]
    fn test_write_and_read_postings() {
        let storage = MemoryStorage::new_default();
        let schema = test_schema();
        let body = schema.by_name("body").unwrap().clone();
        let tag = schema.by_name("tag").unwrap().clone();

        let mut writer = StandardPostingsWriter::new(&storage, "s0").unwrap();

        writer.begin_field(&body).unwrap();
        writer.begin_term(b"apple").unwrap();
        writer.add_doc(0, 2).unwrap();
        writer.add_position(1, b"").unwrap();
        writer.add_position(5, b"pay").unwrap();
        writer.finish_doc().unwrap();
        writer.add_doc(3, 1).unwrap();
        writer.add_position(9, b"").unwrap();
        writer.finish_doc().unwrap();
        writer.finish_term(2).unwrap();
        writer.begin_term(b"pear").unwrap();
        writer.add_doc(1, 1).unwrap();
        writer.add_position(0, b"").unwrap();
        writer.finish_doc().unwrap();
        writer.finish_term(1).unwrap();
        writer.finish_field().unwrap();

        writer.begin_field(&tag).unwrap();
        writer.begin_term(b"red").unwrap();
        writer.add_doc(2, 1).unwrap();
        writer.finish_doc().unwrap();
        writer.finish_term(1).unwrap();
        writer.finish_field().unwrap();

        writer.finish().unwrap();

        let reader = StandardPostingsReader::open(&storage, "s0").unwrap();
        assert_eq!(reader.fields().len(), 2);

        let body_terms = reader.field(0).unwrap();
        assert_eq!(body_terms.terms.len(), 2);
        assert_eq!(body_terms.terms[0].term, b"apple");
        assert_eq!(body_terms.terms[0].doc_freq, 2);
        assert_eq!(body_terms.terms[1].term, b"pear");

        let apple = reader
            .read_postings(&schema, 0, &body_terms.terms[0])
            .unwrap();
        assert_eq!(apple.len(), 2);
        assert_eq!(apple[0].doc, 0);
        assert_eq!(apple[0].freq, 2);
        assert_eq!(apple[0].positions[0], (1, None));
        assert_eq!(apple[0].positions[1], (5, Some(b"pay".to_vec())));
        assert_eq!(apple[1].doc, 3);

        let tag_terms = reader.field(1).unwrap();
        let red = reader.read_postings(&schema, 1, &tag_terms.terms[0]).unwrap();
        assert_eq!(red.len(), 1);
        assert_eq!(red[0].doc, 2);
        assert_eq!(red[0].freq, 1);
        assert!(red[0].positions.is_empty());
    }

    #[test]
    fn test_empty_term_is_dropped() {
        let storage = MemoryStorage::new_default();
        let schema = test_schema();
        let body = schema.by_name("body").unwrap().clone();

        let mut writer = StandardPostingsWriter::new(&storage, "s1").unwrap();
        writer.begin_field(&body).unwrap();
        writer.begin_term(b"ghost").unwrap();
        writer.finish_term(0).unwrap();
        writer.finish_field().unwrap();
        writer.finish().unwrap();

        let reader = StandardPostingsReader::open(&storage, "s1").unwrap();
        assert!(reader.field(0).unwrap().terms.is_empty());
    }

    #[test]
    #[should_panic(expected = "ascending order")]
    fn test_out_of_order_terms_panic() {
        let storage = MemoryStorage::new_default();
        let schema = test_schema();
        let body = schema.by_name("body").unwrap().clone();

        let mut writer = StandardPostingsWriter::new(&storage, "s2").unwrap();
        writer.begin_field(&body).unwrap();
        writer.begin_term(b"zebra").unwrap();
        writer.finish_term(0).unwrap();
        writer.begin_term(b"aardvark").unwrap();
    }
}
