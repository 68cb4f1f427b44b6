//! The segment merge engine.
//!
//! Combines any number of [`SegmentReader`]s into one new segment.
//! Deleted documents are dropped and the survivors are renumbered
//! contiguously; every downstream file (stored fields, postings, norms,
//! vectors) is driven off the same [`DocIdMaps`] so their document spaces
//! stay aligned.
//!
//! Stored fields and vectors prefer a bulk byte-copy path: when a source
//! segment's field numbering matches the merged schema and the backend can
//! serve raw record bytes, whole runs of live documents are copied without
//! decoding, in chunks of at most [`MAX_RAW_MERGE_DOCS`]. Runs are cut at
//! deletions. Postings are merged with a two-level queue: fields in name
//! order, then terms in byte order, with equal terms fanned in by segment
//! order so remapped doc ids stay ascending.

use std::io::Write;

use crate::codec::PostingsSink;
use crate::codec::standard::StandardPostingsWriter;
use crate::error::{PilumError, Result};
use crate::schema::FieldSchema;
use crate::segment::abort::{AbortChecker, AbortFlag};
use crate::segment::compound::CompoundFileWriter;
use crate::segment::doc_map::DocIdMaps;
use crate::segment::fields::{
    FIELDS_EXTENSION, FIELDS_INDEX_EXTENSION, FieldsWriter, STORED_INDEX_HEADER_LEN,
    STORED_INDEX_RECORD_LEN,
};
use crate::segment::queue::MergeQueue;
use crate::segment::reader::{PostingsCursor, SegmentReader};
use crate::segment::vectors::{
    VECTOR_INDEX_HEADER_LEN, VECTOR_INDEX_RECORD_LEN, VECTORS_EXTENSION, VECTORS_INDEX_EXTENSION,
    VectorsWriter,
};
use crate::storage::Storage;

/// File extension of the per-segment schema file.
pub const SCHEMA_EXTENSION: &str = "fnm";

/// File extension of the norms file.
pub const NORMS_EXTENSION: &str = "nrm";

/// Magic header of the norms file.
pub const NORMS_HEADER: [u8; 4] = [b'N', b'R', b'M', 0xFF];

/// Norm byte written for documents whose segment has no norms for a field
/// that carries norms in the merged schema.
pub const DEFAULT_NORM: u8 = 0x7C;

/// Upper bound on documents copied per bulk byte-copy chunk.
pub const MAX_RAW_MERGE_DOCS: u32 = 4192;

// Heuristic abort-accounting cost of processing one document's stored
// fields or vectors. Term merging charges doc_freq / 3 per merged term and
// norms merging charges max_doc per segment.
const WORK_PER_DOC: f64 = 300.0;

/// Result of a completed merge.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// Live documents in the merged segment.
    pub doc_count: u32,

    /// Names of every file the merge wrote.
    pub files: Vec<String>,
}

struct MergeCursor<'a> {
    cursor: Box<dyn PostingsCursor + 'a>,
    segment: usize,
}

/// Merges several segments into one.
///
/// Readers are added in merge order; that order fixes the merged document
/// layout. A merger is single-use: build it, add readers, call
/// [`SegmentMerger::merge`] once.
pub struct SegmentMerger<'a> {
    storage: &'a dyn Storage,
    segment: String,
    readers: Vec<&'a dyn SegmentReader>,
    schema: FieldSchema,
    doc_maps: Option<DocIdMaps>,
    checker: AbortChecker,
    files: Vec<String>,
}

impl<'a> SegmentMerger<'a> {
    /// Create a merger writing segment `segment` into `storage`.
    pub fn new(storage: &'a dyn Storage, segment: &str) -> Self {
        SegmentMerger {
            storage,
            segment: segment.to_string(),
            readers: Vec::new(),
            schema: FieldSchema::new(),
            doc_maps: None,
            checker: AbortChecker::disabled(),
            files: Vec::new(),
        }
    }

    /// Wire the merge to a cancellation flag.
    pub fn set_abort_flag(&mut self, flag: AbortFlag) {
        self.checker = AbortChecker::new(flag);
    }

    /// Add a source segment. Merge order follows add order.
    pub fn add_reader(&mut self, reader: &'a dyn SegmentReader) {
        self.readers.push(reader);
    }

    /// Number of source segments added.
    pub fn reader_count(&self) -> usize {
        self.readers.len()
    }

    /// Run the merge.
    ///
    /// `merge_stored` controls whether stored fields (and with them term
    /// vectors) are merged; it is false when the sources already share the
    /// target's document store.
    ///
    /// On error the merged segment's files are in an undefined partial
    /// state and must be discarded; the source segments are untouched.
    pub fn merge(&mut self, merge_stored: bool) -> Result<MergeOutcome> {
        let maps = DocIdMaps::build(&self.readers)?;
        let merged_docs = maps.total_docs();

        // Without stored-data merging the sources keep sharing an existing
        // document store, so the merged numbering must extend the store's
        // numbering: seed the schema from the last segment before folding.
        if !merge_stored {
            if let Some(last) = self.readers.last() {
                for field in last.schema().fields() {
                    self.schema.add_descriptor(field);
                }
            }
        }
        for reader in &self.readers {
            for field in reader.schema().fields() {
                self.schema.add_descriptor(field);
            }
        }
        let schema_name = format!("{}.{SCHEMA_EXTENSION}", self.segment);
        self.schema.write(self.storage, &schema_name)?;
        self.files.push(schema_name);

        if merge_stored {
            self.merge_stored_fields(merged_docs)?;
            self.files.push(format!("{}.{FIELDS_EXTENSION}", self.segment));
            self.files
                .push(format!("{}.{FIELDS_INDEX_EXTENSION}", self.segment));
        }

        let codec_files = self.merge_terms(&maps)?;
        self.files.extend(codec_files);

        if self.schema.has_norms() {
            self.merge_norms()?;
            self.files.push(format!("{}.{NORMS_EXTENSION}", self.segment));
        }

        if merge_stored && self.schema.has_vectors() {
            self.merge_vectors(merged_docs)?;
            self.files.push(format!("{}.{VECTORS_EXTENSION}", self.segment));
            self.files
                .push(format!("{}.{VECTORS_INDEX_EXTENSION}", self.segment));
        }

        self.doc_maps = Some(maps);
        Ok(MergeOutcome {
            doc_count: merged_docs,
            files: self.files.clone(),
        })
    }

    /// The merged schema, once [`SegmentMerger::merge`] has run.
    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    /// The document id tables, once [`SegmentMerger::merge`] has run.
    pub fn doc_maps(&self) -> Option<&DocIdMaps> {
        self.doc_maps.as_ref()
    }

    /// Files written by the merge so far.
    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// Package every merged file into one compound file named `name`.
    pub fn create_compound_file(&mut self, name: &str) -> Result<Vec<String>> {
        let mut writer = CompoundFileWriter::new(self.storage, name);
        for file in &self.files {
            writer.add_file(file)?;
            self.checker.work(self.storage.file_size(file)? as f64)?;
        }
        writer.close()?;
        Ok(self.files.clone())
    }

    fn merge_stored_fields(&mut self, merged_docs: u32) -> Result<()> {
        let mut writer = FieldsWriter::new(self.storage, &self.segment, &self.schema)?;
        let mut lengths = vec![0u32; MAX_RAW_MERGE_DOCS as usize];

        for reader in &self.readers {
            let mut raw_ok = self.schema.same_numbering(reader.schema());
            let max_doc = reader.max_doc();
            let mut doc = 0u32;
            while doc < max_doc {
                if reader.is_deleted(doc) {
                    doc += 1;
                    continue;
                }
                // Maximal run of live documents, capped at the chunk limit.
                let mut len = 0u32;
                while len < MAX_RAW_MERGE_DOCS
                    && doc + len < max_doc
                    && !reader.is_deleted(doc + len)
                {
                    len += 1;
                }

                if raw_ok {
                    match reader.raw_documents(doc, len, &mut lengths)? {
                        Some(bytes) => {
                            writer.add_raw_documents(&bytes, &lengths, len as usize)?;
                            doc += len;
                            self.checker.work(WORK_PER_DOC * len as f64)?;
                            continue;
                        }
                        None => raw_ok = false,
                    }
                }
                for d in doc..doc + len {
                    writer.add_document(&reader.document(d)?)?;
                    self.checker.work(WORK_PER_DOC)?;
                }
                doc += len;
            }
        }

        let doc_count = writer.doc_count();
        writer.close()?;
        debug_assert_eq!(doc_count, merged_docs);

        // If this check fails the writer and reader disagree about the
        // document count and any index built on this segment would be
        // corrupt. Failing the merge here keeps the damage contained.
        let index_name = format!("{}.{FIELDS_INDEX_EXTENSION}", self.segment);
        let expected = STORED_INDEX_HEADER_LEN + STORED_INDEX_RECORD_LEN * merged_docs as u64;
        let actual = self.storage.file_size(&index_name)?;
        if actual != expected {
            return Err(PilumError::corruption(format!(
                "stored-field merge wrote {doc_count} documents but {index_name} is \
                 {actual} bytes where {expected} were expected; aborting this merge \
                 to prevent index corruption"
            )));
        }
        Ok(())
    }

    fn merge_vectors(&mut self, merged_docs: u32) -> Result<()> {
        let mut writer = VectorsWriter::new(self.storage, &self.segment, &self.schema)?;
        let mut lengths = vec![0u32; MAX_RAW_MERGE_DOCS as usize];

        for reader in &self.readers {
            let mut raw_ok = self.schema.same_numbering(reader.schema());
            let max_doc = reader.max_doc();
            let mut doc = 0u32;
            while doc < max_doc {
                if reader.is_deleted(doc) {
                    doc += 1;
                    continue;
                }
                let mut len = 0u32;
                while len < MAX_RAW_MERGE_DOCS
                    && doc + len < max_doc
                    && !reader.is_deleted(doc + len)
                {
                    len += 1;
                }

                if raw_ok {
                    match reader.raw_vectors(doc, len, &mut lengths)? {
                        Some(bytes) => {
                            writer.add_raw_documents(&bytes, &lengths, len as usize)?;
                            doc += len;
                            self.checker.work(WORK_PER_DOC * len as f64)?;
                            continue;
                        }
                        None => raw_ok = false,
                    }
                }
                for d in doc..doc + len {
                    writer.add_doc_vectors(&reader.term_vectors(d)?)?;
                    self.checker.work(WORK_PER_DOC)?;
                }
                doc += len;
            }
        }

        let doc_count = writer.doc_count();
        writer.close()?;

        let index_name = format!("{}.{VECTORS_INDEX_EXTENSION}", self.segment);
        let expected = VECTOR_INDEX_HEADER_LEN + VECTOR_INDEX_RECORD_LEN * merged_docs as u64;
        let actual = self.storage.file_size(&index_name)?;
        if actual != expected {
            return Err(PilumError::corruption(format!(
                "vector merge wrote {doc_count} documents but {index_name} is \
                 {actual} bytes where {expected} were expected; aborting this merge \
                 to prevent index corruption"
            )));
        }
        Ok(())
    }

    fn merge_terms(&mut self, maps: &DocIdMaps) -> Result<Vec<String>> {
        let mut writer = StandardPostingsWriter::new(self.storage, &self.segment)?;

        let mut field_queue: MergeQueue<String, MergeCursor<'a>> =
            MergeQueue::with_capacity(self.readers.len());
        for (i, &reader) in self.readers.iter().enumerate() {
            let cursor = reader.postings()?;
            let mut mc = MergeCursor { cursor, segment: i };
            if mc.cursor.advance_field()? {
                field_queue.push(mc.cursor.field().to_string(), i as u32, mc);
            }
        }

        let mut payload = Vec::new();
        while let Some((field_name, first)) = field_queue.pop() {
            // All cursors currently positioned on this field.
            let mut group = vec![first];
            while field_queue.peek_key() == Some(&field_name) {
                if let Some((_, mc)) = field_queue.pop() {
                    group.push(mc);
                }
            }

            let field = self
                .schema
                .by_name(&field_name)
                .ok_or_else(|| {
                    PilumError::index(format!("field '{field_name}' missing from merged schema"))
                })?
                .clone();
            writer.begin_field(&field)?;

            let mut term_queue: MergeQueue<Vec<u8>, MergeCursor<'a>> =
                MergeQueue::with_capacity(group.len());
            for mut mc in group {
                if mc.cursor.advance_term()? {
                    term_queue.push(mc.cursor.term().to_vec(), mc.segment as u32, mc);
                } else if mc.cursor.advance_field()? {
                    field_queue.push(mc.cursor.field().to_string(), mc.segment as u32, mc);
                }
            }

            while let Some((term, first)) = term_queue.pop() {
                let mut matches = vec![first];
                while term_queue.peek_key() == Some(&term) {
                    if let Some((_, mc)) = term_queue.pop() {
                        matches.push(mc);
                    }
                }

                writer.begin_term(&term)?;
                let mut doc_freq = 0u32;
                // Matches arrive in segment order, so remapped ids ascend.
                for mc in &mut matches {
                    while let Some((doc, freq)) = mc.cursor.advance_doc()? {
                        writer.add_doc(maps.remap(mc.segment, doc), freq)?;
                        if !field.omits_positions {
                            for _ in 0..freq {
                                let (position, payload_len) =
                                    mc.cursor.next_position(&mut payload)?;
                                writer.add_position(position, &payload[..payload_len])?;
                            }
                        }
                        writer.finish_doc()?;
                        doc_freq += 1;
                    }
                }
                writer.finish_term(doc_freq)?;
                self.checker.work(doc_freq as f64 / 3.0)?;

                for mut mc in matches {
                    if mc.cursor.advance_term()? {
                        term_queue.push(mc.cursor.term().to_vec(), mc.segment as u32, mc);
                    } else if mc.cursor.advance_field()? {
                        field_queue.push(mc.cursor.field().to_string(), mc.segment as u32, mc);
                    }
                }
            }
            writer.finish_field()?;
        }

        let files = writer.files();
        writer.finish()?;
        Ok(files)
    }

    fn merge_norms(&mut self) -> Result<()> {
        let name = format!("{}.{NORMS_EXTENSION}", self.segment);
        let mut output = self.storage.create_output(&name)?;
        output.write_all(&NORMS_HEADER)?;

        let mut source = Vec::new();
        let mut live = Vec::new();
        for field in self.schema.fields() {
            if !field.has_norms() {
                continue;
            }
            for &reader in &self.readers {
                let max_doc = reader.max_doc();
                if !reader.norms(&field.name, &mut source)? {
                    source.clear();
                    source.resize(max_doc as usize, DEFAULT_NORM);
                }
                if reader.has_deletions() {
                    live.clear();
                    for doc in 0..max_doc {
                        if !reader.is_deleted(doc) {
                            live.push(source[doc as usize]);
                        }
                    }
                    output.write_all(&live)?;
                } else {
                    output.write_all(&source)?;
                }
                self.checker.work(max_doc as f64)?;
            }
        }
        output.close()?;
        Ok(())
    }
}
