//! Term-vector data files.
//!
//! Two files per segment:
//!
//! - `<seg>.tvd`: 4-byte format header, then one record per document
//!   holding the term vectors of its vector-bearing fields.
//! - `<seg>.tvx`: 4-byte format header, then per document a u64 record
//!   offset and a u64 record length. Its length is therefore exactly
//!   `VECTOR_INDEX_HEADER_LEN + VECTOR_INDEX_RECORD_LEN * doc_count`.
//!
//! Every document gets a record, even when it has no vectors; such a
//! record holds a zero field count. As with stored documents, records are
//! copyable verbatim between segments with identical field numbering.

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::Mutex;

use crate::document::{TermVector, VectorEntry};
use crate::error::{PilumError, Result};
use crate::schema::FieldSchema;
use crate::storage::{Storage, StorageInput, StorageOutput};
use crate::util::varint;

/// File extension of the term-vector data file.
pub const VECTORS_EXTENSION: &str = "tvd";

/// File extension of the term-vector index file.
pub const VECTORS_INDEX_EXTENSION: &str = "tvx";

/// Byte length of the index file's format header.
pub const VECTOR_INDEX_HEADER_LEN: u64 = 4;

/// Byte length of one index record (u64 offset + u64 length).
pub const VECTOR_INDEX_RECORD_LEN: u64 = 16;

const VECTORS_FORMAT: u32 = 1;

/// Encode one document's term vectors against `schema`'s field numbering.
pub fn encode_vectors(vectors: &[TermVector], schema: &FieldSchema) -> Result<Vec<u8>> {
    let mut record = Vec::new();
    record.extend(varint::encode_u64(vectors.len() as u64));
    for vector in vectors {
        let field = schema.by_name(&vector.field).ok_or_else(|| {
            PilumError::schema(format!("field '{}' missing from schema", vector.field))
        })?;
        record.extend(varint::encode_u32(field.ordinal));
        record.extend(varint::encode_u64(vector.entries.len() as u64));
        for entry in &vector.entries {
            record.extend(varint::encode_u64(entry.term.len() as u64));
            record.extend_from_slice(&entry.term);
            record.extend(varint::encode_u32(entry.freq));

            record.extend(varint::encode_u64(entry.positions.len() as u64));
            let mut last = 0u32;
            for &pos in &entry.positions {
                record.extend(varint::encode_u32(pos.wrapping_sub(last)));
                last = pos;
            }

            record.extend(varint::encode_u64(entry.offsets.len() as u64));
            let mut last_end = 0u32;
            for &(start, end) in &entry.offsets {
                record.extend(varint::encode_u32(start.wrapping_sub(last_end)));
                record.extend(varint::encode_u32(end - start));
                last_end = end;
            }
        }
    }
    Ok(record)
}

/// Decode one term-vector record against `schema`'s field numbering.
pub fn decode_vectors(record: &[u8], schema: &FieldSchema) -> Result<Vec<TermVector>> {
    let mut cursor = std::io::Cursor::new(record);
    let field_count = varint::read_u64(&mut cursor)? as usize;
    let mut vectors = Vec::with_capacity(field_count);
    for _ in 0..field_count {
        let ordinal = varint::read_u32(&mut cursor)?;
        let field = schema
            .by_ordinal(ordinal)
            .ok_or_else(|| PilumError::schema(format!("unknown field ordinal {ordinal}")))?;
        let term_count = varint::read_u64(&mut cursor)? as usize;
        let mut entries = Vec::with_capacity(term_count);
        for _ in 0..term_count {
            let term_len = varint::read_u64(&mut cursor)? as usize;
            let mut term = vec![0u8; term_len];
            cursor.read_exact(&mut term)?;
            let freq = varint::read_u32(&mut cursor)?;

            let position_count = varint::read_u64(&mut cursor)? as usize;
            let mut positions = Vec::with_capacity(position_count);
            let mut last = 0u32;
            for _ in 0..position_count {
                let pos = last.wrapping_add(varint::read_u32(&mut cursor)?);
                positions.push(pos);
                last = pos;
            }

            let offset_count = varint::read_u64(&mut cursor)? as usize;
            let mut offsets = Vec::with_capacity(offset_count);
            let mut last_end = 0u32;
            for _ in 0..offset_count {
                let start = last_end.wrapping_add(varint::read_u32(&mut cursor)?);
                let end = start + varint::read_u32(&mut cursor)?;
                offsets.push((start, end));
                last_end = end;
            }

            entries.push(VectorEntry {
                term,
                freq,
                positions,
                offsets,
            });
        }
        vectors.push(TermVector {
            field: field.name.clone(),
            entries,
        });
    }
    Ok(vectors)
}

/// Writer for the term-vector files of one segment.
pub struct VectorsWriter<'a> {
    schema: &'a FieldSchema,
    data: Box<dyn StorageOutput>,
    index: Box<dyn StorageOutput>,
    data_position: u64,
    doc_count: u32,
}

impl<'a> VectorsWriter<'a> {
    /// Create the tvd/tvx pair for `segment`.
    pub fn new(storage: &dyn Storage, segment: &str, schema: &'a FieldSchema) -> Result<Self> {
        let mut data = storage.create_output(&format!("{segment}.{VECTORS_EXTENSION}"))?;
        let mut index = storage.create_output(&format!("{segment}.{VECTORS_INDEX_EXTENSION}"))?;
        data.write_u32::<LittleEndian>(VECTORS_FORMAT)?;
        index.write_u32::<LittleEndian>(VECTORS_FORMAT)?;
        Ok(VectorsWriter {
            schema,
            data,
            index,
            data_position: VECTOR_INDEX_HEADER_LEN,
            doc_count: 0,
        })
    }

    /// Encode and append all vectors of one document.
    pub fn add_doc_vectors(&mut self, vectors: &[TermVector]) -> Result<()> {
        let record = encode_vectors(vectors, self.schema)?;
        self.index.write_u64::<LittleEndian>(self.data_position)?;
        self.index.write_u64::<LittleEndian>(record.len() as u64)?;
        self.data.write_all(&record)?;
        self.data_position += record.len() as u64;
        self.doc_count += 1;
        Ok(())
    }

    /// Append `count` pre-encoded vector records as one opaque byte run.
    pub fn add_raw_documents(&mut self, bytes: &[u8], lengths: &[u32], count: usize) -> Result<()> {
        let total: u64 = lengths[..count].iter().map(|&l| l as u64).sum();
        if total != bytes.len() as u64 {
            return Err(PilumError::index(format!(
                "raw vector run is {} bytes but lengths sum to {total}",
                bytes.len()
            )));
        }
        for &len in &lengths[..count] {
            self.index.write_u64::<LittleEndian>(self.data_position)?;
            self.index.write_u64::<LittleEndian>(len as u64)?;
            self.data_position += len as u64;
        }
        self.data.write_all(bytes)?;
        self.doc_count += count as u32;
        Ok(())
    }

    /// Documents written so far.
    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    /// Flush and close both files.
    pub fn close(mut self) -> Result<()> {
        self.data.close()?;
        self.index.close()?;
        Ok(())
    }
}

/// Reader for the term-vector files of one segment.
pub struct VectorsReader {
    data: Mutex<Box<dyn StorageInput>>,
    index: Mutex<Box<dyn StorageInput>>,
    doc_count: u32,
}

impl VectorsReader {
    /// Open the tvd/tvx pair of `segment`.
    pub fn open(storage: &dyn Storage, segment: &str) -> Result<Self> {
        let mut data = storage.open_input(&format!("{segment}.{VECTORS_EXTENSION}"))?;
        let mut index = storage.open_input(&format!("{segment}.{VECTORS_INDEX_EXTENSION}"))?;

        let index_size = index.size()?;
        if index_size < VECTOR_INDEX_HEADER_LEN
            || (index_size - VECTOR_INDEX_HEADER_LEN) % VECTOR_INDEX_RECORD_LEN != 0
        {
            return Err(PilumError::corruption(format!(
                "vector index for segment {segment} has invalid length {index_size}"
            )));
        }
        let doc_count = ((index_size - VECTOR_INDEX_HEADER_LEN) / VECTOR_INDEX_RECORD_LEN) as u32;

        let data_format = data.read_u32::<LittleEndian>()?;
        let index_format = index.read_u32::<LittleEndian>()?;
        if data_format != VECTORS_FORMAT || index_format != VECTORS_FORMAT {
            return Err(PilumError::corruption(format!(
                "unsupported vector format for segment {segment}"
            )));
        }

        Ok(VectorsReader {
            data: Mutex::new(data),
            index: Mutex::new(index),
            doc_count,
        })
    }

    /// Number of documents covered.
    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    fn record_entries(&self, start: u32, count: u32) -> Result<Vec<(u64, u64)>> {
        if start + count > self.doc_count {
            return Err(PilumError::index(format!(
                "documents {start}..{} out of range (doc_count {})",
                start + count,
                self.doc_count
            )));
        }
        let mut index = self.index.lock();
        index.seek(SeekFrom::Start(
            VECTOR_INDEX_HEADER_LEN + start as u64 * VECTOR_INDEX_RECORD_LEN,
        ))?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let offset = index.read_u64::<LittleEndian>()?;
            let length = index.read_u64::<LittleEndian>()?;
            entries.push((offset, length));
        }
        Ok(entries)
    }

    /// Decode the term vectors of one document.
    pub fn document_vectors(&self, doc: u32, schema: &FieldSchema) -> Result<Vec<TermVector>> {
        let entries = self.record_entries(doc, 1)?;
        let (offset, length) = entries[0];
        let mut data = self.data.lock();
        data.seek(SeekFrom::Start(offset))?;
        let mut record = vec![0u8; length as usize];
        data.read_exact(&mut record)?;
        drop(data);
        decode_vectors(&record, schema)
    }

    /// Read the raw record bytes of documents `start..start + count`,
    /// returning the byte run and the per-record lengths.
    pub fn raw_documents(&self, start: u32, count: u32, lengths: &mut [u32]) -> Result<Vec<u8>> {
        let entries = self.record_entries(start, count)?;
        let total: u64 = entries.iter().map(|&(_, len)| len).sum();
        for (i, &(_, len)) in entries.iter().enumerate() {
            lengths[i] = len as u32;
        }

        // Records of consecutive documents are contiguous in the data file.
        let mut data = self.data.lock();
        data.seek(SeekFrom::Start(entries[0].0))?;
        let mut bytes = vec![0u8; total as usize];
        data.read_exact(&mut bytes)?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn vector_schema() -> FieldSchema {
        let mut schema = FieldSchema::new();
        schema.add("body", true, true, true, true, false, false, false);
        schema
    }

    fn sample_vector() -> Vec<TermVector> {
        vec![TermVector {
            field: "body".to_string(),
            entries: vec![VectorEntry {
                term: b"apple".to_vec(),
                freq: 2,
                positions: vec![1, 7],
                offsets: vec![(0, 5), (20, 25)],
            }],
        }]
    }

    #[test]
    fn test_roundtrip() {
        let storage = MemoryStorage::new_default();
        let schema = vector_schema();

        let mut writer = VectorsWriter::new(&storage, "s0", &schema).unwrap();
        writer.add_doc_vectors(&sample_vector()).unwrap();
        writer.add_doc_vectors(&[]).unwrap(); // doc without vectors
        writer.close().unwrap();

        let reader = VectorsReader::open(&storage, "s0").unwrap();
        assert_eq!(reader.doc_count(), 2);
        assert_eq!(reader.document_vectors(0, &schema).unwrap(), sample_vector());
        assert!(reader.document_vectors(1, &schema).unwrap().is_empty());
    }

    #[test]
    fn test_index_length_invariant() {
        let storage = MemoryStorage::new_default();
        let schema = vector_schema();

        let mut writer = VectorsWriter::new(&storage, "s1", &schema).unwrap();
        for _ in 0..3 {
            writer.add_doc_vectors(&sample_vector()).unwrap();
        }
        writer.close().unwrap();

        let index_size = storage.file_size("s1.tvx").unwrap();
        assert_eq!(index_size, VECTOR_INDEX_HEADER_LEN + 3 * VECTOR_INDEX_RECORD_LEN);
    }

    #[test]
    fn test_raw_copy_matches_encode() {
        let storage = MemoryStorage::new_default();
        let schema = vector_schema();

        let mut writer = VectorsWriter::new(&storage, "s2", &schema).unwrap();
        writer.add_doc_vectors(&sample_vector()).unwrap();
        writer.close().unwrap();

        let reader = VectorsReader::open(&storage, "s2").unwrap();
        let mut lengths = [0u32; 1];
        let raw = reader.raw_documents(0, 1, &mut lengths).unwrap();
        let encoded = encode_vectors(&sample_vector(), &schema).unwrap();
        assert_eq!(raw, encoded);
        assert_eq!(lengths[0] as usize, encoded.len());
    }
}
