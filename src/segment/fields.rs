//! Stored-document data files.
//!
//! Two files per segment:
//!
//! - `<seg>.fdt`: 4-byte format header, then one variable-length record
//!   per document holding its stored fields.
//! - `<seg>.fdx`: 4-byte format header, then one u64 record offset per
//!   document. Its length is therefore exactly
//!   `STORED_INDEX_HEADER_LEN + STORED_INDEX_RECORD_LEN * doc_count`;
//!   any other length means the data must not be exposed to readers.
//!
//! Records are self-contained byte runs: a segment whose field numbering
//! matches the target schema can have its records copied verbatim, and
//! the copied bytes are identical to what re-encoding would produce.

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::Mutex;

use crate::document::{Document, FieldValue};
use crate::error::{PilumError, Result};
use crate::schema::FieldSchema;
use crate::storage::{Storage, StorageInput, StorageOutput};
use crate::util::varint;

/// File extension of the stored-document data file.
pub const FIELDS_EXTENSION: &str = "fdt";

/// File extension of the stored-document index file.
pub const FIELDS_INDEX_EXTENSION: &str = "fdx";

/// Byte length of the index file's format header.
pub const STORED_INDEX_HEADER_LEN: u64 = 4;

/// Byte length of one index record (a u64 offset).
pub const STORED_INDEX_RECORD_LEN: u64 = 8;

const STORED_FORMAT: u32 = 1;

const VALUE_TEXT: u8 = 0;
const VALUE_BINARY: u8 = 1;
const VALUE_INTEGER: u8 = 2;
const VALUE_FLOAT: u8 = 3;

/// Encode one document against `schema`'s field numbering.
pub fn encode_document(doc: &Document, schema: &FieldSchema) -> Result<Vec<u8>> {
    let mut record = Vec::new();
    record.extend(varint::encode_u64(doc.len() as u64));
    for field in doc.fields() {
        let ordinal = schema.ordinal(&field.name).ok_or_else(|| {
            PilumError::schema(format!("field '{}' missing from schema", field.name))
        })?;
        record.extend(varint::encode_u32(ordinal));
        match &field.value {
            FieldValue::Text(text) => {
                record.push(VALUE_TEXT);
                record.extend(varint::encode_u64(text.len() as u64));
                record.extend_from_slice(text.as_bytes());
            }
            FieldValue::Binary(bytes) => {
                record.push(VALUE_BINARY);
                record.extend(varint::encode_u64(bytes.len() as u64));
                record.extend_from_slice(bytes);
            }
            FieldValue::Integer(value) => {
                record.push(VALUE_INTEGER);
                record.extend_from_slice(&value.to_le_bytes());
            }
            FieldValue::Float(value) => {
                record.push(VALUE_FLOAT);
                record.extend_from_slice(&value.to_bits().to_le_bytes());
            }
        }
    }
    Ok(record)
}

/// Decode one record against `schema`'s field numbering.
pub fn decode_document(record: &[u8], schema: &FieldSchema) -> Result<Document> {
    let mut cursor = std::io::Cursor::new(record);
    let field_count = varint::read_u64(&mut cursor)? as usize;
    let mut doc = Document::new();
    for _ in 0..field_count {
        let ordinal = varint::read_u32(&mut cursor)?;
        let field = schema
            .by_ordinal(ordinal)
            .ok_or_else(|| PilumError::schema(format!("unknown field ordinal {ordinal}")))?;
        let tag = cursor.read_u8()?;
        let value = match tag {
            VALUE_TEXT => {
                let len = varint::read_u64(&mut cursor)? as usize;
                let mut bytes = vec![0u8; len];
                std::io::Read::read_exact(&mut cursor, &mut bytes)?;
                FieldValue::Text(String::from_utf8(bytes).map_err(|e| {
                    PilumError::storage(format!("Invalid UTF-8 in stored field: {e}"))
                })?)
            }
            VALUE_BINARY => {
                let len = varint::read_u64(&mut cursor)? as usize;
                let mut bytes = vec![0u8; len];
                std::io::Read::read_exact(&mut cursor, &mut bytes)?;
                FieldValue::Binary(bytes)
            }
            VALUE_INTEGER => FieldValue::Integer(cursor.read_i64::<LittleEndian>()?),
            VALUE_FLOAT => FieldValue::Float(f64::from_bits(cursor.read_u64::<LittleEndian>()?)),
            other => {
                return Err(PilumError::corruption(format!(
                    "unknown stored value tag {other}"
                )));
            }
        };
        doc.add_field(&field.name, value);
    }
    Ok(doc)
}

/// Writer for the stored-document files of one segment.
pub struct FieldsWriter<'a> {
    schema: &'a FieldSchema,
    data: Box<dyn StorageOutput>,
    index: Box<dyn StorageOutput>,
    data_position: u64,
    doc_count: u32,
}

impl<'a> FieldsWriter<'a> {
    /// Create the fdt/fdx pair for `segment`.
    pub fn new(storage: &dyn Storage, segment: &str, schema: &'a FieldSchema) -> Result<Self> {
        let mut data = storage.create_output(&format!("{segment}.{FIELDS_EXTENSION}"))?;
        let mut index = storage.create_output(&format!("{segment}.{FIELDS_INDEX_EXTENSION}"))?;
        data.write_u32::<LittleEndian>(STORED_FORMAT)?;
        index.write_u32::<LittleEndian>(STORED_FORMAT)?;
        Ok(FieldsWriter {
            schema,
            data,
            index,
            data_position: STORED_INDEX_HEADER_LEN,
            doc_count: 0,
        })
    }

    /// Encode and append one document.
    pub fn add_document(&mut self, doc: &Document) -> Result<()> {
        let record = encode_document(doc, self.schema)?;
        self.index.write_u64::<LittleEndian>(self.data_position)?;
        self.data.write_all(&record)?;
        self.data_position += record.len() as u64;
        self.doc_count += 1;
        Ok(())
    }

    /// Append `count` pre-encoded records as one opaque byte run.
    ///
    /// `lengths[..count]` must hold the individual record lengths; the
    /// caller guarantees the records were encoded under a field numbering
    /// identical to this writer's schema.
    pub fn add_raw_documents(&mut self, bytes: &[u8], lengths: &[u32], count: usize) -> Result<()> {
        let total: u64 = lengths[..count].iter().map(|&l| l as u64).sum();
        if total != bytes.len() as u64 {
            return Err(PilumError::index(format!(
                "raw document run is {} bytes but lengths sum to {total}",
                bytes.len()
            )));
        }
        for &len in &lengths[..count] {
            self.index.write_u64::<LittleEndian>(self.data_position)?;
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

/// Reader for the stored-document files of one segment.
pub struct FieldsReader {
    data: Mutex<Box<dyn StorageInput>>,
    index: Mutex<Box<dyn StorageInput>>,
    data_size: u64,
    doc_count: u32,
}

impl FieldsReader {
    /// Open the fdt/fdx pair of `segment`.
    pub fn open(storage: &dyn Storage, segment: &str) -> Result<Self> {
        let mut data = storage.open_input(&format!("{segment}.{FIELDS_EXTENSION}"))?;
        let mut index = storage.open_input(&format!("{segment}.{FIELDS_INDEX_EXTENSION}"))?;

        let data_size = data.size()?;
        let index_size = index.size()?;
        if index_size < STORED_INDEX_HEADER_LEN
            || (index_size - STORED_INDEX_HEADER_LEN) % STORED_INDEX_RECORD_LEN != 0
        {
            return Err(PilumError::corruption(format!(
                "stored index for segment {segment} has invalid length {index_size}"
            )));
        }
        let doc_count = ((index_size - STORED_INDEX_HEADER_LEN) / STORED_INDEX_RECORD_LEN) as u32;

        let data_format = data.read_u32::<LittleEndian>()?;
        let index_format = index.read_u32::<LittleEndian>()?;
        if data_format != STORED_FORMAT || index_format != STORED_FORMAT {
            return Err(PilumError::corruption(format!(
                "unsupported stored format for segment {segment}"
            )));
        }

        Ok(FieldsReader {
            data: Mutex::new(data),
            index: Mutex::new(index),
            data_size,
            doc_count,
        })
    }

    /// Number of documents stored.
    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    /// Start offset of `doc`'s record, and of the record after the last.
    fn record_bounds(&self, start: u32, count: u32) -> Result<Vec<u64>> {
        if start + count > self.doc_count {
            return Err(PilumError::index(format!(
                "documents {start}..{} out of range (doc_count {})",
                start + count,
                self.doc_count
            )));
        }
        let mut index = self.index.lock();
        index.seek(SeekFrom::Start(
            STORED_INDEX_HEADER_LEN + start as u64 * STORED_INDEX_RECORD_LEN,
        ))?;
        let mut bounds = Vec::with_capacity(count as usize + 1);
        for _ in 0..count {
            bounds.push(index.read_u64::<LittleEndian>()?);
        }
        if start + count < self.doc_count {
            bounds.push(index.read_u64::<LittleEndian>()?);
        } else {
            bounds.push(self.data_size);
        }
        Ok(bounds)
    }

    /// Decode the stored fields of one document.
    pub fn document(&self, doc: u32, schema: &FieldSchema) -> Result<Document> {
        let record = self.raw_run(doc, 1)?.0;
        decode_document(&record, schema)
    }

    /// Read the raw record bytes of documents `start..start + count`,
    /// returning the byte run and the per-record lengths.
    pub fn raw_documents(&self, start: u32, count: u32, lengths: &mut [u32]) -> Result<Vec<u8>> {
        let (bytes, lens) = self.raw_run(start, count)?;
        lengths[..count as usize].copy_from_slice(&lens);
        Ok(bytes)
    }

    fn raw_run(&self, start: u32, count: u32) -> Result<(Vec<u8>, Vec<u32>)> {
        let bounds = self.record_bounds(start, count)?;
        let lengths: Vec<u32> = bounds
            .windows(2)
            .map(|pair| (pair[1] - pair[0]) as u32)
            .collect();
        let total = (bounds[count as usize] - bounds[0]) as usize;

        let mut data = self.data.lock();
        data.seek(SeekFrom::Start(bounds[0]))?;
        let mut bytes = vec![0u8; total];
        data.read_exact(&mut bytes)?;
        Ok((bytes, lengths))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn test_schema() -> FieldSchema {
        let mut schema = FieldSchema::new();
        schema.add("title", true, false, false, false, false, false, false);
        schema.add("count", false, false, false, false, true, false, false);
        schema
    }

    fn test_doc(title: &str, count: i64) -> Document {
        let mut doc = Document::new();
        doc.add_text("title", title)
            .add_field("count", FieldValue::Integer(count));
        doc
    }

    #[test]
    fn test_write_read_roundtrip() {
        let storage = MemoryStorage::new_default();
        let schema = test_schema();

        let mut writer = FieldsWriter::new(&storage, "s0", &schema).unwrap();
        writer.add_document(&test_doc("first", 1)).unwrap();
        writer.add_document(&test_doc("second", 2)).unwrap();
        assert_eq!(writer.doc_count(), 2);
        writer.close().unwrap();

        let reader = FieldsReader::open(&storage, "s0").unwrap();
        assert_eq!(reader.doc_count(), 2);
        assert_eq!(reader.document(0, &schema).unwrap(), test_doc("first", 1));
        assert_eq!(reader.document(1, &schema).unwrap(), test_doc("second", 2));
    }

    #[test]
    fn test_index_length_invariant() {
        let storage = MemoryStorage::new_default();
        let schema = test_schema();

        let mut writer = FieldsWriter::new(&storage, "s1", &schema).unwrap();
        for i in 0..5 {
            writer.add_document(&test_doc("doc", i)).unwrap();
        }
        writer.close().unwrap();

        let index_size = storage.file_size("s1.fdx").unwrap();
        assert_eq!(index_size, STORED_INDEX_HEADER_LEN + 5 * STORED_INDEX_RECORD_LEN);
    }

    #[test]
    fn test_raw_copy_equals_reencode() {
        let storage = MemoryStorage::new_default();
        let schema = test_schema();

        let mut writer = FieldsWriter::new(&storage, "s2", &schema).unwrap();
        writer.add_document(&test_doc("alpha", 10)).unwrap();
        writer.add_document(&test_doc("beta", 20)).unwrap();
        writer.close().unwrap();

        let reader = FieldsReader::open(&storage, "s2").unwrap();
        let mut lengths = [0u32; 2];
        let raw = reader.raw_documents(0, 2, &mut lengths).unwrap();

        let first = encode_document(&test_doc("alpha", 10), &schema).unwrap();
        let second = encode_document(&test_doc("beta", 20), &schema).unwrap();
        assert_eq!(lengths[0] as usize, first.len());
        assert_eq!(&raw[..first.len()], first.as_slice());
        assert_eq!(&raw[first.len()..], second.as_slice());
    }

    #[test]
    fn test_add_raw_documents() {
        let storage = MemoryStorage::new_default();
        let schema = test_schema();

        let first = encode_document(&test_doc("alpha", 10), &schema).unwrap();
        let second = encode_document(&test_doc("beta", 20), &schema).unwrap();
        let mut run = first.clone();
        run.extend_from_slice(&second);
        let lengths = [first.len() as u32, second.len() as u32];

        let mut writer = FieldsWriter::new(&storage, "s3", &schema).unwrap();
        writer.add_raw_documents(&run, &lengths, 2).unwrap();
        writer.close().unwrap();

        let reader = FieldsReader::open(&storage, "s3").unwrap();
        assert_eq!(reader.document(0, &schema).unwrap(), test_doc("alpha", 10));
        assert_eq!(reader.document(1, &schema).unwrap(), test_doc("beta", 20));
    }
}
