//! In-memory models for stored documents and term vectors.
//!
//! These are the decoded forms used on the slow merge path. The fast path
//! never materializes them; it copies the on-disk records as opaque bytes.

use serde::{Deserialize, Serialize};

/// A stored field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// UTF-8 text.
    Text(String),
    /// Opaque binary payload.
    Binary(Vec<u8>),
    /// Signed integer.
    Integer(i64),
    /// Double-precision float.
    Float(f64),
}

/// One stored field of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredField {
    /// Field name, resolved to an ordinal against a schema when encoded.
    pub name: String,

    /// The stored value.
    pub value: FieldValue,
}

/// A decoded stored document: an ordered list of stored fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: Vec<StoredField>,
}

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Document::default()
    }

    /// Append a field.
    pub fn add_field<S: Into<String>>(&mut self, name: S, value: FieldValue) -> &mut Self {
        self.fields.push(StoredField {
            name: name.into(),
            value,
        });
        self
    }

    /// Convenience for text fields.
    pub fn add_text<S: Into<String>, V: Into<String>>(&mut self, name: S, value: V) -> &mut Self {
        self.add_field(name, FieldValue::Text(value.into()))
    }

    /// Fields in insertion order.
    pub fn fields(&self) -> &[StoredField] {
        &self.fields
    }

    /// Number of stored fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the document has no stored fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// First value for a field name, if any.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }
}

/// One term inside a term vector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorEntry {
    /// Term bytes.
    pub term: Vec<u8>,

    /// Occurrence count within the document.
    pub freq: u32,

    /// Positions, present when the field stores positions in its vector.
    pub positions: Vec<u32>,

    /// (start, end) character offsets, present when the field stores offsets.
    pub offsets: Vec<(u32, u32)>,
}

/// The term vector of one field of one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TermVector {
    /// Field name.
    pub field: String,

    /// Entries sorted by term bytes.
    pub entries: Vec<VectorEntry>,
}
