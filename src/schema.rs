//! Per-segment field metadata and the unified-schema fold used by merging.
//!
//! Each segment carries a [`FieldSchema`]: an ordinal-ordered list of
//! [`FieldDescriptor`]s. When segments are merged, their schemas are folded
//! into one unified schema whose capability flags are the logical OR of all
//! contributing segments' flags. Two segments may assign different ordinals
//! to the same field name; the unified schema assigns its own.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{PilumError, Result};
use crate::storage::Storage;

/// Metadata for a single field within a segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name.
    pub name: String,

    /// Ordinal assigned by the owning schema.
    pub ordinal: u32,

    /// Whether the field is indexed (has postings).
    pub indexed: bool,

    /// Whether term vectors are stored for this field.
    pub stores_vector: bool,

    /// Whether positions are stored inside the term vector.
    pub stores_positions_in_vector: bool,

    /// Whether character offsets are stored inside the term vector.
    pub stores_offsets_in_vector: bool,

    /// Whether this field skips norm bytes.
    pub omits_norms: bool,

    /// Whether postings carry per-position payloads.
    pub stores_payloads: bool,

    /// Whether postings omit frequencies and positions (docs only).
    pub omits_positions: bool,
}

impl FieldDescriptor {
    /// Create a descriptor for a plain indexed field.
    pub fn indexed(name: &str, ordinal: u32) -> Self {
        FieldDescriptor {
            name: name.to_string(),
            ordinal,
            indexed: true,
            stores_vector: false,
            stores_positions_in_vector: false,
            stores_offsets_in_vector: false,
            omits_norms: false,
            stores_payloads: false,
            omits_positions: false,
        }
    }

    /// Create a descriptor for an unindexed (stored-only) field.
    pub fn unindexed(name: &str, ordinal: u32) -> Self {
        FieldDescriptor {
            indexed: false,
            omits_norms: true,
            ..Self::indexed(name, ordinal)
        }
    }

    /// Whether this field contributes a norms byte per live document.
    pub fn has_norms(&self) -> bool {
        self.indexed && !self.omits_norms
    }
}

/// An ordinal-ordered collection of field descriptors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldSchema {
    fields: Vec<FieldDescriptor>,

    #[serde(skip)]
    by_name: AHashMap<String, u32>,
}

impl FieldSchema {
    /// Create an empty schema.
    pub fn new() -> Self {
        FieldSchema::default()
    }

    /// Number of fields in the schema.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate fields in ordinal order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    /// Look up a field by ordinal.
    pub fn by_ordinal(&self, ordinal: u32) -> Option<&FieldDescriptor> {
        self.fields.get(ordinal as usize)
    }

    /// Look up a field by name.
    pub fn by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.by_name
            .get(name)
            .and_then(|&ord| self.fields.get(ord as usize))
    }

    /// Ordinal of a field by name.
    pub fn ordinal(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    /// Fold one field's capabilities into the schema.
    ///
    /// A new field gets the next free ordinal; an existing field keeps its
    /// ordinal and ORs every flag. Note that `omits_norms` ORs too: once any
    /// contributor dropped its norms there is no byte to merge for those
    /// documents, so the merged field stays norm-less.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &mut self,
        name: &str,
        indexed: bool,
        stores_vector: bool,
        stores_positions_in_vector: bool,
        stores_offsets_in_vector: bool,
        omits_norms: bool,
        stores_payloads: bool,
        omits_positions: bool,
    ) -> u32 {
        if let Some(&ordinal) = self.by_name.get(name) {
            let fi = &mut self.fields[ordinal as usize];
            fi.indexed |= indexed;
            fi.stores_vector |= stores_vector;
            fi.stores_positions_in_vector |= stores_positions_in_vector;
            fi.stores_offsets_in_vector |= stores_offsets_in_vector;
            fi.omits_norms |= omits_norms;
            fi.stores_payloads |= stores_payloads;
            fi.omits_positions |= omits_positions;
            ordinal
        } else {
            let ordinal = self.fields.len() as u32;
            self.fields.push(FieldDescriptor {
                name: name.to_string(),
                ordinal,
                indexed,
                stores_vector,
                stores_positions_in_vector,
                stores_offsets_in_vector,
                omits_norms,
                stores_payloads,
                omits_positions,
            });
            self.by_name.insert(name.to_string(), ordinal);
            ordinal
        }
    }

    /// Fold a complete descriptor into the schema (flags OR as in [`FieldSchema::add`]).
    pub fn add_descriptor(&mut self, fi: &FieldDescriptor) -> u32 {
        self.add(
            &fi.name,
            fi.indexed,
            fi.stores_vector,
            fi.stores_positions_in_vector,
            fi.stores_offsets_in_vector,
            fi.omits_norms,
            fi.stores_payloads,
            fi.omits_positions,
        )
    }

    /// Whether any field stores term vectors.
    pub fn has_vectors(&self) -> bool {
        self.fields.iter().any(|f| f.stores_vector)
    }

    /// Whether any field needs a norms byte per document.
    pub fn has_norms(&self) -> bool {
        self.fields.iter().any(|f| f.has_norms())
    }

    /// Whether this schema's name -> ordinal mapping is identical to `other`'s
    /// for every field `other` defines.
    ///
    /// This is the precondition for the bulk byte-copy fast paths: a stored
    /// record encoded under `other`'s numbering re-emits unchanged under this
    /// schema only when the numbering agrees.
    pub fn same_numbering(&self, other: &FieldSchema) -> bool {
        if other.fields.len() > self.fields.len() {
            return false;
        }
        other
            .fields
            .iter()
            .enumerate()
            .all(|(i, fi)| self.fields[i].name == fi.name)
    }

    /// Persist the schema to a storage file as JSON.
    pub fn write(&self, storage: &dyn Storage, name: &str) -> Result<()> {
        let mut output = storage.create_output(name)?;
        serde_json::to_writer(&mut output, &self.fields)?;
        output.close()?;
        Ok(())
    }

    /// Load a schema previously written by [`FieldSchema::write`].
    pub fn load(storage: &dyn Storage, name: &str) -> Result<Self> {
        let input = storage.open_input(name)?;
        let fields: Vec<FieldDescriptor> = serde_json::from_reader(input)?;
        for (i, fi) in fields.iter().enumerate() {
            if fi.ordinal as usize != i {
                return Err(PilumError::schema(format!(
                    "field '{}' has ordinal {} at position {i}",
                    fi.name, fi.ordinal
                )));
            }
        }
        let by_name = fields
            .iter()
            .map(|f| (f.name.clone(), f.ordinal))
            .collect();
        Ok(FieldSchema { fields, by_name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_add_assigns_ordinals_in_order() {
        let mut schema = FieldSchema::new();
        assert_eq!(schema.add("title", true, false, false, false, false, false, false), 0);
        assert_eq!(schema.add("body", true, false, false, false, false, false, false), 1);
        assert_eq!(schema.ordinal("title"), Some(0));
        assert_eq!(schema.ordinal("body"), Some(1));
    }

    #[test]
    fn test_flags_accumulate() {
        let mut schema = FieldSchema::new();
        // body: positions in vector from one segment only
        schema.add("body", true, true, true, false, false, false, false);
        schema.add("body", true, true, false, false, false, false, false);

        let body = schema.by_name("body").unwrap();
        assert!(body.indexed);
        assert!(body.stores_vector);
        assert!(body.stores_positions_in_vector);
        assert!(!body.stores_offsets_in_vector);
    }

    #[test]
    fn test_omits_norms_is_sticky() {
        let mut schema = FieldSchema::new();
        schema.add("f", true, false, false, false, false, false, false);
        assert!(schema.by_name("f").unwrap().has_norms());

        // One contributor without norms leaves the merged field norm-less.
        schema.add("f", true, false, false, false, true, false, false);
        assert!(!schema.by_name("f").unwrap().has_norms());
    }

    #[test]
    fn test_same_numbering() {
        let mut merged = FieldSchema::new();
        merged.add("a", true, false, false, false, false, false, false);
        merged.add("b", true, false, false, false, false, false, false);

        let mut matching = FieldSchema::new();
        matching.add("a", true, false, false, false, false, false, false);
        assert!(merged.same_numbering(&matching));

        let mut mismatched = FieldSchema::new();
        mismatched.add("b", true, false, false, false, false, false, false);
        assert!(!merged.same_numbering(&mismatched));
    }

    #[test]
    fn test_write_and_load() {
        let storage = MemoryStorage::new_default();
        let mut schema = FieldSchema::new();
        schema.add("title", true, true, false, true, false, false, false);
        schema.add("id", false, false, false, false, true, false, false);

        schema.write(&storage, "seg.fnm").unwrap();
        let loaded = FieldSchema::load(&storage, "seg.fnm").unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.by_name("title"), schema.by_name("title"));
        assert_eq!(loaded.ordinal("id"), Some(1));
    }
}
