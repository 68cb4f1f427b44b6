//! Compound file packaging.
//!
//! A merged segment's files can be bundled into one compound file to keep
//! descriptor usage flat. Layout: a table of contents (entry count, then
//! per entry the file name and byte length) followed by the raw file
//! contents in table order; offsets are derived from the lengths. The
//! whole file carries the usual checksum trailer.

use ahash::AHashSet;
use parking_lot::Mutex;

use crate::error::{PilumError, Result};
use crate::storage::{Storage, StorageInput, StructReader, StructWriter};

/// File extension of a compound file.
pub const COMPOUND_EXTENSION: &str = "cfs";

/// Bundles existing storage files into one compound file.
pub struct CompoundFileWriter<'a> {
    storage: &'a dyn Storage,
    name: String,
    files: Vec<String>,
    seen: AHashSet<String>,
}

impl<'a> CompoundFileWriter<'a> {
    /// Create a writer producing `name` in `storage`.
    pub fn new(storage: &'a dyn Storage, name: &str) -> Self {
        CompoundFileWriter {
            storage,
            name: name.to_string(),
            files: Vec::new(),
            seen: AHashSet::new(),
        }
    }

    /// Schedule an existing file for packaging.
    pub fn add_file(&mut self, name: &str) -> Result<()> {
        if !self.seen.insert(name.to_string()) {
            return Err(PilumError::invalid_operation(format!(
                "file '{name}' already added to compound file"
            )));
        }
        if !self.storage.file_exists(name) {
            return Err(PilumError::storage(format!(
                "File not found: {name}"
            )));
        }
        self.files.push(name.to_string());
        Ok(())
    }

    /// Write the compound file. Source files are left in place.
    pub fn close(self) -> Result<()> {
        let output = self.storage.create_output(&self.name)?;
        let mut writer = StructWriter::new(output);

        writer.write_varint(self.files.len() as u64)?;
        for file in &self.files {
            writer.write_string(file)?;
            writer.write_varint(self.storage.file_size(file)?)?;
        }

        let mut buffer = Vec::new();
        for file in &self.files {
            let mut input = self.storage.open_input(file)?;
            let size = input.size()? as usize;
            buffer.resize(size, 0);
            std::io::Read::read_exact(&mut input, &mut buffer)?;
            writer.write_raw(&buffer)?;
        }
        writer.close()
    }
}

/// Reads files back out of a compound file.
pub struct CompoundFileReader {
    reader: Mutex<StructReader<Box<dyn StorageInput>>>,
    entries: Vec<(String, u64, u64)>,
}

impl CompoundFileReader {
    /// Open compound file `name`, loading its table of contents.
    pub fn open(storage: &dyn Storage, name: &str) -> Result<Self> {
        let input = storage.open_input(name)?;
        let mut reader = StructReader::new(input)?;

        let count = reader.read_varint()? as usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let file = reader.read_string()?;
            let length = reader.read_varint()?;
            entries.push((file, 0u64, length));
        }

        let mut offset = reader.position();
        for entry in &mut entries {
            entry.1 = offset;
            offset += entry.2;
        }

        Ok(CompoundFileReader {
            reader: Mutex::new(reader),
            entries,
        })
    }

    /// Names of the packaged files, in packaging order.
    pub fn files(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _, _)| name.as_str()).collect()
    }

    /// Whether `name` is packaged in this compound file.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _, _)| n == name)
    }

    /// Read the full contents of one packaged file.
    pub fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let &(_, offset, length) = self
            .entries
            .iter()
            .find(|(n, _, _)| n == name)
            .ok_or_else(|| PilumError::storage(format!("File not found: {name}")))?;
        let mut reader = self.reader.lock();
        reader.seek(offset)?;
        reader.read_raw(length as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::io::Write;

    fn write_file(storage: &MemoryStorage, name: &str, bytes: &[u8]) {
        let mut output = storage.create_output(name).unwrap();
        output.write_all(bytes).unwrap();
        output.close().unwrap();
    }

    #[test]
    fn test_package_and_read_back() {
        let storage = MemoryStorage::new_default();
        write_file(&storage, "s.fnm", b"schema bytes");
        write_file(&storage, "s.pst", b"postings");

        let mut writer = CompoundFileWriter::new(&storage, "s.cfs");
        writer.add_file("s.fnm").unwrap();
        writer.add_file("s.pst").unwrap();
        writer.close().unwrap();

        let reader = CompoundFileReader::open(&storage, "s.cfs").unwrap();
        assert_eq!(reader.files(), vec!["s.fnm", "s.pst"]);
        assert!(reader.contains("s.pst"));
        assert!(!reader.contains("s.fdt"));
        assert_eq!(reader.read_file("s.fnm").unwrap(), b"schema bytes");
        assert_eq!(reader.read_file("s.pst").unwrap(), b"postings");
    }

    #[test]
    fn test_duplicate_file_rejected() {
        let storage = MemoryStorage::new_default();
        write_file(&storage, "a", b"x");

        let mut writer = CompoundFileWriter::new(&storage, "out.cfs");
        writer.add_file("a").unwrap();
        assert!(writer.add_file("a").is_err());
    }

    #[test]
    fn test_missing_file_rejected() {
        let storage = MemoryStorage::new_default();
        let mut writer = CompoundFileWriter::new(&storage, "out.cfs");
        assert!(writer.add_file("ghost").is_err());
    }
}
