//! File system storage implementation.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use crate::error::{PilumError, Result};
use crate::storage::traits::{Storage, StorageConfig, StorageError, StorageInput, StorageOutput};

/// A file system storage implementation rooted at a directory.
#[derive(Debug)]
pub struct FileStorage {
    /// Directory holding all index files.
    dir: PathBuf,

    /// Storage configuration.
    config: StorageConfig,
}

impl FileStorage {
    /// Create a file storage rooted at `dir`, creating the directory if needed.
    pub fn new<P: Into<PathBuf>>(dir: P, config: StorageConfig) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(FileStorage { dir, config })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

impl Storage for FileStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let path = self.path(name);
        if !path.is_file() {
            return Err(StorageError::FileNotFound(name.to_string()).into());
        }
        let file = File::open(&path)?;
        let size = file.metadata()?.len();
        Ok(Box::new(FileInput {
            path,
            reader: BufReader::with_capacity(self.config.buffer_size, file),
            size,
        }))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        let path = self.path(name);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(Box::new(FileOutput {
            writer: BufWriter::with_capacity(self.config.buffer_size, file),
            sync_writes: self.config.sync_writes,
        }))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        let path = self.path(name);
        if path.is_file() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        let path = self.path(name);
        if !path.is_file() {
            return Err(StorageError::FileNotFound(name.to_string()).into());
        }
        Ok(fs::metadata(path)?.len())
    }

    fn sync(&self) -> Result<()> {
        // Individual outputs sync themselves on close; the directory entry
        // itself is synced here so renames and creates are durable.
        let dir = File::open(&self.dir)?;
        dir.sync_all()?;
        Ok(())
    }
}

/// Buffered input stream over a file.
#[derive(Debug)]
struct FileInput {
    path: PathBuf,
    reader: BufReader<File>,
    size: u64,
}

impl Read for FileInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Seek for FileInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.reader.seek(pos)
    }
}

impl StorageInput for FileInput {
    fn size(&self) -> Result<u64> {
        Ok(self.size)
    }

    fn clone_input(&self) -> Result<Box<dyn StorageInput>> {
        let file = File::open(&self.path)?;
        Ok(Box::new(FileInput {
            path: self.path.clone(),
            reader: BufReader::new(file),
            size: self.size,
        }))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Buffered output stream over a file.
#[derive(Debug)]
struct FileOutput {
    writer: BufWriter<File>,
    sync_writes: bool,
}

impl Write for FileOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl Seek for FileOutput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.writer.seek(pos)
    }
}

impl StorageOutput for FileOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    fn position(&self) -> Result<u64> {
        self.writer
            .get_ref()
            .stream_position()
            .map_err(PilumError::from)
            .map(|base| base + self.writer.buffer().len() as u64)
    }

    fn close(&mut self) -> Result<()> {
        self.writer.flush()?;
        if self.sync_writes {
            self.writer.get_ref().sync_all()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_storage_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path(), StorageConfig::default()).unwrap();

        {
            let mut output = storage.create_output("seg.nrm").unwrap();
            output.write_all(b"NRM\xff\x01\x02").unwrap();
            output.close().unwrap();
        }

        assert!(storage.file_exists("seg.nrm"));
        assert_eq!(storage.file_size("seg.nrm").unwrap(), 6);

        let mut input = storage.open_input("seg.nrm").unwrap();
        let mut contents = Vec::new();
        input.read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"NRM\xff\x01\x02");
    }

    #[test]
    fn test_list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path(), StorageConfig::default()).unwrap();

        storage.create_output("x.fdt").unwrap().close().unwrap();
        storage.create_output("x.fdx").unwrap().close().unwrap();
        assert_eq!(storage.list_files().unwrap(), vec!["x.fdt", "x.fdx"]);

        storage.delete_file("x.fdt").unwrap();
        assert_eq!(storage.list_files().unwrap(), vec!["x.fdx"]);
    }
}
