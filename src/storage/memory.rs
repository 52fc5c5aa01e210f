//! In-memory storage implementation for testing and caching.

use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::error::Result;
use crate::storage::{Storage, StorageError, StorageInput, StorageOutput};

/// Configuration for in-memory storage.
#[derive(Debug, Clone)]
pub struct MemoryStorageConfig {
    /// Initial number of file slots.
    pub initial_capacity: usize,
}

impl Default for MemoryStorageConfig {
    fn default() -> Self {
        MemoryStorageConfig {
            initial_capacity: 16,
        }
    }
}

type FileMap = Arc<RwLock<AHashMap<String, Arc<[u8]>>>>;

/// An in-memory storage implementation.
///
/// File contents are immutable once an output is closed, so every input can
/// share the same buffer. The storage counts the inputs that have been opened
/// (or cloned) and not yet released, which lets callers check that a reader
/// closed everything it opened.
#[derive(Debug)]
pub struct MemoryStorage {
    files: FileMap,
    open_inputs: Arc<AtomicUsize>,
}

impl MemoryStorage {
    /// Create a new memory storage.
    pub fn new(config: MemoryStorageConfig) -> Self {
        MemoryStorage {
            files: Arc::new(RwLock::new(AHashMap::with_capacity(
                config.initial_capacity,
            ))),
            open_inputs: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of inputs opened from this storage that are still live.
    pub fn open_inputs(&self) -> usize {
        self.open_inputs.load(Ordering::SeqCst)
    }

    /// Get the number of files stored.
    pub fn file_count(&self) -> usize {
        self.files.read().len()
    }

    /// Replace the contents of a file directly.
    pub fn put_file(&self, name: &str, data: Vec<u8>) {
        self.files.write().insert(name.to_string(), data.into());
    }

    /// Copy out the contents of a file.
    pub fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let files = self.files.read();
        let data = files
            .get(name)
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()))?;
        Ok(data.to_vec())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(MemoryStorageConfig::default())
    }
}

impl Storage for MemoryStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let files = self.files.read();
        let data = files
            .get(name)
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()))?;

        Ok(Box::new(MemoryInput::new(
            Arc::clone(data),
            Arc::clone(&self.open_inputs),
        )))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        Ok(Box::new(MemoryOutput::new(
            name.to_string(),
            Arc::clone(&self.files),
        )))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.files.read().contains_key(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.files
            .write()
            .remove(name)
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()))?;
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut file_names: Vec<String> = self.files.read().keys().cloned().collect();
        file_names.sort();
        Ok(file_names)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        let files = self.files.read();
        let data = files
            .get(name)
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()))?;
        Ok(data.len() as u64)
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// A memory-based input implementation.
#[derive(Debug)]
pub struct MemoryInput {
    data: Arc<[u8]>,
    position: u64,
    open_inputs: Arc<AtomicUsize>,
    closed: bool,
}

impl MemoryInput {
    fn new(data: Arc<[u8]>, open_inputs: Arc<AtomicUsize>) -> Self {
        open_inputs.fetch_add(1, Ordering::SeqCst);
        MemoryInput {
            data,
            position: 0,
            open_inputs,
            closed: false,
        }
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.open_inputs.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Read for MemoryInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.closed {
            return Err(std::io::Error::other("Input is closed"));
        }
        let start = (self.position as usize).min(self.data.len());
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for MemoryInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.data.len() as i64 + offset,
            SeekFrom::Current(offset) => self.position as i64 + offset,
        };
        if new_pos < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Invalid seek position",
            ));
        }
        self.position = new_pos as u64;
        Ok(self.position)
    }
}

impl StorageInput for MemoryInput {
    fn size(&self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn clone_input(&self) -> Result<Box<dyn StorageInput>> {
        let mut input = MemoryInput::new(Arc::clone(&self.data), Arc::clone(&self.open_inputs));
        input.position = self.position;
        Ok(Box::new(input))
    }

    fn close(&mut self) -> Result<()> {
        self.release();
        Ok(())
    }
}

impl Drop for MemoryInput {
    fn drop(&mut self) {
        self.release();
    }
}

/// A memory-based output implementation.
#[derive(Debug)]
pub struct MemoryOutput {
    name: String,
    buffer: Vec<u8>,
    files: FileMap,
    closed: bool,
}

impl MemoryOutput {
    fn new(name: String, files: FileMap) -> Self {
        MemoryOutput {
            name,
            buffer: Vec::new(),
            files,
            closed: false,
        }
    }
}

impl Write for MemoryOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.closed {
            return Err(std::io::Error::other("Output is closed"));
        }
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl StorageOutput for MemoryOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn position(&self) -> Result<u64> {
        Ok(self.buffer.len() as u64)
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            let data = std::mem::take(&mut self.buffer);
            self.files.write().insert(self.name.clone(), data.into());
        }
        Ok(())
    }
}
