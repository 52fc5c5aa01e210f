//! Storage abstraction layer for Spindle.
//!
//! Segments are read through a [`Storage`]: a flat directory of named,
//! length-bounded, randomly seekable files. The same trait is implemented by
//! the on-disk and in-memory backends and by the compound container reader,
//! so a segment can be opened through a compound-file indirection without the
//! readers above noticing.
//!
//! Backends:
//!
//! - [`file::FileStorage`] keeps files in a directory, read through buffered
//!   or memory-mapped inputs.
//! - [`memory::MemoryStorage`] keeps files as shared byte buffers and counts
//!   live input handles.
//! - [`compound::CompoundFileReader`] is a read-only view over a `.cfs`/`.cfx`
//!   container.
//!
//! # Example
//!
//! ```
//! use spindle::storage::{StorageConfig, StorageFactory};
//! use spindle::storage::memory::MemoryStorageConfig;
//! use std::io::{Read, Write};
//!
//! # fn main() -> spindle::error::Result<()> {
//! let storage = StorageFactory::create(StorageConfig::Memory(MemoryStorageConfig::default()))?;
//!
//! let mut output = storage.create_output("_0.fnm")?;
//! output.write_all(b"fields")?;
//! output.close()?;
//!
//! let mut input = storage.open_input("_0.fnm")?;
//! let mut buffer = Vec::new();
//! input.read_to_end(&mut buffer)?;
//! assert_eq!(buffer, b"fields");
//! input.close()?;
//! # Ok(())
//! # }
//! ```

use std::io::{Read, Seek, Write};
use std::sync::Arc;

use crate::error::{Result, SpindleError};

pub mod compound;
pub mod file;
pub mod memory;
pub mod structured;

/// Flat namespace of named files.
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Open an existing file for reading.
    ///
    /// A missing file is reported as an I/O error of kind `NotFound`.
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>>;

    /// Open an existing file for reading with a caller-chosen read buffer.
    ///
    /// Backends without buffering ignore the hint.
    fn open_input_buffered(
        &self,
        name: &str,
        buffer_size: usize,
    ) -> Result<Box<dyn StorageInput>> {
        let _ = buffer_size;
        self.open_input(name)
    }

    /// Create a file for writing, truncating any existing file.
    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    /// Whether `name` is present.
    fn file_exists(&self, name: &str) -> bool;

    fn delete_file(&self, name: &str) -> Result<()>;

    /// List all files, sorted by name.
    fn list_files(&self) -> Result<Vec<String>>;

    /// Length of `name` in bytes.
    fn file_size(&self, name: &str) -> Result<u64>;

    /// Make all written files durable.
    fn sync(&self) -> Result<()>;
}

/// Seekable read cursor over one file.
///
/// Inputs are stateful cursors. Consumers that need to read concurrently
/// must each work on their own [`clone_input`](StorageInput::clone_input).
pub trait StorageInput: Read + Seek + Send + std::fmt::Debug {
    /// Total length of the file.
    fn size(&self) -> Result<u64>;

    /// Create an independent cursor over the same data.
    fn clone_input(&self) -> Result<Box<dyn StorageInput>>;

    /// Release the handle. Closing twice is a no-op.
    fn close(&mut self) -> Result<()>;
}

/// Sequential writer for a new file.
pub trait StorageOutput: Write + Send + std::fmt::Debug {
    /// Flush buffered data and sync it to the backing medium.
    fn flush_and_sync(&mut self) -> Result<()>;

    /// Current write position.
    fn position(&self) -> Result<u64>;

    /// Finish the file and make it visible to readers.
    fn close(&mut self) -> Result<()>;
}

impl StorageInput for Box<dyn StorageInput> {
    fn size(&self) -> Result<u64> {
        self.as_ref().size()
    }

    fn clone_input(&self) -> Result<Box<dyn StorageInput>> {
        self.as_ref().clone_input()
    }

    fn close(&mut self) -> Result<()> {
        self.as_mut().close()
    }
}

impl StorageOutput for Box<dyn StorageOutput> {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.as_mut().flush_and_sync()
    }

    fn position(&self) -> Result<u64> {
        self.as_ref().position()
    }

    fn close(&mut self) -> Result<()> {
        self.as_mut().close()
    }
}

/// Which backend [`StorageFactory::create`] builds.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    File(file::FileStorageConfig),
    Memory(memory::MemoryStorageConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory(memory::MemoryStorageConfig::default())
    }
}

pub struct StorageFactory;

impl StorageFactory {
    pub fn create(config: StorageConfig) -> Result<Arc<dyn Storage>> {
        match config {
            StorageConfig::Memory(config) => Ok(Arc::new(memory::MemoryStorage::new(config))),
            StorageConfig::File(config) => {
                let root = config.path.clone();
                Ok(Arc::new(file::FileStorage::new(&root, config)?))
            }
        }
    }
}

/// Failures raised by the storage backends before they reach callers as
/// [`SpindleError`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("no such file: {0}")]
    FileNotFound(String),

    #[error("{0}")]
    IoError(String),

    #[error("read-only storage: {0}")]
    ReadOnly(String),
}

impl From<StorageError> for SpindleError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::FileNotFound(name) => SpindleError::not_found(name),
            other => SpindleError::storage(other.to_string()),
        }
    }
}
