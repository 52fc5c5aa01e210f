//! File-based storage implementation.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

use crate::error::{Result, SpindleError};
use crate::storage::{Storage, StorageError, StorageInput, StorageOutput};

/// Configuration for file-based storage.
#[derive(Debug, Clone)]
pub struct FileStorageConfig {
    /// Root directory of the index.
    pub path: PathBuf,

    /// Read files through memory maps instead of buffered reads.
    pub use_mmap: bool,

    /// Default buffer size for inputs and outputs.
    pub buffer_size: usize,

    /// Sync each output to disk when it is closed.
    pub sync_writes: bool,
}

impl FileStorageConfig {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileStorageConfig {
            path: path.as_ref().to_path_buf(),
            use_mmap: false,
            buffer_size: 65536,
            sync_writes: false,
        }
    }
}

/// A file-based storage implementation.
#[derive(Debug)]
pub struct FileStorage {
    /// The root directory for storage.
    directory: PathBuf,
    /// Storage configuration.
    config: FileStorageConfig,
}

impl FileStorage {
    /// Create a new file storage in the given directory.
    pub fn new<P: AsRef<Path>>(directory: P, config: FileStorageConfig) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();

        if !directory.exists() {
            std::fs::create_dir_all(&directory)
                .map_err(|e| SpindleError::storage(format!("Failed to create directory: {e}")))?;
        }

        if !directory.is_dir() {
            return Err(SpindleError::storage(format!(
                "Path is not a directory: {}",
                directory.display()
            )));
        }

        Ok(FileStorage { directory, config })
    }

    /// Get the full path for a file name.
    fn file_path(&self, name: &str) -> PathBuf {
        self.directory.join(name)
    }

    fn open_file(&self, name: &str) -> Result<File> {
        File::open(self.file_path(name)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::FileNotFound(name.to_string()).into()
            } else {
                SpindleError::Io(e)
            }
        })
    }
}

impl Storage for FileStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        self.open_input_buffered(name, self.config.buffer_size)
    }

    fn open_input_buffered(
        &self,
        name: &str,
        buffer_size: usize,
    ) -> Result<Box<dyn StorageInput>> {
        let file = self.open_file(name)?;

        if self.config.use_mmap {
            // SAFETY: index files are written once and never modified in place.
            let mmap = unsafe { Mmap::map(&file)? };
            return Ok(Box::new(MmapInput::new(Arc::new(mmap))));
        }

        Ok(Box::new(FileInput::new(
            file,
            self.file_path(name),
            buffer_size,
        )?))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.file_path(name))
            .map_err(|e| StorageError::IoError(e.to_string()))?;

        Ok(Box::new(FileOutput::new(
            file,
            self.config.buffer_size,
            self.config.sync_writes,
        )))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.file_path(name).is_file()
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        std::fs::remove_file(self.file_path(name)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::FileNotFound(name.to_string()).into()
            } else {
                SpindleError::Io(e)
            }
        })
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.directory)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    files.push(name.to_string());
                }
            }
        }
        files.sort();
        Ok(files)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        let metadata = std::fs::metadata(self.file_path(name)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::FileNotFound(name.to_string()).into()
            } else {
                SpindleError::Io(e)
            }
        })?;
        Ok(metadata.len())
    }

    fn sync(&self) -> Result<()> {
        File::open(&self.directory)?.sync_all()?;
        Ok(())
    }
}

/// A buffered file input.
#[derive(Debug)]
pub struct FileInput {
    reader: Option<BufReader<File>>,
    path: PathBuf,
    buffer_size: usize,
    size: u64,
}

impl FileInput {
    fn new(file: File, path: PathBuf, buffer_size: usize) -> Result<Self> {
        let size = file.metadata()?.len();
        let reader = BufReader::with_capacity(buffer_size.max(1), file);

        Ok(FileInput {
            reader: Some(reader),
            path,
            buffer_size,
            size,
        })
    }

    fn reader(&mut self) -> std::io::Result<&mut BufReader<File>> {
        self.reader
            .as_mut()
            .ok_or_else(|| std::io::Error::other("Input is closed"))
    }
}

impl Read for FileInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader()?.read(buf)
    }
}

impl Seek for FileInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.reader()?.seek(pos)
    }
}

impl StorageInput for FileInput {
    fn size(&self) -> Result<u64> {
        Ok(self.size)
    }

    fn clone_input(&self) -> Result<Box<dyn StorageInput>> {
        let file = File::open(&self.path)?;
        let mut clone = FileInput::new(file, self.path.clone(), self.buffer_size)?;
        if let Some(reader) = &self.reader {
            // the OS cursor runs ahead of the reader by the unread buffered bytes
            let mut file: &File = reader.get_ref();
            let position = file.stream_position()? - reader.buffer().len() as u64;
            clone.seek(SeekFrom::Start(position))?;
        }
        Ok(Box::new(clone))
    }

    fn close(&mut self) -> Result<()> {
        self.reader = None;
        Ok(())
    }
}

/// A memory-mapped file input.
#[derive(Debug)]
pub struct MmapInput {
    mmap: Option<Arc<Mmap>>,
    position: u64,
    size: u64,
}

impl MmapInput {
    fn new(mmap: Arc<Mmap>) -> Self {
        let size = mmap.len() as u64;
        MmapInput {
            mmap: Some(mmap),
            position: 0,
            size,
        }
    }
}

impl Read for MmapInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mmap = self
            .mmap
            .as_ref()
            .ok_or_else(|| std::io::Error::other("Input is closed"))?;
        let start = (self.position as usize).min(mmap.len());
        let n = buf.len().min(mmap.len() - start);
        buf[..n].copy_from_slice(&mmap[start..start + n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for MmapInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.size as i64 + offset,
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

impl StorageInput for MmapInput {
    fn size(&self) -> Result<u64> {
        Ok(self.size)
    }

    fn clone_input(&self) -> Result<Box<dyn StorageInput>> {
        let mmap = self
            .mmap
            .as_ref()
            .ok_or_else(|| SpindleError::storage("Input is closed"))?;
        let mut clone = MmapInput::new(Arc::clone(mmap));
        clone.position = self.position;
        Ok(Box::new(clone))
    }

    fn close(&mut self) -> Result<()> {
        self.mmap = None;
        Ok(())
    }
}

/// A file output implementation.
#[derive(Debug)]
pub struct FileOutput {
    writer: Option<BufWriter<File>>,
    sync_writes: bool,
    position: u64,
}

impl FileOutput {
    fn new(file: File, buffer_size: usize, sync_writes: bool) -> Self {
        FileOutput {
            writer: Some(BufWriter::with_capacity(buffer_size.max(1), file)),
            sync_writes,
            position: 0,
        }
    }
}

impl Write for FileOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| std::io::Error::other("Output is closed"))?;
        let written = writer.write(buf)?;
        self.position += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl StorageOutput for FileOutput {
    fn flush_and_sync(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    fn position(&self) -> Result<u64> {
        Ok(self.position)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            if self.sync_writes {
                writer.get_ref().sync_all()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_storage(use_mmap: bool) -> (TempDir, FileStorage) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = FileStorageConfig::new(temp_dir.path());
        config.use_mmap = use_mmap;
        let storage = FileStorage::new(temp_dir.path(), config).unwrap();
        (temp_dir, storage)
    }

    #[test]
    fn test_create_and_read_file() {
        let (_temp_dir, storage) = create_test_storage(false);

        let mut output = storage.create_output("test.bin").unwrap();
        output.write_all(b"Hello, World!").unwrap();
        output.close().unwrap();

        let mut input = storage.open_input_buffered("test.bin", 4).unwrap();
        let mut buffer = Vec::new();
        input.read_to_end(&mut buffer).unwrap();

        assert_eq!(buffer, b"Hello, World!");
        assert_eq!(input.size().unwrap(), 13);
    }

    #[test]
    fn test_clone_keeps_position() {
        for use_mmap in [false, true] {
            let (_temp_dir, storage) = create_test_storage(use_mmap);
            let mut output = storage.create_output("test.bin").unwrap();
            output.write_all(b"0123456789").unwrap();
            output.close().unwrap();

            let mut input = storage.open_input_buffered("test.bin", 4).unwrap();
            let mut byte = [0u8; 3];
            input.read_exact(&mut byte).unwrap();

            let mut clone = input.clone_input().unwrap();
            clone.read_exact(&mut byte).unwrap();
            assert_eq!(&byte, b"345");

            input.read_exact(&mut byte).unwrap();
            assert_eq!(&byte, b"345");
        }
    }

    #[test]
    fn test_file_operations() {
        let (_temp_dir, storage) = create_test_storage(false);

        assert!(!storage.file_exists("test.bin"));

        let mut output = storage.create_output("test.bin").unwrap();
        output.write_all(b"Test content").unwrap();
        output.close().unwrap();

        assert!(storage.file_exists("test.bin"));
        assert_eq!(storage.file_size("test.bin").unwrap(), 12);
        assert_eq!(storage.list_files().unwrap(), vec!["test.bin"]);

        storage.delete_file("test.bin").unwrap();
        assert!(!storage.file_exists("test.bin"));
    }

    #[test]
    fn test_file_not_found() {
        let (_temp_dir, storage) = create_test_storage(false);

        let err = storage.open_input("nonexistent.bin").unwrap_err();
        assert!(err.is_io_kind(std::io::ErrorKind::NotFound));
        assert!(storage.file_size("nonexistent.bin").is_err());
    }

    #[test]
    fn test_closed_input_rejects_reads() {
        let (_temp_dir, storage) = create_test_storage(false);
        let mut output = storage.create_output("test.bin").unwrap();
        output.write_all(b"abc").unwrap();
        output.close().unwrap();

        let mut input = storage.open_input("test.bin").unwrap();
        input.close().unwrap();
        let mut buffer = [0u8; 1];
        assert!(input.read(&mut buffer).is_err());
    }
}
