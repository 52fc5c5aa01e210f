//! Compound file container.
//!
//! Packs many small files into one physical file so a segment costs a single
//! file handle. Layout:
//!
//! ```text
//! header | count: varint | (name: string, offset: u64, length: u64) * count | data ... | crc32
//! ```
//!
//! Offsets are absolute within the container. The reader exposes every entry
//! as a bounded [`SliceInput`] through the regular [`Storage`] trait.

use std::io::{self, Read, Seek, SeekFrom};

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::error::{Result, SpindleError};
use crate::storage::structured::{HEADER_LEN, StructReader, StructWriter};
use crate::storage::{Storage, StorageError, StorageInput, StorageOutput};
use crate::util::varint;

const COMPOUND_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy)]
struct Entry {
    offset: u64,
    length: u64,
}

/// Read-only view over a compound container.
#[derive(Debug)]
pub struct CompoundFileReader {
    name: String,
    base: Mutex<Option<Box<dyn StorageInput>>>,
    entries: AHashMap<String, Entry>,
}

impl CompoundFileReader {
    /// Open the container `name` stored in `storage`.
    pub fn open(storage: &dyn Storage, name: &str, buffer_size: usize) -> Result<Self> {
        let input = storage.open_input_buffered(name, buffer_size)?;
        let mut reader = StructReader::new(input)?;
        let result = Self::read_table(&mut reader, name);

        let mut input = reader.into_inner();
        match result {
            Ok(entries) => {
                log::debug!("opened compound file {name} with {} entries", entries.len());
                Ok(CompoundFileReader {
                    name: name.to_string(),
                    base: Mutex::new(Some(input)),
                    entries,
                })
            }
            Err(e) => {
                let _ = input.close();
                Err(e)
            }
        }
    }

    fn read_table<R: StorageInput>(
        reader: &mut StructReader<R>,
        name: &str,
    ) -> Result<AHashMap<String, Entry>> {
        reader.check_header(name, COMPOUND_VERSION)?;
        let count = reader.read_varint()?;
        let mut entries = AHashMap::with_capacity(count as usize);
        for _ in 0..count {
            let entry_name = reader.read_string()?;
            let offset = reader.read_u64()?;
            let length = reader.read_u64()?;
            if offset + length > reader.size() {
                return Err(SpindleError::corrupt_index(format!(
                    "{name}: entry {entry_name} runs past end of container"
                )));
            }
            entries.insert(entry_name, Entry { offset, length });
        }
        Ok(entries)
    }

    /// Name of the container file.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Close the container handle. Slices already handed out stay usable
    /// until they are closed themselves.
    pub fn close(&self) -> Result<()> {
        match self.base.lock().take() {
            Some(mut input) => input.close(),
            None => Ok(()),
        }
    }

    fn entry(&self, name: &str) -> Result<Entry> {
        self.entries
            .get(name)
            .copied()
            .ok_or_else(|| StorageError::FileNotFound(format!("{} in {}", name, self.name)).into())
    }
}

impl Storage for CompoundFileReader {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let entry = self.entry(name)?;
        let base = self.base.lock();
        let base = base.as_ref().ok_or_else(|| {
            SpindleError::invalid_operation(format!("compound file {} is closed", self.name))
        })?;
        let mut input = base.clone_input()?;
        input.seek(SeekFrom::Start(entry.offset))?;
        Ok(Box::new(SliceInput {
            input,
            offset: entry.offset,
            length: entry.length,
            position: 0,
        }))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        Err(StorageError::ReadOnly(format!("{} in {}", name, self.name)).into())
    }

    fn file_exists(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        Err(StorageError::ReadOnly(format!("{} in {}", name, self.name)).into())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        Ok(self.entry(name)?.length)
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// A bounded window over another input.
#[derive(Debug)]
pub struct SliceInput {
    input: Box<dyn StorageInput>,
    offset: u64,
    length: u64,
    position: u64,
}

impl Read for SliceInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.length.saturating_sub(self.position);
        if remaining == 0 {
            return Ok(0);
        }
        let len = buf.len().min(remaining as usize);
        let read = self.input.read(&mut buf[..len])?;
        self.position += read as u64;
        Ok(read)
    }
}

impl Seek for SliceInput {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(d) => self.length as i64 + d,
            SeekFrom::Current(d) => self.position as i64 + d,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of slice",
            ));
        }
        let target = (target as u64).min(self.length);
        self.input.seek(SeekFrom::Start(self.offset + target))?;
        self.position = target;
        Ok(target)
    }
}

impl StorageInput for SliceInput {
    fn size(&self) -> Result<u64> {
        Ok(self.length)
    }

    fn clone_input(&self) -> Result<Box<dyn StorageInput>> {
        let mut input = self.input.clone_input()?;
        input.seek(SeekFrom::Start(self.offset + self.position))?;
        Ok(Box::new(SliceInput {
            input,
            offset: self.offset,
            length: self.length,
            position: self.position,
        }))
    }

    fn close(&mut self) -> Result<()> {
        self.input.close()
    }
}

/// Packs existing files of a storage into one compound container.
pub struct CompoundFileWriter<'a> {
    storage: &'a dyn Storage,
    name: String,
    files: Vec<String>,
}

impl<'a> CompoundFileWriter<'a> {
    pub fn new(storage: &'a dyn Storage, name: &str) -> Self {
        CompoundFileWriter {
            storage,
            name: name.to_string(),
            files: Vec::new(),
        }
    }

    /// Queue a file for packing.
    pub fn add_file(&mut self, name: &str) -> Result<()> {
        if self.files.iter().any(|f| f == name) {
            return Err(SpindleError::invalid_operation(format!(
                "{name} already added to {}",
                self.name
            )));
        }
        self.files.push(name.to_string());
        Ok(())
    }

    /// Write the container. Source files are left in place.
    pub fn finish(self) -> Result<()> {
        let mut sizes = Vec::with_capacity(self.files.len());
        let mut table_len = HEADER_LEN + varint::encode_u64(self.files.len() as u64).len() as u64;
        for name in &self.files {
            let size = self.storage.file_size(name)?;
            sizes.push(size);
            table_len += varint::encode_u64(name.len() as u64).len() as u64 + name.len() as u64 + 16;
        }

        let output = self.storage.create_output(&self.name)?;
        let mut writer = StructWriter::new(output);
        writer.write_header(COMPOUND_VERSION)?;
        writer.write_varint(self.files.len() as u64)?;
        let mut offset = table_len;
        for (name, size) in self.files.iter().zip(&sizes) {
            writer.write_string(name)?;
            writer.write_u64(offset)?;
            writer.write_u64(*size)?;
            offset += size;
        }
        debug_assert_eq!(writer.position(), table_len);

        let mut buffer = vec![0u8; 16 * 1024];
        for (name, size) in self.files.iter().zip(&sizes) {
            let mut input = self.storage.open_input(name)?;
            let mut remaining = *size;
            while remaining > 0 {
                let len = buffer.len().min(remaining as usize);
                input.read_exact(&mut buffer[..len])?;
                writer.write_raw(&buffer[..len])?;
                remaining -= len as u64;
            }
            input.close()?;
        }
        writer.finish()?;
        log::debug!("wrote compound file {} with {} entries", self.name, self.files.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;
    use std::io::Write;

    fn write_file(storage: &MemoryStorage, name: &str, data: &[u8]) {
        let mut output = storage.create_output(name).unwrap();
        output.write_all(data).unwrap();
        output.close().unwrap();
    }

    #[test]
    fn test_pack_and_read() {
        let storage = MemoryStorage::default();
        write_file(&storage, "_0.fnm", b"field infos");
        write_file(&storage, "_0.frq", &[1, 2, 3, 4, 5]);
        write_file(&storage, "_0.nrm", b"");

        let mut writer = CompoundFileWriter::new(&storage, "_0.cfs");
        writer.add_file("_0.fnm").unwrap();
        writer.add_file("_0.frq").unwrap();
        writer.add_file("_0.nrm").unwrap();
        assert!(writer.add_file("_0.frq").is_err());
        writer.finish().unwrap();

        let reader = CompoundFileReader::open(&storage, "_0.cfs", 1024).unwrap();
        assert_eq!(reader.list_files().unwrap(), vec!["_0.fnm", "_0.frq", "_0.nrm"]);
        assert_eq!(reader.file_size("_0.frq").unwrap(), 5);

        let mut input = reader.open_input("_0.fnm").unwrap();
        let mut data = Vec::new();
        input.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"field infos");
        input.close().unwrap();

        let mut input = reader.open_input("_0.frq").unwrap();
        input.seek(SeekFrom::Start(3)).unwrap();
        let mut clone = input.clone_input().unwrap();
        let mut rest = Vec::new();
        clone.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, vec![4, 5]);
        input.close().unwrap();
        clone.close().unwrap();

        let err = reader.open_input("_0.tis").unwrap_err();
        assert!(err.is_io_kind(io::ErrorKind::NotFound));
        assert!(reader.create_output("_0.tis").is_err());

        reader.close().unwrap();
        assert_eq!(storage.open_inputs(), 0);
    }

    #[test]
    fn test_slice_does_not_read_past_entry() {
        let storage = MemoryStorage::default();
        write_file(&storage, "a", b"aaaa");
        write_file(&storage, "b", b"bbbb");

        let mut writer = CompoundFileWriter::new(&storage, "x.cfs");
        writer.add_file("a").unwrap();
        writer.add_file("b").unwrap();
        writer.finish().unwrap();

        let reader = CompoundFileReader::open(&storage, "x.cfs", 1024).unwrap();
        let mut input = reader.open_input("a").unwrap();
        let mut data = Vec::new();
        input.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"aaaa");
        assert_eq!(input.seek(SeekFrom::End(0)).unwrap(), 4);
    }

    #[test]
    fn test_corrupt_container() {
        let storage = MemoryStorage::default();
        storage.put_file("bad.cfs", vec![0; 16]);
        let err = CompoundFileReader::open(&storage, "bad.cfs", 1024).unwrap_err();
        assert!(err.is_corrupt_index());
        assert_eq!(storage.open_inputs(), 0);
    }
}
