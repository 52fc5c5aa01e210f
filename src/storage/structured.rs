//! Structured file I/O for binary data serialization.
//!
//! Every segment file produced by Spindle has the same frame:
//!
//! ```text
//! magic: u32 | version: u32 | payload ... | crc32(header + payload): u32
//! ```
//!
//! [`StructWriter`] maintains the running checksum while writing and appends
//! the footer on [`finish`](StructWriter::finish). [`StructReader`] checks the
//! header and, for files read front to back, verifies the footer.

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Result, SpindleError};
use crate::storage::{Storage, StorageInput, StorageOutput};
use crate::util::varint;

/// Magic number at the start of every structured file.
pub const CODEC_MAGIC: u32 = 0x3fd7_6c17;

/// Bytes taken by the magic and version header.
pub const HEADER_LEN: u64 = 8;

/// Bytes taken by the checksum footer.
pub const FOOTER_LEN: u64 = 4;

/// Open `name` for random access after checking its header.
///
/// The returned input is positioned right after the header. It is closed
/// again when the header check fails.
pub fn open_input_checked(
    storage: &dyn Storage,
    name: &str,
    buffer_size: usize,
    max_version: u32,
) -> Result<Box<dyn StorageInput>> {
    let input = storage.open_input_buffered(name, buffer_size)?;
    let mut reader = StructReader::new(input)?;
    let checked = reader.check_header(name, max_version);
    let mut input = reader.into_inner();
    match checked {
        Ok(_) => Ok(input),
        Err(e) => {
            let _ = input.close();
            Err(e)
        }
    }
}

/// A structured file writer for binary data.
pub struct StructWriter<W: StorageOutput> {
    writer: W,
    hasher: crc32fast::Hasher,
    position: u64,
}

impl<W: StorageOutput> StructWriter<W> {
    /// Create a new structured file writer.
    pub fn new(writer: W) -> Self {
        StructWriter {
            writer,
            hasher: crc32fast::Hasher::new(),
            position: 0,
        }
    }

    /// Write the magic number and a format version.
    pub fn write_header(&mut self, version: u32) -> Result<()> {
        self.write_u32(CODEC_MAGIC)?;
        self.write_u32(version)
    }

    /// Write a u8 value.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_raw(&[value])
    }

    /// Write a u32 value (little-endian).
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.writer.write_u32::<LittleEndian>(value)?;
        self.hasher.update(&value.to_le_bytes());
        self.position += 4;
        Ok(())
    }

    /// Write a u64 value (little-endian).
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.writer.write_u64::<LittleEndian>(value)?;
        self.hasher.update(&value.to_le_bytes());
        self.position += 8;
        Ok(())
    }

    /// Write a variable-length integer.
    pub fn write_varint(&mut self, value: u64) -> Result<()> {
        let encoded = varint::encode_u64(value);
        self.write_raw(&encoded)
    }

    /// Write a string with length prefix.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_bytes(value.as_bytes())
    }

    /// Write raw bytes with length prefix.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.write_varint(value.len() as u64)?;
        self.write_raw(value)
    }

    /// Write raw bytes without length prefix.
    pub fn write_raw(&mut self, value: &[u8]) -> Result<()> {
        self.writer.write_all(value)?;
        self.hasher.update(value);
        self.position += value.len() as u64;
        Ok(())
    }

    /// Get current file position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Append the checksum footer, then flush and close the output.
    pub fn finish(mut self) -> Result<()> {
        let checksum = self.hasher.clone().finalize();
        self.writer.write_u32::<LittleEndian>(checksum)?;
        self.writer.flush_and_sync()?;
        self.writer.close()
    }
}

/// A structured file reader for binary data.
pub struct StructReader<R: StorageInput> {
    reader: R,
    hasher: crc32fast::Hasher,
    position: u64,
    file_size: u64,
    sequential: bool,
}

impl<R: StorageInput> StructReader<R> {
    /// Create a new structured file reader positioned at the start of the input.
    pub fn new(reader: R) -> Result<Self> {
        let file_size = reader.size()?;
        Ok(StructReader {
            reader,
            hasher: crc32fast::Hasher::new(),
            position: 0,
            file_size,
            sequential: true,
        })
    }

    /// Read and validate the header, returning the format version.
    pub fn check_header(&mut self, name: &str, max_version: u32) -> Result<u32> {
        let magic = self.read_u32()?;
        if magic != CODEC_MAGIC {
            return Err(SpindleError::corrupt_index(format!(
                "{name}: codec header mismatch: actual magic {magic:#x} vs expected {CODEC_MAGIC:#x}"
            )));
        }
        let version = self.read_u32()?;
        if version == 0 || version > max_version {
            return Err(SpindleError::corrupt_index(format!(
                "{name}: unsupported format version {version} (max {max_version})"
            )));
        }
        Ok(version)
    }

    /// Read a u8 value.
    pub fn read_u8(&mut self) -> Result<u8> {
        let value = self.reader.read_u8()?;
        self.update(&[value]);
        Ok(value)
    }

    /// Read a u32 value (little-endian).
    pub fn read_u32(&mut self) -> Result<u32> {
        let value = self.reader.read_u32::<LittleEndian>()?;
        self.update(&value.to_le_bytes());
        Ok(value)
    }

    /// Read a u64 value (little-endian).
    pub fn read_u64(&mut self) -> Result<u64> {
        let value = self.reader.read_u64::<LittleEndian>()?;
        self.update(&value.to_le_bytes());
        Ok(value)
    }

    /// Read a variable-length integer.
    pub fn read_varint(&mut self) -> Result<u64> {
        let mut bytes = Vec::with_capacity(4);
        loop {
            let byte = self.reader.read_u8()?;
            bytes.push(byte);
            if byte & 0x80 == 0 {
                break;
            }
        }

        let (value, _) = varint::decode_u64(&bytes)?;
        self.update(&bytes);
        Ok(value)
    }

    /// Read a string with length prefix.
    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes)
            .map_err(|e| SpindleError::corrupt_index(format!("Invalid UTF-8: {e}")))
    }

    /// Read bytes with length prefix.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let length = self.read_varint()?;
        if self.position + length > self.file_size {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("length {length} runs past end of file"),
            )
            .into());
        }
        let mut bytes = vec![0u8; length as usize];
        self.reader.read_exact(&mut bytes)?;
        self.update(&bytes);
        Ok(bytes)
    }

    /// Move to an absolute position. Footer verification is no longer
    /// possible afterwards.
    pub fn seek(&mut self, position: u64) -> Result<()> {
        self.reader.seek(SeekFrom::Start(position))?;
        self.position = position;
        self.sequential = false;
        Ok(())
    }

    /// Get current file position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Get file size.
    pub fn size(&self) -> u64 {
        self.file_size
    }

    /// Read the footer and compare it with the checksum of everything read so far.
    ///
    /// The reader must be positioned right before the footer.
    pub fn verify_footer(&mut self, name: &str) -> Result<()> {
        if !self.sequential {
            return Err(SpindleError::invalid_operation(format!(
                "{name}: cannot verify checksum after seeking"
            )));
        }
        if self.position + FOOTER_LEN != self.file_size {
            return Err(SpindleError::corrupt_index(format!(
                "{name}: expected footer at {} but file length is {}",
                self.position, self.file_size
            )));
        }
        let expected = self.hasher.clone().finalize();
        let stored = self.reader.read_u32::<LittleEndian>()?;
        self.position += FOOTER_LEN;
        if stored != expected {
            return Err(SpindleError::corrupt_index(format!(
                "{name}: checksum failed (stored {stored:#x}, computed {expected:#x})"
            )));
        }
        Ok(())
    }

    /// Access the underlying input.
    pub fn input_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Give back the underlying input, left at the current position.
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Close the reader.
    pub fn close(mut self) -> Result<()> {
        self.reader.close()
    }

    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.position += data.len() as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_struct_writer_reader() {
        let storage = MemoryStorage::default();

        let output = storage.create_output("test.bin").unwrap();
        let mut writer = StructWriter::new(output);
        writer.write_header(1).unwrap();
        writer.write_u8(42).unwrap();
        writer.write_u32(1234).unwrap();
        writer.write_u64(567890).unwrap();
        writer.write_varint(300).unwrap();
        writer.write_string("hello").unwrap();
        assert_eq!(writer.position(), HEADER_LEN + 1 + 4 + 8 + 2 + 6);
        writer.finish().unwrap();

        let input = storage.open_input("test.bin").unwrap();
        let mut reader = StructReader::new(input).unwrap();
        assert_eq!(reader.check_header("test.bin", 1).unwrap(), 1);
        assert_eq!(reader.read_u8().unwrap(), 42);
        assert_eq!(reader.read_u32().unwrap(), 1234);
        assert_eq!(reader.read_u64().unwrap(), 567890);
        assert_eq!(reader.read_varint().unwrap(), 300);
        assert_eq!(reader.read_string().unwrap(), "hello");
        reader.verify_footer("test.bin").unwrap();
        reader.close().unwrap();
        assert_eq!(storage.open_inputs(), 0);
    }

    #[test]
    fn test_bad_magic_is_corruption() {
        let storage = MemoryStorage::default();
        storage.put_file("bad.bin", vec![1, 2, 3, 4, 1, 0, 0, 0]);

        let input = storage.open_input("bad.bin").unwrap();
        let mut reader = StructReader::new(input).unwrap();
        let err = reader.check_header("bad.bin", 1).unwrap_err();
        assert!(err.is_corrupt_index());
    }

    #[test]
    fn test_checksum_mismatch() {
        let storage = MemoryStorage::default();
        let output = storage.create_output("test.bin").unwrap();
        let mut writer = StructWriter::new(output);
        writer.write_header(1).unwrap();
        writer.write_u32(7).unwrap();
        writer.finish().unwrap();

        let mut data = storage.read_file("test.bin").unwrap();
        data[HEADER_LEN as usize] ^= 0xff;
        storage.put_file("test.bin", data);

        let input = storage.open_input("test.bin").unwrap();
        let mut reader = StructReader::new(input).unwrap();
        reader.check_header("test.bin", 1).unwrap();
        reader.read_u32().unwrap();
        assert!(reader.verify_footer("test.bin").unwrap_err().is_corrupt_index());
    }

    #[test]
    fn test_truncated_file_is_io_error() {
        let storage = MemoryStorage::default();
        storage.put_file("short.bin", CODEC_MAGIC.to_le_bytes().to_vec());

        let input = storage.open_input("short.bin").unwrap();
        let mut reader = StructReader::new(input).unwrap();
        let err = reader.check_header("short.bin", 1).unwrap_err();
        assert!(err.is_io_kind(std::io::ErrorKind::UnexpectedEof));
    }
}
