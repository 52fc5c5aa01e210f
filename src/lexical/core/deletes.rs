//! Deletion bitmaps (`<segment>_<gen>.del`).

use bit_vec::BitVec;

use crate::error::{Result, SpindleError};
use crate::storage::Storage;
use crate::storage::structured::{StructReader, StructWriter};

const DELETES_VERSION: u32 = 1;

/// Set of deleted document ordinals within one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedDocs {
    bits: BitVec,
    count: u32,
}

impl DeletedDocs {
    /// An empty bitmap for `max_doc` documents.
    pub fn new(max_doc: u32) -> Self {
        DeletedDocs {
            bits: BitVec::from_elem(max_doc as usize, false),
            count: 0,
        }
    }

    /// Mark `doc` deleted. Returns whether it was live before.
    pub fn delete(&mut self, doc: u32) -> Result<bool> {
        if doc as usize >= self.bits.len() {
            return Err(SpindleError::invalid_operation(format!(
                "doc {doc} out of range (max_doc {})",
                self.bits.len()
            )));
        }
        if self.bits[doc as usize] {
            return Ok(false);
        }
        self.bits.set(doc as usize, true);
        self.count += 1;
        Ok(true)
    }

    pub fn is_deleted(&self, doc: u32) -> bool {
        self.bits.get(doc as usize).unwrap_or(false)
    }

    /// Number of deleted documents.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Number of documents the bitmap covers.
    pub fn len(&self) -> u32 {
        self.bits.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn read(storage: &dyn Storage, name: &str, max_doc: u32) -> Result<Self> {
        let input = storage.open_input(name)?;
        let mut reader = StructReader::new(input)?;
        reader.check_header(name, DELETES_VERSION)?;
        let size = reader.read_u32()?;
        let count = reader.read_u32()?;
        let bytes = reader.read_bytes()?;
        reader.verify_footer(name)?;
        reader.close()?;

        if size != max_doc {
            return Err(SpindleError::corrupt_index(format!(
                "{name}: bitmap covers {size} docs but segment has {max_doc}"
            )));
        }
        let mut bits = BitVec::from_bytes(&bytes);
        bits.truncate(size as usize);
        if bits.len() != size as usize {
            return Err(SpindleError::corrupt_index(format!(
                "{name}: bitmap too short for {size} docs"
            )));
        }
        let actual = bits.iter().filter(|b| *b).count() as u32;
        if actual != count {
            return Err(SpindleError::corrupt_index(format!(
                "{name}: deleted count {count} does not match bitmap ({actual})"
            )));
        }
        Ok(DeletedDocs { bits, count })
    }

    pub fn write(&self, storage: &dyn Storage, name: &str) -> Result<()> {
        let mut writer = StructWriter::new(storage.create_output(name)?);
        writer.write_header(DELETES_VERSION)?;
        writer.write_u32(self.len())?;
        writer.write_u32(self.count)?;
        writer.write_bytes(&self.bits.to_bytes())?;
        writer.finish()
    }
}
