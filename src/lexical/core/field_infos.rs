//! Field metadata (`.fnm`).

use ahash::AHashMap;

use crate::error::{Result, SpindleError};
use crate::storage::Storage;
use crate::storage::structured::{StructReader, StructWriter};

const FIELD_INFOS_VERSION: u32 = 1;

const IS_INDEXED: u8 = 0x1;
const HAS_POSITIONS: u8 = 0x2;
const STORE_TERM_VECTORS: u8 = 0x4;
const HAS_NORMS: u8 = 0x8;

/// Per-field flags. Field numbers are the order fields were first seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    pub number: u32,
    pub indexed: bool,
    pub has_positions: bool,
    pub store_term_vectors: bool,
    pub has_norms: bool,
}

impl FieldInfo {
    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.indexed {
            flags |= IS_INDEXED;
        }
        if self.has_positions {
            flags |= HAS_POSITIONS;
        }
        if self.store_term_vectors {
            flags |= STORE_TERM_VECTORS;
        }
        if self.has_norms {
            flags |= HAS_NORMS;
        }
        flags
    }
}

/// All fields of a segment, addressable by number and by name.
#[derive(Debug, Clone, Default)]
pub struct FieldInfos {
    by_number: Vec<FieldInfo>,
    by_name: AHashMap<String, u32>,
}

impl FieldInfos {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a field, or widen the flags of an existing one. Returns its number.
    pub fn add(
        &mut self,
        name: &str,
        indexed: bool,
        has_positions: bool,
        store_term_vectors: bool,
        has_norms: bool,
    ) -> u32 {
        if let Some(&number) = self.by_name.get(name) {
            let info = &mut self.by_number[number as usize];
            info.indexed |= indexed;
            info.has_positions |= has_positions;
            info.store_term_vectors |= store_term_vectors;
            info.has_norms |= has_norms;
            return number;
        }

        let number = self.by_number.len() as u32;
        self.by_number.push(FieldInfo {
            name: name.to_string(),
            number,
            indexed,
            has_positions,
            store_term_vectors,
            has_norms,
        });
        self.by_name.insert(name.to_string(), number);
        number
    }

    /// Register every field of `other`, keeping its flags.
    pub fn add_all(&mut self, other: &FieldInfos) {
        for info in other.iter() {
            self.add(
                &info.name,
                info.indexed,
                info.has_positions,
                info.store_term_vectors,
                info.has_norms,
            );
        }
    }

    pub fn field_number(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn field_info(&self, number: u32) -> Option<&FieldInfo> {
        self.by_number.get(number as usize)
    }

    pub fn by_name(&self, name: &str) -> Option<&FieldInfo> {
        self.field_number(name).and_then(|n| self.field_info(n))
    }

    /// Name of field `number`, or a corruption error for unknown numbers.
    pub fn field_name(&self, number: u32) -> Result<&str> {
        self.field_info(number)
            .map(|info| info.name.as_str())
            .ok_or_else(|| SpindleError::corrupt_index(format!("unknown field number {number}")))
    }

    pub fn len(&self) -> usize {
        self.by_number.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_number.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldInfo> {
        self.by_number.iter()
    }

    /// Whether any indexed field keeps positions.
    pub fn has_prox(&self) -> bool {
        self.by_number.iter().any(|f| f.indexed && f.has_positions)
    }

    /// Whether any field stores term vectors.
    pub fn has_vectors(&self) -> bool {
        self.by_number.iter().any(|f| f.store_term_vectors)
    }

    /// Read field infos from `name`, verifying the checksum.
    pub fn read(storage: &dyn Storage, name: &str) -> Result<Self> {
        let input = storage.open_input(name)?;
        let mut reader = StructReader::new(input)?;
        reader.check_header(name, FIELD_INFOS_VERSION)?;

        let count = reader.read_varint()?;
        let mut infos = FieldInfos::new();
        for _ in 0..count {
            let field = reader.read_string()?;
            let flags = reader.read_u8()?;
            infos.add(
                &field,
                flags & IS_INDEXED != 0,
                flags & HAS_POSITIONS != 0,
                flags & STORE_TERM_VECTORS != 0,
                flags & HAS_NORMS != 0,
            );
        }
        if infos.len() as u64 != count {
            return Err(SpindleError::corrupt_index(format!(
                "{name}: duplicate field names"
            )));
        }
        reader.verify_footer(name)?;
        reader.close()?;
        Ok(infos)
    }

    /// Write field infos to `name`.
    pub fn write(&self, storage: &dyn Storage, name: &str) -> Result<()> {
        let output = storage.create_output(name)?;
        let mut writer = StructWriter::new(output);
        writer.write_header(FIELD_INFOS_VERSION)?;
        writer.write_varint(self.by_number.len() as u64)?;
        for info in &self.by_number {
            writer.write_string(&info.name)?;
            writer.write_u8(info.flags())?;
        }
        writer.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_add_widens_flags() {
        let mut infos = FieldInfos::new();
        assert_eq!(infos.add("body", true, false, false, true), 0);
        assert_eq!(infos.add("id", false, false, false, false), 1);
        assert!(!infos.has_prox());

        assert_eq!(infos.add("body", true, true, false, true), 0);
        assert!(infos.has_prox());
        assert!(!infos.has_vectors());
        assert_eq!(infos.field_name(1).unwrap(), "id");
        assert!(infos.field_name(7).unwrap_err().is_corrupt_index());
    }

    #[test]
    fn test_write_read() {
        let storage = MemoryStorage::default();
        let mut infos = FieldInfos::new();
        infos.add("title", true, true, true, true);
        infos.add("id", false, false, false, false);
        infos.write(&storage, "_0.fnm").unwrap();

        let read = FieldInfos::read(&storage, "_0.fnm").unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read.by_name("title"), infos.by_name("title"));
        assert_eq!(read.by_name("id"), infos.by_name("id"));
        assert!(read.has_vectors());
        assert_eq!(storage.open_inputs(), 0);
    }
}
