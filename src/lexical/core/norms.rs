//! Length norms (`.nrm`): one byte per document for every field with norms.
//!
//! ```text
//! header | field_count: varint | (field: varint, bytes: doc_count) * field_count | crc32
//! ```

use std::sync::Arc;

use ahash::AHashMap;

use crate::error::{Result, SpindleError};
use crate::storage::Storage;
use crate::storage::structured::{StructReader, StructWriter};

const NORMS_VERSION: u32 = 1;

/// Norm bytes of a segment, keyed by field number.
#[derive(Debug, Clone, Default)]
pub struct Norms {
    fields: AHashMap<u32, Arc<[u8]>>,
}

impl Norms {
    /// Read every field's norms from `name`, verifying the checksum.
    pub fn read(storage: &dyn Storage, name: &str, doc_count: u32) -> Result<Self> {
        let input = storage.open_input(name)?;
        let mut reader = StructReader::new(input)?;
        reader.check_header(name, NORMS_VERSION)?;

        let count = reader.read_varint()?;
        let mut fields = AHashMap::with_capacity(count as usize);
        for _ in 0..count {
            let field = reader.read_varint()? as u32;
            let mut bytes = vec![0u8; doc_count as usize];
            for byte in bytes.iter_mut() {
                *byte = reader.read_u8()?;
            }
            if fields.insert(field, Arc::from(bytes)).is_some() {
                return Err(SpindleError::corrupt_index(format!(
                    "{name}: norms of field {field} written twice"
                )));
            }
        }
        reader.verify_footer(name)?;
        reader.close()?;
        Ok(Norms { fields })
    }

    /// Norms of field `number`, if it has any.
    pub fn get(&self, number: u32) -> Option<Arc<[u8]>> {
        self.fields.get(&number).cloned()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Write `fields` (field number, one byte per document) to `name`.
pub fn write_norms(storage: &dyn Storage, name: &str, fields: &[(u32, Vec<u8>)]) -> Result<()> {
    let mut writer = StructWriter::new(storage.create_output(name)?);
    writer.write_header(NORMS_VERSION)?;
    writer.write_varint(fields.len() as u64)?;
    for (number, bytes) in fields {
        writer.write_varint(*number as u64)?;
        writer.write_raw(bytes)?;
    }
    writer.finish()
}
