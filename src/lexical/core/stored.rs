//! Stored fields (`.fdx`/`.fdt`) and term vectors (`.tvx`/`.tvd`).
//!
//! Both are a pointer file holding one `u64` offset per document into a data
//! file. Segments that share a document store read a window of it starting
//! at their doc store offset.

use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt};
use parking_lot::Mutex;

use crate::error::{Result, SpindleError};
use crate::lexical::core::field_infos::FieldInfos;
use crate::lexical::index::segment::{
    FIELDS_EXTENSION, FIELDS_INDEX_EXTENSION, VECTORS_DOCUMENTS_EXTENSION,
    VECTORS_INDEX_EXTENSION, segment_file_name,
};
use crate::storage::structured::{FOOTER_LEN, HEADER_LEN, StructWriter, open_input_checked};
use crate::storage::{Storage, StorageInput, StorageOutput};
use crate::util::varint;

const STORED_VERSION: u32 = 1;

/// Stored field values of one document, in the order they were added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredDocument {
    fields: Vec<(String, String)>,
}

impl StoredDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F: Into<String>, V: Into<String>>(&mut self, field: F, value: V) {
        self.fields.push((field.into(), value.into()));
    }

    /// First value of `field`.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.as_str())
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// One term of a term vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorTerm {
    pub text: String,
    pub positions: Vec<u32>,
}

impl VectorTerm {
    pub fn freq(&self) -> u32 {
        self.positions.len() as u32
    }
}

/// Terms of one field of one document, sorted by text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermVector {
    pub field: String,
    pub terms: Vec<VectorTerm>,
}

/// Pointer file plus data file, windowed by a document offset.
#[derive(Debug)]
struct DocFiles {
    index_name: String,
    index: Mutex<Option<Box<dyn StorageInput>>>,
    data: Mutex<Option<Box<dyn StorageInput>>>,
    doc_offset: u32,
    size: u32,
}

impl DocFiles {
    fn open(
        storage: &dyn Storage,
        index_name: String,
        data_name: String,
        buffer_size: usize,
        doc_offset: Option<u32>,
        doc_count: u32,
    ) -> Result<Self> {
        let index = open_input_checked(storage, &index_name, buffer_size, STORED_VERSION)?;
        let data = match open_input_checked(storage, &data_name, buffer_size, STORED_VERSION) {
            Ok(data) => data,
            Err(e) => {
                let mut index = index;
                let _ = index.close();
                return Err(e);
            }
        };

        let mut files = DocFiles {
            index_name,
            index: Mutex::new(Some(index)),
            data: Mutex::new(Some(data)),
            doc_offset: 0,
            size: 0,
        };
        match files.window(doc_offset, doc_count) {
            Ok((offset, size)) => {
                files.doc_offset = offset;
                files.size = size;
                Ok(files)
            }
            Err(e) => {
                let _ = files.close();
                Err(e)
            }
        }
    }

    fn window(&self, doc_offset: Option<u32>, doc_count: u32) -> Result<(u32, u32)> {
        let length = match self.index.lock().as_ref() {
            Some(index) => index.size()?,
            None => 0,
        };
        doc_window(&self.index_name, length, doc_offset, doc_count)
    }

    /// A private data stream positioned at `doc`.
    fn seek_doc(&self, doc: u32) -> Result<Box<dyn StorageInput>> {
        if doc >= self.size {
            return Err(SpindleError::invalid_operation(format!(
                "doc {doc} out of range ({} docs)",
                self.size
            )));
        }
        let mut index = clone_of(&self.index, &self.index_name)?;
        let entry = self.doc_offset as u64 + doc as u64;
        index.seek(SeekFrom::Start(HEADER_LEN + entry * 8))?;
        let pointer = index.read_u64::<LittleEndian>();
        index.close()?;

        let mut data = clone_of(&self.data, &self.index_name)?;
        data.seek(SeekFrom::Start(pointer?))?;
        Ok(data)
    }

    fn close(&self) -> Result<()> {
        let index = self.index.lock().take().map(|mut i| i.close());
        let data = self.data.lock().take().map(|mut d| d.close());
        index.unwrap_or(Ok(()))?;
        data.unwrap_or(Ok(()))
    }
}

/// Documents covered by an index file of `length` bytes: the whole file, or
/// `doc_count` entries from `doc_offset` in a shared doc store.
fn doc_window(
    name: &str,
    length: u64,
    doc_offset: Option<u32>,
    doc_count: u32,
) -> Result<(u32, u32)> {
    let stored = length.saturating_sub(HEADER_LEN + FOOTER_LEN) / 8;
    let stored = u32::try_from(stored).map_err(|_| {
        SpindleError::corrupt_index(format!("{name}: {stored} doc entries exceed the doc id space"))
    })?;
    match doc_offset {
        None => Ok((0, stored)),
        Some(offset) => {
            if offset as u64 + doc_count as u64 > stored as u64 {
                return Err(SpindleError::corrupt_index(format!(
                    "{name}: doc store holds {stored} docs, segment needs {offset}+{doc_count}"
                )));
            }
            Ok((offset, doc_count))
        }
    }
}

fn clone_of(
    slot: &Mutex<Option<Box<dyn StorageInput>>>,
    name: &str,
) -> Result<Box<dyn StorageInput>> {
    match slot.lock().as_ref() {
        Some(input) => input.clone_input(),
        None => Err(SpindleError::invalid_operation(format!("{name} is closed"))),
    }
}

/// Reader for stored field values.
#[derive(Debug)]
pub struct StoredFieldsReader {
    files: DocFiles,
    field_infos: Arc<FieldInfos>,
}

impl StoredFieldsReader {
    /// Open the stored fields of `segment`. With a doc store offset the
    /// reader covers `doc_count` documents starting at that offset.
    pub fn open(
        storage: &dyn Storage,
        segment: &str,
        field_infos: Arc<FieldInfos>,
        buffer_size: usize,
        doc_offset: Option<u32>,
        doc_count: u32,
    ) -> Result<Self> {
        let files = DocFiles::open(
            storage,
            segment_file_name(segment, FIELDS_INDEX_EXTENSION),
            segment_file_name(segment, FIELDS_EXTENSION),
            buffer_size,
            doc_offset,
            doc_count,
        )?;
        Ok(StoredFieldsReader { files, field_infos })
    }

    /// Number of documents visible through this reader.
    pub fn size(&self) -> u32 {
        self.files.size
    }

    pub fn document(&self, doc: u32) -> Result<StoredDocument> {
        let mut data = self.files.seek_doc(doc)?;
        let result = read_document(&mut data, &self.field_infos);
        data.close()?;
        result
    }

    pub fn close(&self) -> Result<()> {
        self.files.close()
    }
}

fn read_document(data: &mut Box<dyn StorageInput>, field_infos: &FieldInfos) -> Result<StoredDocument> {
    let count = varint::read_u64(data)?;
    let mut document = StoredDocument::new();
    for _ in 0..count {
        let field = field_infos.field_name(varint::read_u32(data)?)?.to_string();
        let value = read_string(data)?;
        document.add(field, value);
    }
    Ok(document)
}

fn read_string(data: &mut Box<dyn StorageInput>) -> Result<String> {
    let len = varint::read_u64(data)? as usize;
    let mut bytes = vec![0u8; len];
    data.read_exact(&mut bytes)?;
    String::from_utf8(bytes)
        .map_err(|e| SpindleError::corrupt_index(format!("stored value is not UTF-8: {e}")))
}

/// Reader for term vectors.
#[derive(Debug)]
pub struct TermVectorsReader {
    files: DocFiles,
    field_infos: Arc<FieldInfos>,
}

impl TermVectorsReader {
    pub fn open(
        storage: &dyn Storage,
        segment: &str,
        field_infos: Arc<FieldInfos>,
        buffer_size: usize,
        doc_offset: Option<u32>,
        doc_count: u32,
    ) -> Result<Self> {
        let files = DocFiles::open(
            storage,
            segment_file_name(segment, VECTORS_INDEX_EXTENSION),
            segment_file_name(segment, VECTORS_DOCUMENTS_EXTENSION),
            buffer_size,
            doc_offset,
            doc_count,
        )?;
        Ok(TermVectorsReader { files, field_infos })
    }

    pub fn size(&self) -> u32 {
        self.files.size
    }

    /// All term vectors of `doc`.
    pub fn get(&self, doc: u32) -> Result<Vec<TermVector>> {
        let mut data = self.files.seek_doc(doc)?;
        let result = self.read_vectors(&mut data);
        data.close()?;
        result
    }

    /// The term vector of `field` in `doc`, if one was stored.
    pub fn get_field(&self, doc: u32, field: &str) -> Result<Option<TermVector>> {
        Ok(self.get(doc)?.into_iter().find(|v| v.field == field))
    }

    pub fn close(&self) -> Result<()> {
        self.files.close()
    }

    fn read_vectors(&self, data: &mut Box<dyn StorageInput>) -> Result<Vec<TermVector>> {
        let field_count = varint::read_u64(data)?;
        let mut vectors = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            let field = self.field_infos.field_name(varint::read_u32(data)?)?.to_string();
            let term_count = varint::read_u64(data)?;
            let mut terms = Vec::with_capacity(term_count as usize);
            for _ in 0..term_count {
                let text = read_string(data)?;
                let freq = varint::read_u64(data)?;
                let mut positions = Vec::with_capacity(freq as usize);
                let mut position = 0;
                for _ in 0..freq {
                    position += varint::read_u32(data)?;
                    positions.push(position);
                }
                terms.push(VectorTerm { text, positions });
            }
            vectors.push(TermVector { field, terms });
        }
        Ok(vectors)
    }
}

/// Appends documents to a pointer file and a data file.
pub struct DocFilesWriter {
    index: StructWriter<Box<dyn StorageOutput>>,
    data: StructWriter<Box<dyn StorageOutput>>,
    doc_count: u32,
}

impl DocFilesWriter {
    /// Writer for `.fdx`/`.fdt` of `segment`.
    pub fn stored_fields(storage: &dyn Storage, segment: &str) -> Result<Self> {
        Self::create(storage, segment, FIELDS_INDEX_EXTENSION, FIELDS_EXTENSION)
    }

    /// Writer for `.tvx`/`.tvd` of `segment`.
    pub fn term_vectors(storage: &dyn Storage, segment: &str) -> Result<Self> {
        Self::create(storage, segment, VECTORS_INDEX_EXTENSION, VECTORS_DOCUMENTS_EXTENSION)
    }

    fn create(storage: &dyn Storage, segment: &str, index_ext: &str, data_ext: &str) -> Result<Self> {
        let mut index = StructWriter::new(storage.create_output(&segment_file_name(segment, index_ext))?);
        index.write_header(STORED_VERSION)?;
        let mut data = StructWriter::new(storage.create_output(&segment_file_name(segment, data_ext))?);
        data.write_header(STORED_VERSION)?;
        Ok(DocFilesWriter {
            index,
            data,
            doc_count: 0,
        })
    }

    /// Append stored values given as (field number, value).
    pub fn add_document(&mut self, fields: &[(u32, &str)]) -> Result<()> {
        self.index.write_u64(self.data.position())?;
        self.data.write_varint(fields.len() as u64)?;
        for (number, value) in fields {
            self.data.write_varint(*number as u64)?;
            self.data.write_string(value)?;
        }
        self.doc_count += 1;
        Ok(())
    }

    /// Append term vectors given as (field number, sorted terms with positions).
    pub fn add_vectors(&mut self, vectors: &[(u32, Vec<(String, Vec<u32>)>)]) -> Result<()> {
        self.index.write_u64(self.data.position())?;
        self.data.write_varint(vectors.len() as u64)?;
        for (number, terms) in vectors {
            self.data.write_varint(*number as u64)?;
            self.data.write_varint(terms.len() as u64)?;
            for (text, positions) in terms {
                self.data.write_string(text)?;
                self.data.write_varint(positions.len() as u64)?;
                let mut last = 0;
                for &position in positions {
                    self.data.write_varint((position - last) as u64)?;
                    last = position;
                }
            }
        }
        self.doc_count += 1;
        Ok(())
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    pub fn finish(self) -> Result<()> {
        self.index.finish()?;
        self.data.finish()
    }
}
