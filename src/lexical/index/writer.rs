//! Minimal segment writer.
//!
//! Documents are split on whitespace, buffered in memory and written as one
//! segment by [`SegmentWriter::flush`]. Stored fields either go to the
//! segment's own files or are appended to a [`DocStoreWriter`] shared by
//! several segments. There is no flush policy and no analysis chain.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Result, SpindleError};
use crate::lexical::core::deletes::DeletedDocs;
use crate::lexical::core::field_infos::{FieldInfo, FieldInfos};
use crate::lexical::core::norms::write_norms;
use crate::lexical::core::posting::PostingsWriter;
use crate::lexical::core::stored::{DocFilesWriter, TermVector};
use crate::lexical::core::terms::TermInfosWriter;
use crate::lexical::index::config::WriterConfig;
use crate::lexical::index::segment::{
    COMPOUND_FILE_EXTENSION, COMPOUND_FILE_STORE_EXTENSION, DOC_STORE_EXTENSIONS,
    DocStoreInfo, FIELD_INFOS_EXTENSION, FIELDS_EXTENSION, FIELDS_INDEX_EXTENSION,
    FREQ_EXTENSION, NORMS_EXTENSION, PROX_EXTENSION, SegmentInfo, TERMS_EXTENSION,
    TERMS_INDEX_EXTENSION, VECTORS_DOCUMENTS_EXTENSION, VECTORS_INDEX_EXTENSION,
    segment_file_name,
};
use crate::lexical::search::similarity::{DefaultSimilarity, Similarity};
use crate::lexical::term::Term;
use crate::storage::Storage;
use crate::storage::compound::CompoundFileWriter;

/// Term vectors of one document: (field, sorted terms with positions).
type DocVectors = Vec<(String, Vec<(String, Vec<u32>)>)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Text { vectors: bool },
    Keyword,
    Stored,
}

#[derive(Debug, Clone)]
struct WriterField {
    name: String,
    value: String,
    kind: FieldKind,
}

/// A document to be written.
#[derive(Debug, Clone, Default)]
pub struct WriterDocument {
    fields: Vec<WriterField>,
}

impl WriterDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whitespace-tokenized, indexed with positions and norms, and stored.
    pub fn text<N: Into<String>, V: Into<String>>(self, name: N, value: V) -> Self {
        self.with(name, value, FieldKind::Text { vectors: false })
    }

    /// Like [`text`](Self::text), also storing term vectors.
    pub fn text_with_vectors<N: Into<String>, V: Into<String>>(self, name: N, value: V) -> Self {
        self.with(name, value, FieldKind::Text { vectors: true })
    }

    /// Indexed as a single term without positions or norms, and stored.
    pub fn keyword<N: Into<String>, V: Into<String>>(self, name: N, value: V) -> Self {
        self.with(name, value, FieldKind::Keyword)
    }

    /// Stored only.
    pub fn stored<N: Into<String>, V: Into<String>>(self, name: N, value: V) -> Self {
        self.with(name, value, FieldKind::Stored)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn with<N: Into<String>, V: Into<String>>(mut self, name: N, value: V, kind: FieldKind) -> Self {
        self.fields.push(WriterField {
            name: name.into(),
            value: value.into(),
            kind,
        });
        self
    }
}

/// Buffers documents and writes them as a single segment.
pub struct SegmentWriter<'a> {
    storage: &'a dyn Storage,
    name: String,
    config: WriterConfig,
    similarity: Arc<dyn Similarity>,

    field_infos: FieldInfos,
    postings: BTreeMap<Term, Vec<(u32, Vec<u32>)>>,
    stored: Vec<Vec<(String, String)>>,
    vectors: Vec<DocVectors>,
    norms: BTreeMap<String, Vec<u8>>,
    doc_count: u32,
}

impl std::fmt::Debug for SegmentWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentWriter")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("similarity", &self.similarity.name())
            .field("doc_count", &self.doc_count)
            .field("terms", &self.postings.len())
            .finish()
    }
}

impl<'a> SegmentWriter<'a> {
    pub fn new(storage: &'a dyn Storage, name: &str, config: WriterConfig) -> Self {
        SegmentWriter {
            storage,
            name: name.to_string(),
            config,
            similarity: Arc::new(DefaultSimilarity),
            field_infos: FieldInfos::new(),
            postings: BTreeMap::new(),
            stored: Vec::new(),
            vectors: Vec::new(),
            norms: BTreeMap::new(),
            doc_count: 0,
        }
    }

    /// Use `similarity` to compute length norms.
    pub fn with_similarity(mut self, similarity: Arc<dyn Similarity>) -> Self {
        self.similarity = similarity;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of buffered documents.
    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    /// Buffer a document and return its number within the segment.
    pub fn add_document(&mut self, document: WriterDocument) -> Result<u32> {
        let doc = self.doc_count;
        let mut stored = Vec::with_capacity(document.fields.len());
        let mut lengths: BTreeMap<String, u32> = BTreeMap::new();
        let mut vectors: BTreeMap<String, BTreeMap<String, Vec<u32>>> = BTreeMap::new();

        for field in document.fields {
            match field.kind {
                FieldKind::Text { vectors: with_vectors } => {
                    self.field_infos.add(&field.name, true, true, with_vectors, true);
                    let length = lengths.entry(field.name.clone()).or_insert(0);
                    for token in field.value.split_whitespace() {
                        let position = *length;
                        *length += 1;
                        self.add_posting(Term::new(&field.name, token), doc, position);
                        if with_vectors {
                            vectors
                                .entry(field.name.clone())
                                .or_default()
                                .entry(token.to_string())
                                .or_default()
                                .push(position);
                        }
                    }
                }
                FieldKind::Keyword => {
                    self.field_infos.add(&field.name, true, false, false, false);
                    self.add_posting(Term::new(&field.name, &field.value), doc, 0);
                }
                FieldKind::Stored => {
                    self.field_infos.add(&field.name, false, false, false, false);
                }
            }
            stored.push((field.name, field.value));
        }

        let norms: Vec<(String, u8)> = lengths
            .into_iter()
            .map(|(field, length)| {
                let norm = self.similarity.encode_norm(self.similarity.length_norm(length));
                (field, norm)
            })
            .collect();
        let vectors = vectors
            .into_iter()
            .map(|(field, terms)| (field, terms.into_iter().collect()))
            .collect();
        Ok(self.push_buffered(stored, vectors, norms))
    }

    /// Register a field with the flags of an existing segment.
    pub(crate) fn register_field(&mut self, info: &FieldInfo) {
        self.field_infos.add(
            &info.name,
            info.indexed,
            info.has_positions,
            info.store_term_vectors,
            info.has_norms,
        );
    }

    /// Buffer an already analyzed document. Postings are pushed separately.
    pub(crate) fn push_document(
        &mut self,
        stored: Vec<(String, String)>,
        vectors: Vec<TermVector>,
        norms: Vec<(String, u8)>,
    ) -> u32 {
        let vectors = vectors
            .into_iter()
            .map(|vector| {
                let terms = vector.terms.into_iter().map(|t| (t.text, t.positions)).collect();
                (vector.field, terms)
            })
            .collect();
        self.push_buffered(stored, vectors, norms)
    }

    /// Append postings of `term`. Documents must come after any already
    /// pushed for the same term.
    pub(crate) fn push_postings(&mut self, term: Term, docs: Vec<(u32, Vec<u32>)>) {
        self.postings.entry(term).or_default().extend(docs);
    }

    fn push_buffered(
        &mut self,
        stored: Vec<(String, String)>,
        vectors: DocVectors,
        norms: Vec<(String, u8)>,
    ) -> u32 {
        let doc = self.doc_count;
        let default_norm = self.default_norm();
        for (field, norm) in norms {
            let column = self.norms.entry(field).or_default();
            column.resize(doc as usize, default_norm);
            column.push(norm);
        }
        self.stored.push(stored);
        self.vectors.push(vectors);
        self.doc_count += 1;
        doc
    }

    fn add_posting(&mut self, term: Term, doc: u32, position: u32) {
        let docs = self.postings.entry(term).or_default();
        match docs.last_mut() {
            Some((last, positions)) if *last == doc => positions.push(position),
            _ => docs.push((doc, vec![position])),
        }
    }

    fn default_norm(&self) -> u8 {
        self.similarity.encode_norm(1.0)
    }

    /// Write the segment with its own stored fields and term vectors.
    pub fn flush(self) -> Result<SegmentInfo> {
        self.write(None)
    }

    /// Write the segment, appending its stored fields and term vectors to
    /// `store`.
    pub fn flush_to_store(self, store: &mut DocStoreWriter<'_>) -> Result<SegmentInfo> {
        self.write(Some(store))
    }

    fn write(self, mut store: Option<&mut DocStoreWriter<'_>>) -> Result<SegmentInfo> {
        let field_infos = match store.as_mut() {
            Some(store) => {
                store.field_infos.add_all(&self.field_infos);
                store.field_infos.clone()
            }
            None => self.field_infos.clone(),
        };

        let mut files = Vec::new();
        let fnm = segment_file_name(&self.name, FIELD_INFOS_EXTENSION);
        field_infos.write(self.storage, &fnm)?;
        files.push(fnm);

        self.write_postings(&field_infos, &mut files)?;
        self.write_norms(&field_infos, &mut files)?;

        let doc_store = match store {
            Some(store) => Some(store.append(&field_infos, &self.stored, &self.vectors)?),
            None => {
                self.write_doc_files(&field_infos, &mut files)?;
                None
            }
        };

        let mut info = SegmentInfo::new(self.name.clone(), self.doc_count);
        info.has_positions = field_infos.has_prox();
        info.has_vectors = field_infos.has_vectors();
        info.doc_store = doc_store;
        if self.config.use_compound_file {
            let cfs = segment_file_name(&self.name, COMPOUND_FILE_EXTENSION);
            pack_compound(self.storage, &cfs, &files)?;
            info.use_compound_file = true;
        }

        log::debug!(
            "flushed segment {}: {} docs, {} terms, compound {}",
            self.name,
            self.doc_count,
            self.postings.len(),
            info.use_compound_file
        );
        Ok(info)
    }

    fn write_postings(&self, field_infos: &FieldInfos, files: &mut Vec<String>) -> Result<()> {
        let has_prox = field_infos.has_prox();
        let mut postings =
            PostingsWriter::new(self.storage, &self.name, has_prox, self.config.skip_interval)?;
        let mut terms = TermInfosWriter::new(
            self.storage,
            &self.name,
            field_infos,
            self.config.index_interval,
            self.config.skip_interval,
        )?;

        for (term, docs) in &self.postings {
            let positional = field_infos
                .by_name(term.field())
                .map(|info| info.has_positions)
                .unwrap_or(false);
            postings.start_term(positional)?;
            for (doc, positions) in docs {
                postings.add_doc(*doc, positions)?;
            }
            let info = postings.finish_term()?;
            terms.add(term, &info)?;
        }
        postings.finish()?;
        terms.finish()?;

        for ext in [TERMS_EXTENSION, TERMS_INDEX_EXTENSION, FREQ_EXTENSION] {
            files.push(segment_file_name(&self.name, ext));
        }
        if has_prox {
            files.push(segment_file_name(&self.name, PROX_EXTENSION));
        }
        Ok(())
    }

    fn write_norms(&self, field_infos: &FieldInfos, files: &mut Vec<String>) -> Result<()> {
        let default_norm = self.default_norm();
        let mut columns = Vec::new();
        for info in field_infos.iter().filter(|info| info.has_norms) {
            let mut column = self.norms.get(&info.name).cloned().unwrap_or_default();
            column.resize(self.doc_count as usize, default_norm);
            columns.push((info.number, column));
        }
        let name = segment_file_name(&self.name, NORMS_EXTENSION);
        write_norms(self.storage, &name, &columns)?;
        files.push(name);
        Ok(())
    }

    fn write_doc_files(&self, field_infos: &FieldInfos, files: &mut Vec<String>) -> Result<()> {
        let mut stored = DocFilesWriter::stored_fields(self.storage, &self.name)?;
        for fields in &self.stored {
            stored.add_document(&numbered(field_infos, fields)?)?;
        }
        stored.finish()?;
        files.push(segment_file_name(&self.name, FIELDS_INDEX_EXTENSION));
        files.push(segment_file_name(&self.name, FIELDS_EXTENSION));

        if field_infos.has_vectors() {
            let mut vectors = DocFilesWriter::term_vectors(self.storage, &self.name)?;
            for doc_vectors in &self.vectors {
                vectors.add_vectors(&numbered_vectors(field_infos, doc_vectors)?)?;
            }
            vectors.finish()?;
            files.push(segment_file_name(&self.name, VECTORS_INDEX_EXTENSION));
            files.push(segment_file_name(&self.name, VECTORS_DOCUMENTS_EXTENSION));
        }
        Ok(())
    }
}

/// Stored fields and term vectors shared by consecutive segments.
///
/// Field numbers are assigned by the store so that every segment written to
/// it agrees on them. The store must be finished before its segments are
/// opened.
pub struct DocStoreWriter<'a> {
    storage: &'a dyn Storage,
    segment: String,
    use_compound_file: bool,
    field_infos: FieldInfos,
    stored: DocFilesWriter,
    vectors: DocFilesWriter,
}

impl<'a> DocStoreWriter<'a> {
    /// Create the store files named after `segment`. With `use_compound_file`
    /// they are packed into `<segment>.cfx` on finish.
    pub fn new(storage: &'a dyn Storage, segment: &str, use_compound_file: bool) -> Result<Self> {
        Ok(DocStoreWriter {
            storage,
            segment: segment.to_string(),
            use_compound_file,
            field_infos: FieldInfos::new(),
            stored: DocFilesWriter::stored_fields(storage, segment)?,
            vectors: DocFilesWriter::term_vectors(storage, segment)?,
        })
    }

    pub fn segment(&self) -> &str {
        &self.segment
    }

    /// Documents appended so far.
    pub fn doc_count(&self) -> u32 {
        self.stored.doc_count()
    }

    fn append(
        &mut self,
        field_infos: &FieldInfos,
        stored: &[Vec<(String, String)>],
        vectors: &[DocVectors],
    ) -> Result<DocStoreInfo> {
        let offset = self.doc_count();
        for (fields, doc_vectors) in stored.iter().zip(vectors) {
            self.stored.add_document(&numbered(field_infos, fields)?)?;
            self.vectors.add_vectors(&numbered_vectors(field_infos, doc_vectors)?)?;
        }
        Ok(DocStoreInfo {
            segment: self.segment.clone(),
            offset,
            is_compound: self.use_compound_file,
        })
    }

    pub fn finish(self) -> Result<()> {
        let docs = self.doc_count();
        self.stored.finish()?;
        self.vectors.finish()?;
        if self.use_compound_file {
            let files: Vec<String> = DOC_STORE_EXTENSIONS
                .iter()
                .map(|ext| segment_file_name(&self.segment, ext))
                .collect();
            let cfx = segment_file_name(&self.segment, COMPOUND_FILE_STORE_EXTENSION);
            pack_compound(self.storage, &cfx, &files)?;
        }
        log::debug!("finished doc store {} with {docs} docs", self.segment);
        Ok(())
    }
}

/// Record `deleted` as the next deletions generation of `info`. The file of
/// the previous generation is removed.
pub fn write_deletions(
    storage: &dyn Storage,
    info: &mut SegmentInfo,
    deleted: &DeletedDocs,
) -> Result<()> {
    if deleted.len() != info.doc_count {
        return Err(SpindleError::invalid_operation(format!(
            "deletions cover {} docs but segment {} has {}",
            deleted.len(),
            info.name,
            info.doc_count
        )));
    }
    let previous = info.deletions_file_name();
    info.del_gen = Some(info.del_gen.map_or(1, |generation| generation + 1));
    let name = info
        .deletions_file_name()
        .ok_or_else(|| SpindleError::other("deletions generation not set"))?;
    deleted.write(storage, &name)?;
    if let Some(previous) = previous {
        if storage.file_exists(&previous) {
            storage.delete_file(&previous)?;
        }
    }
    log::debug!("wrote {} deletions to {name}", deleted.count());
    Ok(())
}

fn pack_compound(storage: &dyn Storage, name: &str, files: &[String]) -> Result<()> {
    let mut writer = CompoundFileWriter::new(storage, name);
    for file in files {
        writer.add_file(file)?;
    }
    writer.finish()?;
    for file in files {
        storage.delete_file(file)?;
    }
    Ok(())
}

fn field_number(field_infos: &FieldInfos, name: &str) -> Result<u32> {
    field_infos
        .field_number(name)
        .ok_or_else(|| SpindleError::index(format!("field {name} is not registered")))
}

fn numbered<'f>(field_infos: &FieldInfos, fields: &'f [(String, String)]) -> Result<Vec<(u32, &'f str)>> {
    fields
        .iter()
        .map(|(name, value)| Ok((field_number(field_infos, name)?, value.as_str())))
        .collect()
}

fn numbered_vectors(
    field_infos: &FieldInfos,
    vectors: &DocVectors,
) -> Result<Vec<(u32, Vec<(String, Vec<u32>)>)>> {
    let mut numbered = Vec::with_capacity(vectors.len());
    for (name, terms) in vectors {
        numbered.push((field_number(field_infos, name)?, terms.clone()));
    }
    Ok(numbered)
}
