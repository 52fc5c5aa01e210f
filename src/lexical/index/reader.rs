//! Logical reader over one segment.
//!
//! A [`SegmentReader`] holds one reference on a [`SegmentCore`] together with
//! the segment's deletions and lazily loaded norms. Several readers can share
//! a core; the core's files stay open until the last of them is closed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::{Result, SpindleError};
use crate::lexical::core::deletes::DeletedDocs;
use crate::lexical::core::field_infos::FieldInfos;
use crate::lexical::core::norms::Norms;
use crate::lexical::core::posting::{SegmentTermPositions, TermPositions};
use crate::lexical::core::stored::{StoredDocument, TermVector};
use crate::lexical::core::terms::{SegmentTermEnum, TermInfo, TermInfosReader};
use crate::lexical::index::config::ReaderConfig;
use crate::lexical::index::core_readers::SegmentCore;
use crate::lexical::index::segment::{NORMS_EXTENSION, SegmentInfo, segment_file_name};
use crate::lexical::term::Term;
use crate::storage::Storage;

/// Reader over one segment, sharing its open files through a [`SegmentCore`].
#[derive(Debug)]
pub struct SegmentReader {
    core: Arc<SegmentCore>,
    info: SegmentInfo,
    deleted: Option<Arc<DeletedDocs>>,
    norms: Mutex<Option<Arc<Norms>>>,
    closed: AtomicBool,
}

impl SegmentReader {
    /// Open a new core for `info` and a reader on it.
    pub fn open(
        storage: Arc<dyn Storage>,
        info: &SegmentInfo,
        config: &ReaderConfig,
    ) -> Result<Self> {
        let core = SegmentCore::open(Arc::clone(&storage), info, config)?;
        let deleted = match Self::read_deletions(storage.as_ref(), info) {
            Ok(deleted) => deleted,
            Err(e) => {
                let _ = core.release();
                return Err(e);
            }
        };
        Ok(Self::with_core(core, info.clone(), deleted))
    }

    fn read_deletions(
        storage: &dyn Storage,
        info: &SegmentInfo,
    ) -> Result<Option<Arc<DeletedDocs>>> {
        match info.deletions_file_name() {
            Some(name) => {
                let deleted = DeletedDocs::read(storage, &name, info.doc_count)?;
                log::debug!("loaded {} deletions of {}", deleted.count(), info.name);
                Ok(Some(Arc::new(deleted)))
            }
            None => Ok(None),
        }
    }

    fn with_core(
        core: Arc<SegmentCore>,
        info: SegmentInfo,
        deleted: Option<Arc<DeletedDocs>>,
    ) -> Self {
        SegmentReader {
            core,
            info,
            deleted,
            norms: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Another reader on the same core, with the same deletions.
    pub fn share(&self) -> Result<SegmentReader> {
        self.check_open()?;
        let core = self.core.attach()?;
        let reader = Self::with_core(core, self.info.clone(), self.deleted.clone());
        *reader.norms.lock() = self.norms.lock().clone();
        Ok(reader)
    }

    /// Release this reader's reference on the core. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.core.release()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn core(&self) -> &Arc<SegmentCore> {
        &self.core
    }

    pub fn info(&self) -> &SegmentInfo {
        &self.info
    }

    pub fn segment_name(&self) -> &str {
        &self.info.name
    }

    pub fn field_infos(&self) -> Arc<FieldInfos> {
        self.core.field_infos()
    }

    /// Number of documents including deleted ones.
    pub fn max_doc(&self) -> u32 {
        self.info.doc_count
    }

    /// Number of live documents.
    pub fn num_docs(&self) -> u32 {
        self.info.doc_count - self.deleted.as_ref().map(|d| d.count()).unwrap_or(0)
    }

    pub fn has_deletions(&self) -> bool {
        self.deleted.as_ref().is_some_and(|d| d.count() > 0)
    }

    pub fn is_deleted(&self, doc: u32) -> bool {
        self.deleted.as_ref().is_some_and(|d| d.is_deleted(doc))
    }

    pub(crate) fn deleted_docs(&self) -> Option<Arc<DeletedDocs>> {
        self.deleted.clone()
    }

    /// Upgrade the core's term dictionary to an indexed one.
    pub fn load_terms_index(&self, divisor: usize) -> Result<()> {
        self.check_open()?;
        self.core.load_terms_index(&self.info, divisor)
    }

    fn terms_reader(&self) -> Result<Arc<TermInfosReader>> {
        self.check_open()?;
        self.core.terms_reader()
    }

    /// Cursor over all terms, positioned before the first one.
    pub fn terms(&self) -> Result<SegmentTermEnum> {
        self.terms_reader()?.terms()
    }

    /// Cursor positioned on the first term `>= target`.
    pub fn terms_from(&self, target: &Term) -> Result<SegmentTermEnum> {
        self.terms_reader()?.terms_from(target)
    }

    /// Dictionary data of `term`.
    pub fn term_info(&self, term: &Term) -> Result<Option<TermInfo>> {
        self.terms_reader()?.get(term)
    }

    /// Number of live documents containing `term`.
    pub fn doc_freq(&self, term: &Term) -> Result<u32> {
        match self.term_info(term)? {
            Some(info) => self.live_doc_freq(term, info),
            None => Ok(0),
        }
    }

    /// Live document count of a term already looked up in the dictionary.
    /// The dictionary count is exact until the segment has deletions; after
    /// that the postings are walked.
    pub fn live_doc_freq(&self, term: &Term, info: TermInfo) -> Result<u32> {
        if !self.has_deletions() {
            return Ok(info.doc_freq);
        }
        let mut positions = self.positions_for(term, info)?;
        let mut count = 0;
        while positions.next()? {
            count += 1;
        }
        positions.close()?;
        Ok(count)
    }

    /// Private cursor over the postings of `term`, skipping deleted documents.
    pub fn term_positions(&self, term: &Term) -> Result<Option<SegmentTermPositions>> {
        match self.term_info(term)? {
            Some(info) => self.positions_for(term, info).map(Some),
            None => Ok(None),
        }
    }

    /// Private cursor over postings already looked up in the dictionary.
    pub fn positions_for(&self, term: &Term, info: TermInfo) -> Result<SegmentTermPositions> {
        self.check_open()?;
        let positional = self
            .core
            .field_infos()
            .by_name(term.field())
            .is_some_and(|field| field.has_positions);
        let skip_interval = self.core.terms_reader()?.skip_interval();
        let freq = self.core.clone_freq_stream()?;
        let prox = if positional {
            self.core.clone_prox_stream()?
        } else {
            None
        };
        SegmentTermPositions::new(freq, prox, info, skip_interval, positional, self.deleted.clone())
    }

    /// Stored fields of `doc`.
    pub fn document(&self, doc: u32) -> Result<StoredDocument> {
        self.check_doc(doc)?;
        let stored = match self.core.stored_fields_reader() {
            Some(stored) => stored,
            None => {
                self.core.open_doc_stores(&self.info)?;
                self.core
                    .stored_fields_reader()
                    .ok_or_else(|| SpindleError::index("stored fields unavailable"))?
            }
        };
        stored.document(doc)
    }

    /// Term vectors of `doc`; empty when the segment stores none.
    pub fn term_vectors(&self, doc: u32) -> Result<Vec<TermVector>> {
        self.check_doc(doc)?;
        if !self.info.has_vectors {
            return Ok(Vec::new());
        }
        if self.core.term_vectors_reader().is_none() {
            self.core.open_doc_stores(&self.info)?;
        }
        match self.core.term_vectors_reader() {
            Some(vectors) => vectors.get(doc),
            None => Ok(Vec::new()),
        }
    }

    /// Length norms of `field`, one byte per document, if the field has any.
    pub fn norms(&self, field: &str) -> Result<Option<Arc<[u8]>>> {
        self.check_open()?;
        let field_infos = self.core.field_infos();
        let Some(info) = field_infos.by_name(field) else {
            return Ok(None);
        };
        if !info.has_norms {
            return Ok(None);
        }
        Ok(self.load_norms()?.get(info.number))
    }

    fn load_norms(&self) -> Result<Arc<Norms>> {
        let mut slot = self.norms.lock();
        if let Some(norms) = slot.as_ref() {
            return Ok(Arc::clone(norms));
        }
        let name = segment_file_name(&self.info.name, NORMS_EXTENSION);
        let norms = Arc::new(Norms::read(
            self.core.cfs_storage().as_ref(),
            &name,
            self.info.doc_count,
        )?);
        log::debug!("loaded norms of {} for {} fields", self.info.name, norms.len());
        *slot = Some(Arc::clone(&norms));
        Ok(norms)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(SpindleError::invalid_operation(format!(
                "reader of segment {} is closed",
                self.info.name
            )));
        }
        Ok(())
    }

    fn check_doc(&self, doc: u32) -> Result<()> {
        self.check_open()?;
        if doc >= self.max_doc() {
            return Err(SpindleError::invalid_operation(format!(
                "doc {doc} out of range for segment {} ({} docs)",
                self.info.name,
                self.max_doc()
            )));
        }
        if self.is_deleted(doc) {
            return Err(SpindleError::invalid_operation(format!(
                "doc {doc} of segment {} is deleted",
                self.info.name
            )));
        }
        Ok(())
    }
}

impl Drop for SegmentReader {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("failed to release segment {}: {e}", self.info.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexical::index::config::{TermsIndexPolicy, WriterConfig};
    use crate::lexical::index::writer::{SegmentWriter, WriterDocument, write_deletions};
    use crate::storage::memory::MemoryStorage;

    fn write_segment(storage: &MemoryStorage, config: WriterConfig) -> SegmentInfo {
        let mut writer = SegmentWriter::new(storage, "_0", config);
        for (i, text) in ["aaa bbb", "bbb ccc", "aaa", "aaa bbb aaa"].iter().enumerate() {
            writer
                .add_document(
                    WriterDocument::new()
                        .text_with_vectors("body", *text)
                        .keyword("id", i.to_string()),
                )
                .unwrap();
        }
        writer.flush().unwrap()
    }

    #[test]
    fn test_share_and_close() {
        let memory = Arc::new(MemoryStorage::default());
        let info = write_segment(&memory, WriterConfig::default());
        let storage: Arc<dyn Storage> = memory.clone();

        let reader = SegmentReader::open(storage, &info, &ReaderConfig::default()).unwrap();
        let shared = reader.share().unwrap();
        assert_eq!(reader.core().ref_count(), 2);

        reader.close().unwrap();
        reader.close().unwrap();
        assert!(reader.terms().is_err());
        assert_eq!(shared.doc_freq(&Term::new("body", "aaa")).unwrap(), 3);

        drop(shared);
        assert_eq!(memory.open_inputs(), 0);
    }

    #[test]
    fn test_positions_documents_and_vectors() {
        let memory = Arc::new(MemoryStorage::default());
        let info = write_segment(&memory, WriterConfig::default());
        let storage: Arc<dyn Storage> = memory.clone();
        let reader = SegmentReader::open(storage, &info, &ReaderConfig::default()).unwrap();

        let mut aaa = reader.term_positions(&Term::new("body", "aaa")).unwrap().unwrap();
        let mut seen = Vec::new();
        while aaa.next().unwrap() {
            let positions: Vec<u32> =
                (0..aaa.freq()).map(|_| aaa.next_position().unwrap()).collect();
            seen.push((aaa.doc(), positions));
        }
        assert_eq!(seen, vec![(0, vec![0]), (2, vec![0]), (3, vec![0, 2])]);
        assert!(reader.term_positions(&Term::new("body", "zzz")).unwrap().is_none());

        assert_eq!(reader.document(3).unwrap().get("id"), Some("3"));
        let vectors = reader.term_vectors(3).unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].terms[0].text, "aaa");
        assert_eq!(vectors[0].terms[0].positions, vec![0, 2]);

        let norms = reader.norms("body").unwrap().unwrap();
        assert_eq!(norms.len(), 4);
        assert!(reader.norms("id").unwrap().is_none());
        assert!(reader.norms("missing").unwrap().is_none());
    }

    #[test]
    fn test_deletions() {
        let memory = Arc::new(MemoryStorage::default());
        let mut info = write_segment(&memory, WriterConfig::default());
        let mut deleted = DeletedDocs::new(info.doc_count);
        deleted.delete(0).unwrap();
        write_deletions(memory.as_ref(), &mut info, &deleted).unwrap();

        let storage: Arc<dyn Storage> = memory.clone();
        let reader = SegmentReader::open(storage, &info, &ReaderConfig::default()).unwrap();
        assert_eq!(reader.max_doc(), 4);
        assert_eq!(reader.num_docs(), 3);
        assert!(reader.is_deleted(0));
        assert!(reader.document(0).is_err());

        let aaa = Term::new("body", "aaa");
        assert_eq!(reader.doc_freq(&aaa).unwrap(), 2);
        let info = reader.term_info(&aaa).unwrap().unwrap();
        assert_eq!(info.doc_freq, 3);
        assert_eq!(reader.live_doc_freq(&aaa, info).unwrap(), 2);
    }

    #[test]
    fn test_lazy_doc_stores_and_terms_index() {
        let memory = Arc::new(MemoryStorage::default());
        let config = WriterConfig {
            use_compound_file: true,
            ..WriterConfig::default()
        };
        let info = write_segment(&memory, config);
        let storage: Arc<dyn Storage> = memory.clone();
        let reader_config = ReaderConfig {
            terms_index: TermsIndexPolicy::NoIndex,
            open_doc_stores: false,
            ..ReaderConfig::default()
        };
        let reader = SegmentReader::open(storage, &info, &reader_config).unwrap();
        assert!(reader.core().stored_fields_reader().is_none());
        assert!(!reader.core().terms_index_is_loaded());

        let mut before = reader.terms().unwrap();
        assert!(before.next().unwrap());
        reader.load_terms_index(1).unwrap();
        assert!(reader.core().terms_index_is_loaded());
        assert!(before.next().unwrap());
        assert_eq!(before.term(), Some(&Term::new("body", "bbb")));

        assert_eq!(reader.document(1).unwrap().get("body"), Some("bbb ccc"));
        assert!(reader.core().stored_fields_reader().is_some());
        assert_eq!(reader.doc_freq(&Term::new("id", "2")).unwrap(), 1);

        drop(before);
        reader.close().unwrap();
        assert_eq!(memory.open_inputs(), 0);
    }
}
