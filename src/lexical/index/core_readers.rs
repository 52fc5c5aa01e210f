//! Resources shared by every reader of one segment.
//!
//! A [`SegmentCore`] owns the open streams and the lazily opened readers of a
//! segment. Logical readers attach to it and release it when they close; the
//! last release closes everything exactly once and then tells the registered
//! [`CoreClosedListener`]s.
//!
//! The reference count is an atomic so attaching and releasing never wait on
//! lazy initialization. Everything else (`load_terms_index`,
//! `open_doc_stores`, and the reader accessors) is serialized by a mutex.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{Result, SpindleError};
use crate::lexical::core::field_infos::FieldInfos;
use crate::lexical::core::posting::POSTINGS_VERSION;
use crate::lexical::core::stored::{StoredFieldsReader, TermVectorsReader};
use crate::lexical::core::terms::TermInfosReader;
use crate::lexical::index::config::{ReaderConfig, TermsIndexPolicy};
use crate::lexical::index::segment::{
    COMPOUND_FILE_EXTENSION, COMPOUND_FILE_STORE_EXTENSION, FIELD_INFOS_EXTENSION,
    FREQ_EXTENSION, PROX_EXTENSION, SegmentInfo, segment_file_name,
};
use crate::storage::compound::CompoundFileReader;
use crate::storage::structured::open_input_checked;
use crate::storage::{Storage, StorageInput};

/// Notified once when a core's last reference is released.
pub trait CoreClosedListener: Send + Sync {
    fn on_core_closed(&self, segment: &str);
}

#[derive(Debug, Default)]
struct CoreState {
    cfs: Option<Arc<CompoundFileReader>>,
    store_cfs: Option<Arc<CompoundFileReader>>,
    field_infos: Arc<FieldInfos>,
    terms: Option<Arc<TermInfosReader>>,
    terms_no_index: Option<Arc<TermInfosReader>>,
    freq: Option<Box<dyn StorageInput>>,
    prox: Option<Box<dyn StorageInput>>,
    stored_fields: Option<Arc<StoredFieldsReader>>,
    term_vectors: Option<Arc<TermVectorsReader>>,
    closed: bool,
}

impl CoreState {
    /// Close everything still open, in a fixed order. Each resource is taken
    /// out of its slot first, so none can be closed twice.
    fn close_all(&mut self, segment: &str) -> Result<()> {
        self.closed = true;
        let mut first_error = None;
        let mut record = |what: &str, result: Result<()>| {
            if let Err(e) = result {
                log::warn!("failed to close {what} of segment {segment}: {e}");
                first_error.get_or_insert(e);
            }
        };

        if let Some(terms) = self.terms.take() {
            record("terms reader", terms.close());
        }
        if let Some(terms) = self.terms_no_index.take() {
            record("terms reader", terms.close());
        }
        if let Some(mut freq) = self.freq.take() {
            record("frequency stream", freq.close());
        }
        if let Some(mut prox) = self.prox.take() {
            record("position stream", prox.close());
        }
        if let Some(vectors) = self.term_vectors.take() {
            record("term vectors", vectors.close());
        }
        if let Some(stored) = self.stored_fields.take() {
            record("stored fields", stored.close());
        }
        if let Some(cfs) = self.cfs.take() {
            record("compound file", cfs.close());
        }
        if let Some(cfs) = self.store_cfs.take() {
            record("doc store compound file", cfs.close());
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Shared, reference-counted resources of one segment.
pub struct SegmentCore {
    segment: String,
    storage: Arc<dyn Storage>,
    read_buffer_size: usize,
    ref_count: AtomicUsize,
    state: Mutex<CoreState>,
    listeners: Mutex<Vec<Arc<dyn CoreClosedListener>>>,
}

impl std::fmt::Debug for SegmentCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentCore")
            .field("segment", &self.segment)
            .field("ref_count", &self.ref_count.load(Ordering::SeqCst))
            .finish()
    }
}

impl SegmentCore {
    /// Open the core resources of `info`. The returned core holds one reference.
    ///
    /// If anything fails, whatever was already opened is closed again before
    /// the error is returned and no listener is notified.
    pub fn open(
        storage: Arc<dyn Storage>,
        info: &SegmentInfo,
        config: &ReaderConfig,
    ) -> Result<Arc<SegmentCore>> {
        let core = SegmentCore {
            segment: info.name.clone(),
            storage,
            read_buffer_size: config.read_buffer_size,
            ref_count: AtomicUsize::new(1),
            state: Mutex::new(CoreState::default()),
            listeners: Mutex::new(Vec::new()),
        };

        let opened = {
            let mut state = core.state.lock();
            let mut result = core.open_resources(&mut state, info, config.terms_index);
            if result.is_ok() && config.open_doc_stores {
                result = core.open_doc_stores_locked(&mut state, info);
            }
            if result.is_err() {
                let _ = state.close_all(&core.segment);
                core.ref_count.store(0, Ordering::SeqCst);
            }
            result
        };
        opened?;

        log::debug!("opened core of segment {}", core.segment);
        Ok(Arc::new(core))
    }

    fn open_resources(
        &self,
        state: &mut CoreState,
        info: &SegmentInfo,
        policy: TermsIndexPolicy,
    ) -> Result<()> {
        if info.use_compound_file {
            let name = segment_file_name(&self.segment, COMPOUND_FILE_EXTENSION);
            let cfs = CompoundFileReader::open(self.storage.as_ref(), &name, self.read_buffer_size)?;
            state.cfs = Some(Arc::new(cfs));
        }
        let dir = Self::segment_dir(&self.storage, state);

        let field_infos = Arc::new(FieldInfos::read(
            dir.as_ref(),
            &segment_file_name(&self.segment, FIELD_INFOS_EXTENSION),
        )?);
        state.field_infos = Arc::clone(&field_infos);

        let terms = Arc::new(TermInfosReader::open(
            dir.as_ref(),
            &self.segment,
            Arc::clone(&field_infos),
            self.read_buffer_size,
            policy,
        )?);
        match policy {
            TermsIndexPolicy::NoIndex => state.terms_no_index = Some(terms),
            TermsIndexPolicy::InMemory { .. } => state.terms = Some(terms),
        }

        state.freq = Some(open_input_checked(
            dir.as_ref(),
            &segment_file_name(&self.segment, FREQ_EXTENSION),
            self.read_buffer_size,
            POSTINGS_VERSION,
        )?);

        if field_infos.has_prox() {
            state.prox = Some(open_input_checked(
                dir.as_ref(),
                &segment_file_name(&self.segment, PROX_EXTENSION),
                self.read_buffer_size,
                POSTINGS_VERSION,
            )?);
        }
        Ok(())
    }

    fn segment_dir(storage: &Arc<dyn Storage>, state: &CoreState) -> Arc<dyn Storage> {
        match &state.cfs {
            Some(cfs) => Arc::clone(cfs) as Arc<dyn Storage>,
            None => Arc::clone(storage),
        }
    }

    fn open_cfs_if_needed(&self, state: &mut CoreState, info: &SegmentInfo) -> Result<()> {
        if info.use_compound_file && state.cfs.is_none() {
            let name = segment_file_name(&self.segment, COMPOUND_FILE_EXTENSION);
            let cfs = CompoundFileReader::open(self.storage.as_ref(), &name, self.read_buffer_size)?;
            state.cfs = Some(Arc::new(cfs));
        }
        Ok(())
    }

    /// Name of the segment.
    pub fn segment(&self) -> &str {
        &self.segment
    }

    /// Current number of references.
    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::SeqCst)
    }

    /// Whether the last reference has been released.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Take another reference. Fails once the core has been closed.
    pub fn attach(self: &Arc<Self>) -> Result<Arc<SegmentCore>> {
        self.ref_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                if count == 0 { None } else { Some(count + 1) }
            })
            .map_err(|_| {
                SpindleError::invalid_operation(format!(
                    "core of segment {} is already closed",
                    self.segment
                ))
            })?;
        Ok(Arc::clone(self))
    }

    /// Drop one reference. The last release closes every owned resource and
    /// then notifies the listeners.
    ///
    /// Releasing more often than attached fails without touching anything.
    pub fn release(&self) -> Result<()> {
        let previous = self
            .ref_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| count.checked_sub(1))
            .map_err(|_| {
                SpindleError::invalid_operation(format!(
                    "core of segment {} released more times than attached",
                    self.segment
                ))
            })?;

        if previous == 1 {
            let result = self.state.lock().close_all(&self.segment);
            log::debug!("closed core of segment {}", self.segment);
            self.notify_closed();
            result?;
        }
        Ok(())
    }

    fn notify_closed(&self) {
        let listeners = std::mem::take(&mut *self.listeners.lock());
        for listener in listeners {
            listener.on_core_closed(&self.segment);
        }
    }

    /// Register a listener for the final release.
    pub fn add_listener(&self, listener: Arc<dyn CoreClosedListener>) {
        self.listeners.lock().push(listener);
    }

    /// Field metadata of the segment.
    pub fn field_infos(&self) -> Arc<FieldInfos> {
        Arc::clone(&self.state.lock().field_infos)
    }

    /// The term dictionary reader, indexed if the index has been loaded.
    ///
    /// The returned handle stays valid after a later `load_terms_index`.
    pub fn terms_reader(&self) -> Result<Arc<TermInfosReader>> {
        let state = self.state.lock();
        state
            .terms
            .as_ref()
            .or(state.terms_no_index.as_ref())
            .cloned()
            .ok_or_else(|| self.closed_error())
    }

    pub fn terms_index_is_loaded(&self) -> bool {
        self.state.lock().terms.is_some()
    }

    /// Replace the index-free dictionary reader with an indexed one. Cursors
    /// taken from the old reader keep working; new requests use the new one.
    pub fn load_terms_index(&self, info: &SegmentInfo, divisor: usize) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(self.closed_error());
        }
        if state.terms.is_some() {
            return Ok(());
        }
        self.open_cfs_if_needed(&mut state, info)?;
        let dir = Self::segment_dir(&self.storage, &state);
        let terms = TermInfosReader::open(
            dir.as_ref(),
            &self.segment,
            Arc::clone(&state.field_infos),
            self.read_buffer_size,
            TermsIndexPolicy::InMemory { divisor },
        )?;
        state.terms = Some(Arc::new(terms));
        log::debug!("loaded terms index of {} (divisor {divisor})", self.segment);
        Ok(())
    }

    /// Open the stored fields and term vectors readers if they are not open yet.
    pub fn open_doc_stores(&self, info: &SegmentInfo) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(self.closed_error());
        }
        self.open_doc_stores_locked(&mut state, info)
    }

    fn open_doc_stores_locked(&self, state: &mut CoreState, info: &SegmentInfo) -> Result<()> {
        if state.stored_fields.is_some() {
            return Ok(());
        }

        let (store_dir, store_segment, doc_offset) = match &info.doc_store {
            Some(store) => {
                let dir = if store.is_compound {
                    let cfs = match state.store_cfs.clone() {
                        Some(cfs) => cfs,
                        None => {
                            let name =
                                segment_file_name(&store.segment, COMPOUND_FILE_STORE_EXTENSION);
                            let cfs = Arc::new(CompoundFileReader::open(
                                self.storage.as_ref(),
                                &name,
                                self.read_buffer_size,
                            )?);
                            state.store_cfs = Some(Arc::clone(&cfs));
                            cfs
                        }
                    };
                    cfs as Arc<dyn Storage>
                } else {
                    Arc::clone(&self.storage)
                };
                (dir, store.segment.as_str(), Some(store.offset))
            }
            None => {
                self.open_cfs_if_needed(state, info)?;
                (Self::segment_dir(&self.storage, state), self.segment.as_str(), None)
            }
        };

        let field_infos = Arc::clone(&state.field_infos);
        let stored = StoredFieldsReader::open(
            store_dir.as_ref(),
            store_segment,
            Arc::clone(&field_infos),
            self.read_buffer_size,
            doc_offset,
            info.doc_count,
        )?;

        if doc_offset.is_none() && stored.size() != info.doc_count {
            let size = stored.size();
            let _ = stored.close();
            return Err(SpindleError::corrupt_index(format!(
                "doc counts differ for segment {}: stored fields show {} but segment info shows {}",
                self.segment, size, info.doc_count
            )));
        }

        let vectors = if info.has_vectors {
            match TermVectorsReader::open(
                store_dir.as_ref(),
                store_segment,
                field_infos,
                self.read_buffer_size,
                doc_offset,
                info.doc_count,
            ) {
                Ok(vectors) => Some(Arc::new(vectors)),
                Err(e) => {
                    let _ = stored.close();
                    return Err(e);
                }
            }
        } else {
            None
        };

        state.stored_fields = Some(Arc::new(stored));
        state.term_vectors = vectors;
        log::debug!("opened doc stores of {} from {store_segment}", self.segment);
        Ok(())
    }

    pub fn stored_fields_reader(&self) -> Option<Arc<StoredFieldsReader>> {
        self.state.lock().stored_fields.clone()
    }

    pub fn term_vectors_reader(&self) -> Option<Arc<TermVectorsReader>> {
        self.state.lock().term_vectors.clone()
    }

    /// The storage segment files are read from: the compound file when the
    /// segment uses one, the directory otherwise.
    pub fn cfs_storage(&self) -> Arc<dyn Storage> {
        Self::segment_dir(&self.storage, &self.state.lock())
    }

    /// A private clone of the frequency stream.
    pub fn clone_freq_stream(&self) -> Result<Box<dyn StorageInput>> {
        match self.state.lock().freq.as_ref() {
            Some(freq) => freq.clone_input(),
            None => Err(self.closed_error()),
        }
    }

    /// A private clone of the position stream, `None` when the segment has
    /// no position data.
    pub fn clone_prox_stream(&self) -> Result<Option<Box<dyn StorageInput>>> {
        let state = self.state.lock();
        if state.closed {
            return Err(self.closed_error());
        }
        state.prox.as_ref().map(|prox| prox.clone_input()).transpose()
    }

    fn closed_error(&self) -> SpindleError {
        SpindleError::invalid_operation(format!("core of segment {} is closed", self.segment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexical::index::writer::{SegmentWriter, WriterDocument};
    use crate::lexical::index::config::WriterConfig;
    use crate::storage::memory::MemoryStorage;

    #[derive(Default)]
    struct CountingListener {
        calls: AtomicUsize,
    }

    impl CoreClosedListener for CountingListener {
        fn on_core_closed(&self, _segment: &str) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn write_segment(storage: &MemoryStorage) -> SegmentInfo {
        let mut writer = SegmentWriter::new(storage, "_0", WriterConfig::default());
        for text in ["aaa bbb", "bbb ccc", "aaa"] {
            writer.add_document(WriterDocument::new().text("body", text)).unwrap();
        }
        writer.flush().unwrap()
    }

    #[test]
    fn test_attach_release_closes_once() {
        let memory = Arc::new(MemoryStorage::default());
        let info = write_segment(&memory);
        let storage: Arc<dyn Storage> = memory.clone();

        let core = SegmentCore::open(storage, &info, &ReaderConfig::default()).unwrap();
        let listener = Arc::new(CountingListener::default());
        core.add_listener(listener.clone());
        assert!(memory.open_inputs() > 0);

        let second = core.attach().unwrap();
        assert_eq!(core.ref_count(), 2);
        second.release().unwrap();
        assert!(!core.is_closed());
        assert!(memory.open_inputs() > 0);

        core.release().unwrap();
        assert!(core.is_closed());
        assert_eq!(memory.open_inputs(), 0);
        assert_eq!(listener.calls.load(Ordering::SeqCst), 1);

        assert!(core.release().is_err());
        assert!(core.attach().is_err());
        assert_eq!(listener.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_file_closes_partial_open() {
        let memory = Arc::new(MemoryStorage::default());
        let info = write_segment(&memory);
        memory.delete_file("_0.frq").unwrap();

        let storage: Arc<dyn Storage> = memory.clone();
        let err = SegmentCore::open(storage, &info, &ReaderConfig::default()).unwrap_err();
        assert!(err.is_io_kind(std::io::ErrorKind::NotFound));
        assert_eq!(memory.open_inputs(), 0);
    }
}
