//! Merging segments into one, dropping deleted documents.

use std::sync::Arc;

use ahash::AHashSet;

use crate::error::Result;
use crate::lexical::core::posting::TermPositions;
use crate::lexical::index::config::{ReaderConfig, WriterConfig};
use crate::lexical::index::multi::IndexReader;
use crate::lexical::index::reader::SegmentReader;
use crate::lexical::index::segment::{
    COMPOUND_FILE_STORE_EXTENSION, DOC_STORE_EXTENSIONS, SegmentInfo, SegmentInfos,
    segment_file_name,
};
use crate::lexical::index::writer::SegmentWriter;
use crate::storage::Storage;

/// Old doc number to new doc number, `None` for deleted documents.
type DocMap = Vec<Option<u32>>;

/// Combines several segments into a new one. Deleted documents are dropped
/// and the live ones renumbered in reader order.
#[derive(Debug)]
pub struct SegmentMerger<'a> {
    storage: &'a dyn Storage,
    name: String,
    config: WriterConfig,
    readers: Vec<&'a SegmentReader>,
}

impl<'a> SegmentMerger<'a> {
    pub fn new(storage: &'a dyn Storage, name: &str, config: WriterConfig) -> Self {
        SegmentMerger {
            storage,
            name: name.to_string(),
            config,
            readers: Vec::new(),
        }
    }

    pub fn add(&mut self, reader: &'a SegmentReader) {
        self.readers.push(reader);
    }

    /// Write the merged segment and return its descriptor.
    pub fn merge(self) -> Result<SegmentInfo> {
        let mut writer = SegmentWriter::new(self.storage, &self.name, self.config.clone());
        for reader in &self.readers {
            for info in reader.field_infos().iter() {
                writer.register_field(info);
            }
        }

        let mut doc_maps = Vec::with_capacity(self.readers.len());
        for reader in &self.readers {
            doc_maps.push(Self::merge_documents(&mut writer, reader)?);
        }
        for (reader, doc_map) in self.readers.iter().zip(&doc_maps) {
            Self::merge_postings(&mut writer, reader, doc_map)?;
        }

        let info = writer.flush()?;
        log::info!(
            "merged {} segments into {} ({} docs)",
            self.readers.len(),
            info.name,
            info.doc_count
        );
        Ok(info)
    }

    fn merge_documents(writer: &mut SegmentWriter<'_>, reader: &SegmentReader) -> Result<DocMap> {
        let field_infos = reader.field_infos();
        let mut norms = Vec::new();
        for info in field_infos.iter().filter(|info| info.has_norms) {
            if let Some(bytes) = reader.norms(&info.name)? {
                norms.push((info.name.clone(), bytes));
            }
        }

        let mut doc_map = Vec::with_capacity(reader.max_doc() as usize);
        for doc in 0..reader.max_doc() {
            if reader.is_deleted(doc) {
                doc_map.push(None);
                continue;
            }
            let stored = reader.document(doc)?.fields().to_vec();
            let vectors = reader.term_vectors(doc)?;
            let doc_norms = norms
                .iter()
                .map(|(field, bytes)| (field.clone(), bytes[doc as usize]))
                .collect();
            doc_map.push(Some(writer.push_document(stored, vectors, doc_norms)));
        }
        Ok(doc_map)
    }

    fn merge_postings(
        writer: &mut SegmentWriter<'_>,
        reader: &SegmentReader,
        doc_map: &DocMap,
    ) -> Result<()> {
        let field_infos = reader.field_infos();
        let mut terms = reader.terms()?;
        while terms.next()? {
            let Some(term) = terms.term().cloned() else {
                break;
            };
            let positional = field_infos
                .by_name(term.field())
                .is_some_and(|info| info.has_positions);
            let mut postings = reader.positions_for(&term, terms.term_info())?;
            let mut docs = Vec::new();
            while postings.next()? {
                // deleted docs are already skipped by the cursor
                let Some(new_doc) = doc_map[postings.doc() as usize] else {
                    continue;
                };
                let mut positions = Vec::new();
                if positional {
                    positions.reserve(postings.freq() as usize);
                    for _ in 0..postings.freq() {
                        positions.push(postings.next_position()?);
                    }
                }
                docs.push((new_doc, positions));
            }
            postings.close()?;
            log::trace!("merging {term} from {}: {} docs", reader.segment_name(), docs.len());
            if !docs.is_empty() {
                writer.push_postings(term, docs);
            }
        }
        terms.close()
    }
}

/// Merge every segment of the index into one and commit the result.
pub fn optimize(
    storage: Arc<dyn Storage>,
    reader_config: &ReaderConfig,
    writer_config: &WriterConfig,
) -> Result<SegmentInfos> {
    let mut infos = SegmentInfos::read(storage.as_ref())?;
    if infos.segments.len() == 1 && infos.segments[0].del_gen.is_none() {
        log::info!("index is already optimized");
        return Ok(infos);
    }

    let name = infos.new_segment_name();
    let reader = IndexReader::from_segments(Arc::clone(&storage), &infos.segments, reader_config)?;
    let merged = {
        let mut merger = SegmentMerger::new(storage.as_ref(), &name, writer_config.clone());
        for segment in reader.segment_readers() {
            merger.add(segment);
        }
        merger.merge()
    };
    reader.close()?;
    let merged = merged?;

    let old = std::mem::replace(&mut infos.segments, vec![merged]);
    infos.commit(storage.as_ref())?;

    let mut stale = AHashSet::new();
    for segment in &old {
        stale.extend(segment.files());
        if let Some(store) = &segment.doc_store {
            for ext in DOC_STORE_EXTENSIONS
                .iter()
                .chain(std::iter::once(&COMPOUND_FILE_STORE_EXTENSION))
            {
                stale.insert(segment_file_name(&store.segment, ext));
            }
        }
    }
    for file in stale {
        if storage.file_exists(&file) {
            storage.delete_file(&file)?;
        }
    }
    Ok(infos)
}
