//! Composite reader over every segment of a commit.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::collections::binary_heap::PeekMut;
use std::sync::Arc;

use rayon::prelude::*;

use crate::error::{Result, SpindleError};
use crate::lexical::core::stored::StoredDocument;
use crate::lexical::core::terms::SegmentTermEnum;
use crate::lexical::index::config::ReaderConfig;
use crate::lexical::index::reader::SegmentReader;
use crate::lexical::index::segment::{SegmentInfo, SegmentInfos};
use crate::lexical::term::Term;
use crate::storage::Storage;

/// Reader over all segments of an index, numbering documents consecutively
/// in segment order.
#[derive(Debug)]
pub struct IndexReader {
    readers: Vec<SegmentReader>,
    starts: Vec<u32>,
    max_doc: u32,
}

impl IndexReader {
    /// Open the latest commit in `storage`.
    pub fn open(storage: Arc<dyn Storage>, config: &ReaderConfig) -> Result<Self> {
        let infos = SegmentInfos::read(storage.as_ref())?;
        Self::from_segments(storage, &infos.segments, config)
    }

    /// Open readers for `segments` in parallel. If any fails, the ones that
    /// opened are closed again and the first error is returned.
    pub fn from_segments(
        storage: Arc<dyn Storage>,
        segments: &[SegmentInfo],
        config: &ReaderConfig,
    ) -> Result<Self> {
        let opened: Vec<Result<SegmentReader>> = segments
            .par_iter()
            .map(|info| SegmentReader::open(Arc::clone(&storage), info, config))
            .collect();

        let mut readers = Vec::with_capacity(opened.len());
        let mut failure = None;
        for result in opened {
            match result {
                Ok(reader) => readers.push(reader),
                Err(e) => {
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }
        if let Some(e) = failure {
            for reader in &readers {
                if let Err(close_err) = reader.close() {
                    log::warn!("failed to close {}: {close_err}", reader.segment_name());
                }
            }
            return Err(e);
        }
        Ok(Self::from_readers(readers))
    }

    /// Combine already open segment readers.
    pub fn from_readers(readers: Vec<SegmentReader>) -> Self {
        let mut starts = Vec::with_capacity(readers.len());
        let mut max_doc = 0u32;
        for reader in &readers {
            starts.push(max_doc);
            max_doc += reader.max_doc();
        }
        log::debug!("opened index reader over {} segments, {max_doc} docs", readers.len());
        IndexReader {
            readers,
            starts,
            max_doc,
        }
    }

    /// Segment readers with the doc number of their first document.
    pub fn leaves(&self) -> impl Iterator<Item = (u32, &SegmentReader)> {
        self.starts.iter().copied().zip(self.readers.iter())
    }

    pub fn segment_readers(&self) -> &[SegmentReader] {
        &self.readers
    }

    pub fn max_doc(&self) -> u32 {
        self.max_doc
    }

    pub fn num_docs(&self) -> u32 {
        self.readers.iter().map(|r| r.num_docs()).sum()
    }

    /// Live documents containing `term` across all segments.
    pub fn doc_freq(&self, term: &Term) -> Result<u64> {
        let mut total = 0u64;
        for reader in &self.readers {
            total += reader.doc_freq(term)? as u64;
        }
        Ok(total)
    }

    /// Stored fields of the composite document number `doc`.
    pub fn document(&self, doc: u32) -> Result<StoredDocument> {
        if doc >= self.max_doc {
            return Err(SpindleError::invalid_operation(format!(
                "doc {doc} out of range ({} docs)",
                self.max_doc
            )));
        }
        let index = self.starts.partition_point(|&start| start <= doc) - 1;
        self.readers[index].document(doc - self.starts[index])
    }

    /// Merged cursor over the terms of all segments, before the first term.
    pub fn terms(&self) -> Result<MultiTermEnum<'_>> {
        let mut enums = Vec::with_capacity(self.readers.len());
        for (segment, reader) in self.readers.iter().enumerate() {
            let mut terms = reader.terms()?;
            if terms.next()? {
                enums.push(HeapEntry { segment, terms });
            } else {
                terms.close()?;
            }
        }
        Ok(MultiTermEnum::new(&self.readers, enums))
    }

    /// Merged cursor whose first `next` lands on the first term `>= target`.
    pub fn terms_from(&self, target: &Term) -> Result<MultiTermEnum<'_>> {
        let mut enums = Vec::with_capacity(self.readers.len());
        for (segment, reader) in self.readers.iter().enumerate() {
            let terms = reader.terms_from(target)?;
            if terms.term().is_some() {
                enums.push(HeapEntry { segment, terms });
            } else {
                terms.close()?;
            }
        }
        Ok(MultiTermEnum::new(&self.readers, enums))
    }

    /// Close every segment reader, reporting the first failure.
    pub fn close(&self) -> Result<()> {
        let mut first = Ok(());
        for reader in &self.readers {
            if let Err(e) = reader.close() {
                log::warn!("failed to close {}: {e}", reader.segment_name());
                if first.is_ok() {
                    first = Err(e);
                }
            }
        }
        first
    }
}

#[derive(Debug)]
struct HeapEntry {
    segment: usize,
    terms: SegmentTermEnum,
}

impl HeapEntry {
    fn key(&self) -> Option<&Term> {
        self.terms.term()
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // Reversed so the max-heap yields the smallest term first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key()
            .cmp(&self.key())
            .then_with(|| other.segment.cmp(&self.segment))
    }
}

/// Union of several segments' term cursors in term order. Each distinct term
/// is reported once, with the live doc frequencies of all segments summed.
/// Terms whose every posting is deleted are skipped.
#[derive(Debug)]
pub struct MultiTermEnum<'a> {
    readers: &'a [SegmentReader],
    queue: BinaryHeap<HeapEntry>,
    current: Option<Term>,
    prev: Option<Term>,
    doc_freq: u64,
}

impl<'a> MultiTermEnum<'a> {
    fn new(readers: &'a [SegmentReader], enums: Vec<HeapEntry>) -> Self {
        MultiTermEnum {
            readers,
            queue: enums.into_iter().collect(),
            current: None,
            prev: None,
            doc_freq: 0,
        }
    }

    /// Advance to the next distinct term with live documents. Returns
    /// `false` once every segment is exhausted.
    pub fn next(&mut self) -> Result<bool> {
        let readers = self.readers;
        loop {
            let Some(top) = self.queue.peek().and_then(|entry| entry.key().cloned()) else {
                if let Some(current) = self.current.take() {
                    self.prev = Some(current);
                }
                self.doc_freq = 0;
                return Ok(false);
            };

            let mut doc_freq = 0u64;
            while let Some(mut entry) = self.queue.peek_mut() {
                if entry.key() != Some(&top) {
                    break;
                }
                let info = entry.terms.term_info();
                doc_freq += readers[entry.segment].live_doc_freq(&top, info)? as u64;
                if !entry.terms.next()? {
                    let finished = PeekMut::pop(entry);
                    finished.terms.close()?;
                }
            }
            if doc_freq == 0 {
                log::trace!("skipping {top}: every posting is deleted");
                continue;
            }

            self.prev = self.current.replace(top);
            self.doc_freq = doc_freq;
            return Ok(true);
        }
    }

    /// Current term, `None` before the first `next` and once exhausted.
    pub fn term(&self) -> Option<&Term> {
        self.current.as_ref()
    }

    /// Term reported before the current one. Still valid after exhaustion.
    pub fn prev(&self) -> Option<&Term> {
        self.prev.as_ref()
    }

    /// Summed doc frequency of the current term.
    pub fn doc_freq(&self) -> u64 {
        self.doc_freq
    }

    pub fn close(self) -> Result<()> {
        for entry in self.queue.into_vec() {
            entry.terms.close()?;
        }
        Ok(())
    }
}
