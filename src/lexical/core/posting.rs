//! Posting cursors over frequency (`.frq`) and position (`.prx`) data.
//!
//! For every term the frequency file holds one entry per document. Fields
//! indexed with positions write `doc_delta << 1 | (freq == 1)` followed by
//! the frequency when it is not one; other fields write the plain document
//! delta. Position deltas (restarting at every document) go to `.prx`.
//!
//! When a term has at least `skip_interval` documents, a single-level skip
//! list follows its postings in `.frq`: one entry per `skip_interval`
//! documents with the document number, the `.frq` offset and the `.prx`
//! offset right after that posting, all delta coded.

use std::io::{Seek, SeekFrom};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Result, SpindleError};
use crate::lexical::core::deletes::DeletedDocs;
use crate::lexical::core::terms::TermInfo;
use crate::lexical::index::segment::{FREQ_EXTENSION, PROX_EXTENSION, segment_file_name};
use crate::storage::structured::StructWriter;
use crate::storage::{Storage, StorageInput, StorageOutput};
use crate::util::varint;

/// Document number reported by an exhausted cursor.
pub const NO_MORE_DOCS: u32 = u32::MAX;

pub const POSTINGS_VERSION: u32 = 1;

/// Iteration over one term's documents and the positions within each.
///
/// Cursors are private to their consumer: two cursors over the same term
/// never affect each other.
pub trait TermPositions: Send + std::fmt::Debug {
    /// Current document. Undefined before the first `next`, [`NO_MORE_DOCS`]
    /// once exhausted.
    fn doc(&self) -> u32;

    /// Occurrences of the term in the current document.
    fn freq(&self) -> u32;

    /// Move to the next document. Returns `false` when there are none left.
    fn next(&mut self) -> Result<bool>;

    /// Move to the first document `>= target` after the current one.
    /// Always advances at least one document.
    fn skip_to(&mut self, target: u32) -> Result<bool>;

    /// Next position in the current document. May be called at most
    /// `freq()` times per document.
    fn next_position(&mut self) -> Result<u32>;

    /// Number of documents in the posting list.
    fn doc_freq(&self) -> u32;

    fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
struct SkipEntry {
    doc: u32,
    freq_pointer: u64,
    prox_pointer: u64,
    count: u32,
}

/// Cursor over a term's on-disk postings.
#[derive(Debug)]
pub struct SegmentTermPositions {
    freq: Box<dyn StorageInput>,
    prox: Option<Box<dyn StorageInput>>,
    deleted: Option<Arc<DeletedDocs>>,
    info: TermInfo,
    skip_interval: u32,
    has_positions: bool,

    count: u32,
    doc: u32,
    freq_value: u32,

    // positions of the current doc not read yet
    pending_positions: u32,
    // positions of earlier docs still to be skipped in the prox stream
    lazy_skip: u64,
    position: u32,

    skips: Option<Vec<SkipEntry>>,
}

impl SegmentTermPositions {
    /// Build a cursor from private clones of the segment streams.
    ///
    /// `prox` is required when `has_positions` is set.
    pub fn new(
        mut freq: Box<dyn StorageInput>,
        mut prox: Option<Box<dyn StorageInput>>,
        info: TermInfo,
        skip_interval: u32,
        has_positions: bool,
        deleted: Option<Arc<DeletedDocs>>,
    ) -> Result<Self> {
        freq.seek(SeekFrom::Start(info.freq_pointer))?;
        if has_positions {
            match prox.as_mut() {
                Some(prox) => {
                    prox.seek(SeekFrom::Start(info.prox_pointer))?;
                }
                None => {
                    return Err(SpindleError::index(
                        "positions requested but the segment has no position data",
                    ));
                }
            }
        }
        Ok(SegmentTermPositions {
            freq,
            prox,
            deleted,
            info,
            skip_interval,
            has_positions,
            count: 0,
            doc: 0,
            freq_value: 0,
            pending_positions: 0,
            lazy_skip: 0,
            position: 0,
            skips: None,
        })
    }

    fn read_posting(&mut self) -> Result<()> {
        let code = varint::read_u32(&mut self.freq)?;
        let base = if self.count == 0 { 0 } else { self.doc };
        if self.has_positions {
            self.doc = base + (code >> 1);
            self.freq_value = if code & 1 != 0 {
                1
            } else {
                varint::read_u32(&mut self.freq)?
            };
            self.lazy_skip += self.pending_positions as u64;
            self.pending_positions = self.freq_value;
            self.position = 0;
        } else {
            self.doc = base + code;
            self.freq_value = 1;
        }
        self.count += 1;
        Ok(())
    }

    fn load_skips(&mut self) -> Result<()> {
        let mut entries = Vec::new();
        if self.info.doc_freq >= self.skip_interval && self.skip_interval > 0 {
            let mut input = self.freq.clone_input()?;
            input.seek(SeekFrom::Start(self.info.freq_pointer + self.info.skip_offset))?;
            let mut doc = 0u32;
            let mut freq_pointer = self.info.freq_pointer;
            let mut prox_pointer = self.info.prox_pointer;
            for k in 1..=(self.info.doc_freq / self.skip_interval) {
                doc += varint::read_u32(&mut input)?;
                freq_pointer += varint::read_u64(&mut input)?;
                prox_pointer += varint::read_u64(&mut input)?;
                entries.push(SkipEntry {
                    doc,
                    freq_pointer,
                    prox_pointer,
                    count: k * self.skip_interval,
                });
            }
            input.close()?;
        }
        self.skips = Some(entries);
        Ok(())
    }

    fn apply_skip(&mut self, target: u32) -> Result<()> {
        if self.skips.is_none() {
            self.load_skips()?;
        }
        let Some(skips) = self.skips.as_ref() else {
            return Ok(());
        };
        let usable = skips.partition_point(|entry| entry.doc < target);
        let Some(entry) = usable.checked_sub(1).map(|i| skips[i]) else {
            return Ok(());
        };
        if entry.count <= self.count {
            return Ok(());
        }

        self.freq.seek(SeekFrom::Start(entry.freq_pointer))?;
        if self.has_positions {
            if let Some(prox) = self.prox.as_mut() {
                prox.seek(SeekFrom::Start(entry.prox_pointer))?;
            }
        }
        self.doc = entry.doc;
        self.count = entry.count;
        self.pending_positions = 0;
        self.lazy_skip = 0;
        Ok(())
    }

    fn skip_prox(&mut self) -> Result<()> {
        if let Some(prox) = self.prox.as_mut() {
            for _ in 0..self.lazy_skip {
                varint::skip(prox)?;
            }
        }
        self.lazy_skip = 0;
        Ok(())
    }
}

impl TermPositions for SegmentTermPositions {
    fn doc(&self) -> u32 {
        self.doc
    }

    fn freq(&self) -> u32 {
        self.freq_value
    }

    fn next(&mut self) -> Result<bool> {
        loop {
            if self.count >= self.info.doc_freq {
                self.doc = NO_MORE_DOCS;
                return Ok(false);
            }
            self.read_posting()?;
            match &self.deleted {
                Some(deleted) if deleted.is_deleted(self.doc) => continue,
                _ => return Ok(true),
            }
        }
    }

    fn skip_to(&mut self, target: u32) -> Result<bool> {
        if self.doc == NO_MORE_DOCS && self.count > 0 {
            return Ok(false);
        }
        if self.info.doc_freq >= self.skip_interval {
            self.apply_skip(target)?;
        }
        loop {
            if !self.next()? {
                return Ok(false);
            }
            if self.doc >= target {
                return Ok(true);
            }
        }
    }

    fn next_position(&mut self) -> Result<u32> {
        if !self.has_positions {
            return Err(SpindleError::invalid_operation(
                "field was indexed without positions",
            ));
        }
        if self.pending_positions == 0 {
            return Err(SpindleError::invalid_operation(format!(
                "all {} positions of doc {} already read",
                self.freq_value, self.doc
            )));
        }
        if self.lazy_skip > 0 {
            self.skip_prox()?;
        }
        let delta = match self.prox.as_mut() {
            Some(prox) => varint::read_u32(prox)?,
            None => return Err(SpindleError::index("position stream is closed")),
        };
        self.position += delta;
        self.pending_positions -= 1;
        Ok(self.position)
    }

    fn doc_freq(&self) -> u32 {
        self.info.doc_freq
    }

    fn close(&mut self) -> Result<()> {
        self.freq.close()?;
        if let Some(prox) = self.prox.as_mut() {
            prox.close()?;
        }
        Ok(())
    }
}

/// Call counters shared between a [`MemoryTermPositions`] and its creator.
#[derive(Debug, Default)]
pub struct CursorStats {
    nexts: AtomicUsize,
    skips: AtomicUsize,
}

impl CursorStats {
    /// Number of `next` calls.
    pub fn next_calls(&self) -> usize {
        self.nexts.load(Ordering::Relaxed)
    }

    /// Number of `skip_to` calls.
    pub fn skip_calls(&self) -> usize {
        self.skips.load(Ordering::Relaxed)
    }
}

/// Cursor over postings held in memory.
#[derive(Debug)]
pub struct MemoryTermPositions {
    postings: Vec<(u32, Vec<u32>)>,
    index: Option<usize>,
    position_index: usize,
    stats: Arc<CursorStats>,
}

impl MemoryTermPositions {
    /// `postings` must be sorted by document with ascending positions.
    pub fn new(postings: Vec<(u32, Vec<u32>)>) -> Self {
        debug_assert!(postings.windows(2).all(|w| w[0].0 < w[1].0));
        MemoryTermPositions {
            postings,
            index: None,
            position_index: 0,
            stats: Arc::new(CursorStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<CursorStats> {
        Arc::clone(&self.stats)
    }

    fn exhausted(&self) -> bool {
        matches!(self.index, Some(i) if i >= self.postings.len())
    }
}

impl TermPositions for MemoryTermPositions {
    fn doc(&self) -> u32 {
        match self.index {
            Some(i) => self.postings.get(i).map(|p| p.0).unwrap_or(NO_MORE_DOCS),
            None => 0,
        }
    }

    fn freq(&self) -> u32 {
        self.index
            .and_then(|i| self.postings.get(i))
            .map(|p| p.1.len() as u32)
            .unwrap_or(0)
    }

    fn next(&mut self) -> Result<bool> {
        self.stats.nexts.fetch_add(1, Ordering::Relaxed);
        let next = self.index.map(|i| i + 1).unwrap_or(0).min(self.postings.len());
        self.index = Some(next);
        self.position_index = 0;
        Ok(!self.exhausted())
    }

    fn skip_to(&mut self, target: u32) -> Result<bool> {
        self.stats.skips.fetch_add(1, Ordering::Relaxed);
        let start = self.index.map(|i| i + 1).unwrap_or(0).min(self.postings.len());
        let offset = self.postings[start..].partition_point(|p| p.0 < target);
        self.index = Some(start + offset);
        self.position_index = 0;
        Ok(!self.exhausted())
    }

    fn next_position(&mut self) -> Result<u32> {
        let positions = self
            .index
            .and_then(|i| self.postings.get(i))
            .map(|p| &p.1)
            .ok_or_else(|| SpindleError::invalid_operation("cursor is not on a document"))?;
        let position = positions.get(self.position_index).copied().ok_or_else(|| {
            SpindleError::invalid_operation("all positions of the document already read")
        })?;
        self.position_index += 1;
        Ok(position)
    }

    fn doc_freq(&self) -> u32 {
        self.postings.len() as u32
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes `.frq` and `.prx` for one segment, one term at a time.
pub struct PostingsWriter {
    freq: StructWriter<Box<dyn StorageOutput>>,
    prox: Option<StructWriter<Box<dyn StorageOutput>>>,
    skip_interval: u32,

    term_positions: bool,
    freq_start: u64,
    prox_start: u64,
    last_doc: u32,
    doc_count: u32,
    skips: Vec<(u32, u64, u64)>,
}

impl PostingsWriter {
    /// Create both files. `.prx` is only written when `has_prox` is set.
    pub fn new(
        storage: &dyn Storage,
        segment: &str,
        has_prox: bool,
        skip_interval: u32,
    ) -> Result<Self> {
        if skip_interval == 0 {
            return Err(SpindleError::invalid_operation("skip interval must be positive"));
        }
        let mut freq = StructWriter::new(
            storage.create_output(&segment_file_name(segment, FREQ_EXTENSION))?,
        );
        freq.write_header(POSTINGS_VERSION)?;
        let prox = if has_prox {
            let mut prox = StructWriter::new(
                storage.create_output(&segment_file_name(segment, PROX_EXTENSION))?,
            );
            prox.write_header(POSTINGS_VERSION)?;
            Some(prox)
        } else {
            None
        };
        Ok(PostingsWriter {
            freq,
            prox,
            skip_interval,
            term_positions: false,
            freq_start: 0,
            prox_start: 0,
            last_doc: 0,
            doc_count: 0,
            skips: Vec::new(),
        })
    }

    /// Begin the postings of a new term.
    pub fn start_term(&mut self, has_positions: bool) -> Result<()> {
        if has_positions && self.prox.is_none() {
            return Err(SpindleError::invalid_operation(
                "positional term in a segment without position data",
            ));
        }
        self.term_positions = has_positions;
        self.freq_start = self.freq.position();
        self.prox_start = self.prox_position();
        self.last_doc = 0;
        self.doc_count = 0;
        self.skips.clear();
        Ok(())
    }

    /// Add one document. `positions` are ignored for non-positional terms.
    pub fn add_doc(&mut self, doc: u32, positions: &[u32]) -> Result<()> {
        if self.doc_count > 0 && doc <= self.last_doc {
            return Err(SpindleError::invalid_operation(format!(
                "docs out of order: {doc} after {}",
                self.last_doc
            )));
        }
        let delta = doc - if self.doc_count == 0 { 0 } else { self.last_doc };

        if self.term_positions {
            let freq = positions.len() as u32;
            if freq == 0 {
                return Err(SpindleError::invalid_operation(format!(
                    "doc {doc} has no positions"
                )));
            }
            if freq == 1 {
                self.freq.write_varint(((delta as u64) << 1) | 1)?;
            } else {
                self.freq.write_varint((delta as u64) << 1)?;
                self.freq.write_varint(freq as u64)?;
            }
            if let Some(prox) = self.prox.as_mut() {
                let mut last = 0;
                for &position in positions {
                    if position < last {
                        return Err(SpindleError::invalid_operation(format!(
                            "positions of doc {doc} are not ascending"
                        )));
                    }
                    prox.write_varint((position - last) as u64)?;
                    last = position;
                }
            }
        } else {
            self.freq.write_varint(delta as u64)?;
        }

        self.last_doc = doc;
        self.doc_count += 1;
        if self.doc_count % self.skip_interval == 0 {
            self.skips.push((doc, self.freq.position(), self.prox_position()));
        }
        Ok(())
    }

    /// Finish the current term, writing its skip data.
    pub fn finish_term(&mut self) -> Result<TermInfo> {
        let mut info = TermInfo {
            doc_freq: self.doc_count,
            freq_pointer: self.freq_start,
            prox_pointer: self.prox_start,
            skip_offset: 0,
        };
        if self.doc_count >= self.skip_interval {
            info.skip_offset = self.freq.position() - self.freq_start;
            let (mut doc, mut freq_pointer, mut prox_pointer) = (0, self.freq_start, self.prox_start);
            for &(skip_doc, skip_freq, skip_prox) in &self.skips {
                self.freq.write_varint((skip_doc - doc) as u64)?;
                self.freq.write_varint(skip_freq - freq_pointer)?;
                self.freq.write_varint(skip_prox - prox_pointer)?;
                doc = skip_doc;
                freq_pointer = skip_freq;
                prox_pointer = skip_prox;
            }
        }
        Ok(info)
    }

    pub fn finish(self) -> Result<()> {
        self.freq.finish()?;
        if let Some(prox) = self.prox {
            prox.finish()?;
        }
        Ok(())
    }

    fn prox_position(&self) -> u64 {
        self.prox.as_ref().map(|p| p.position()).unwrap_or(0)
    }
}
