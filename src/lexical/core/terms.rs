//! Term dictionary (`.tis`) and its sampled index (`.tii`).
//!
//! The dictionary lists every term of a segment in [`Term`] order. Entries
//! are prefix-compressed against the previous term and carry the posting
//! pointers as deltas:
//!
//! ```text
//! tis: header | term_count: u64 | index_interval: u32 | skip_interval: u32
//!      | (field: varint, prefix: varint, suffix: bytes, doc_freq: varint,
//!         freq_delta: varint, prox_delta: varint, [skip_offset: varint]) * term_count
//!      | crc32
//! ```
//!
//! `skip_offset` is only present when `doc_freq >= skip_interval`. Every
//! `index_interval`-th term is also written to `.tii` together with its
//! absolute pointers and the `.tis` offset right after its entry, so a seek
//! can jump close to the target and scan the rest.

use std::cmp::Ordering;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, SpindleError};
use crate::lexical::core::field_infos::FieldInfos;
use crate::lexical::index::config::TermsIndexPolicy;
use crate::lexical::index::segment::{TERMS_EXTENSION, TERMS_INDEX_EXTENSION, segment_file_name};
use crate::lexical::term::Term;
use crate::storage::structured::{HEADER_LEN, StructReader, StructWriter};
use crate::storage::{Storage, StorageInput};
use crate::util::varint;

const TERMS_VERSION: u32 = 1;

/// Bytes before the first dictionary entry.
const TIS_HEADER_LEN: u64 = HEADER_LEN + 8 + 4 + 4;

/// Dictionary data for one term.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TermInfo {
    /// Number of documents containing the term, deleted ones included.
    pub doc_freq: u32,
    /// Start of the term's postings in `.frq`.
    pub freq_pointer: u64,
    /// Start of the term's positions in `.prx`.
    pub prox_pointer: u64,
    /// Offset of the skip data from `freq_pointer`, zero when there is none.
    pub skip_offset: u64,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    term: Term,
    info: TermInfo,
    tis_pointer: u64,
    position: u64,
}

/// Reader over a segment's term dictionary.
///
/// The reader only hands out cursors; every [`SegmentTermEnum`] reads from
/// its own clone of the dictionary stream.
#[derive(Debug)]
pub struct TermInfosReader {
    segment: String,
    base: Mutex<Option<Box<dyn StorageInput>>>,
    field_infos: Arc<FieldInfos>,
    size: u64,
    index_interval: u32,
    skip_interval: u32,
    index: Option<Vec<IndexEntry>>,
    divisor: usize,
}

impl TermInfosReader {
    /// Open the dictionary of `segment`, loading the terms index according to `policy`.
    pub fn open(
        storage: &dyn Storage,
        segment: &str,
        field_infos: Arc<FieldInfos>,
        buffer_size: usize,
        policy: TermsIndexPolicy,
    ) -> Result<Self> {
        let divisor = match policy {
            TermsIndexPolicy::InMemory { divisor: 0 } => {
                return Err(SpindleError::invalid_operation(
                    "terms index divisor must be at least 1",
                ));
            }
            TermsIndexPolicy::InMemory { divisor } => Some(divisor),
            TermsIndexPolicy::NoIndex => None,
        };

        let tis_name = segment_file_name(segment, TERMS_EXTENSION);
        let input = storage.open_input_buffered(&tis_name, buffer_size)?;
        let mut reader = StructReader::new(input)?;
        let header = Self::read_header(&mut reader, &tis_name);
        let mut input = reader.into_inner();
        let (size, index_interval, skip_interval) = match header {
            Ok(header) => header,
            Err(e) => {
                let _ = input.close();
                return Err(e);
            }
        };

        let index = match divisor {
            Some(divisor) => match Self::read_index(storage, segment, &field_infos, divisor) {
                Ok(index) => Some(index),
                Err(e) => {
                    let _ = input.close();
                    return Err(e);
                }
            },
            None => None,
        };

        log::debug!(
            "opened terms of {segment}: {size} terms, index {}",
            match &index {
                Some(entries) => format!("{} entries", entries.len()),
                None => "not loaded".to_string(),
            }
        );

        Ok(TermInfosReader {
            segment: segment.to_string(),
            base: Mutex::new(Some(input)),
            field_infos,
            size,
            index_interval,
            skip_interval,
            index,
            divisor: divisor.unwrap_or(0),
        })
    }

    fn read_header<R: StorageInput>(
        reader: &mut StructReader<R>,
        name: &str,
    ) -> Result<(u64, u32, u32)> {
        reader.check_header(name, TERMS_VERSION)?;
        let size = reader.read_u64()?;
        let index_interval = reader.read_u32()?;
        let skip_interval = reader.read_u32()?;
        if index_interval == 0 || skip_interval == 0 {
            return Err(SpindleError::corrupt_index(format!(
                "{name}: zero index or skip interval"
            )));
        }
        Ok((size, index_interval, skip_interval))
    }

    fn read_index(
        storage: &dyn Storage,
        segment: &str,
        field_infos: &FieldInfos,
        divisor: usize,
    ) -> Result<Vec<IndexEntry>> {
        let name = segment_file_name(segment, TERMS_INDEX_EXTENSION);
        let input = storage.open_input(&name)?;
        let mut reader = StructReader::new(input)?;
        reader.check_header(&name, TERMS_VERSION)?;

        let count = reader.read_varint()?;
        let mut entries = Vec::with_capacity((count as usize).div_ceil(divisor));
        for i in 0..count {
            let field = field_infos.field_name(reader.read_varint()? as u32)?.to_string();
            let text = reader.read_string()?;
            let info = TermInfo {
                doc_freq: reader.read_varint()? as u32,
                freq_pointer: reader.read_varint()?,
                prox_pointer: reader.read_varint()?,
                skip_offset: reader.read_varint()?,
            };
            let tis_pointer = reader.read_varint()?;
            let position = reader.read_varint()?;
            if i as usize % divisor == 0 {
                entries.push(IndexEntry {
                    term: Term::new(field, text),
                    info,
                    tis_pointer,
                    position,
                });
            }
        }
        reader.verify_footer(&name)?;
        reader.close()?;
        Ok(entries)
    }

    /// Number of terms in the dictionary.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether the terms index is loaded.
    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    /// Subsampling divisor of the loaded index, zero when none is loaded.
    pub fn index_divisor(&self) -> usize {
        self.divisor
    }

    pub fn skip_interval(&self) -> u32 {
        self.skip_interval
    }

    pub fn index_interval(&self) -> u32 {
        self.index_interval
    }

    pub fn field_infos(&self) -> &Arc<FieldInfos> {
        &self.field_infos
    }

    /// A cursor positioned before the first term.
    pub fn terms(&self) -> Result<SegmentTermEnum> {
        let mut input = self.clone_base()?;
        input.seek(SeekFrom::Start(TIS_HEADER_LEN))?;
        Ok(SegmentTermEnum {
            input,
            field_infos: Arc::clone(&self.field_infos),
            size: self.size,
            skip_interval: self.skip_interval,
            position: -1,
            text: Vec::new(),
            term: None,
            prev: None,
            info: TermInfo::default(),
        })
    }

    /// A cursor positioned on the first term greater than or equal to `target`.
    pub fn terms_from(&self, target: &Term) -> Result<SegmentTermEnum> {
        let mut terms = self.terms()?;
        if let Some(entry) = self.index_entry_for(target) {
            terms.seek_to(entry)?;
        }
        terms.scan_to(target)?;
        Ok(terms)
    }

    /// Dictionary data of `term`, if present.
    pub fn get(&self, term: &Term) -> Result<Option<TermInfo>> {
        let mut terms = self.terms_from(term)?;
        let found = terms.term() == Some(term);
        let info = found.then(|| terms.term_info());
        terms.close()?;
        Ok(info)
    }

    /// Release the dictionary stream. Cursors already handed out stay usable.
    pub fn close(&self) -> Result<()> {
        match self.base.lock().take() {
            Some(mut input) => input.close(),
            None => Ok(()),
        }
    }

    fn clone_base(&self) -> Result<Box<dyn StorageInput>> {
        let base = self.base.lock();
        match base.as_ref() {
            Some(input) => input.clone_input(),
            None => Err(SpindleError::invalid_operation(format!(
                "term dictionary of {} is closed",
                self.segment
            ))),
        }
    }

    fn index_entry_for(&self, target: &Term) -> Option<&IndexEntry> {
        let index = self.index.as_ref()?;
        let after = index.partition_point(|entry| entry.term <= *target);
        after.checked_sub(1).map(|i| &index[i])
    }
}

/// Sorted cursor over a term dictionary.
#[derive(Debug)]
pub struct SegmentTermEnum {
    input: Box<dyn StorageInput>,
    field_infos: Arc<FieldInfos>,
    size: u64,
    skip_interval: u32,
    position: i64,
    text: Vec<u8>,
    term: Option<Term>,
    prev: Option<Term>,
    info: TermInfo,
}

impl SegmentTermEnum {
    /// Advance to the next term. Returns `false` once the dictionary is exhausted.
    pub fn next(&mut self) -> Result<bool> {
        if self.position + 1 >= self.size as i64 {
            if let Some(last) = self.term.take() {
                self.prev = Some(last);
            }
            self.position = self.size as i64;
            return Ok(false);
        }

        let field_number = varint::read_u32(&mut self.input)?;
        let prefix = varint::read_u64(&mut self.input)? as usize;
        let suffix_len = varint::read_u64(&mut self.input)? as usize;
        if prefix > self.text.len() {
            return Err(SpindleError::corrupt_index(format!(
                "term prefix {prefix} longer than previous term"
            )));
        }
        self.text.truncate(prefix);
        let start = self.text.len();
        self.text.resize(start + suffix_len, 0);
        self.input.read_exact(&mut self.text[start..])?;

        let doc_freq = varint::read_u32(&mut self.input)?;
        self.info.freq_pointer += varint::read_u64(&mut self.input)?;
        self.info.prox_pointer += varint::read_u64(&mut self.input)?;
        self.info.doc_freq = doc_freq;
        self.info.skip_offset = if doc_freq >= self.skip_interval {
            varint::read_u64(&mut self.input)?
        } else {
            0
        };

        let field = self.field_infos.field_name(field_number)?.to_string();
        let text = String::from_utf8(self.text.clone())
            .map_err(|e| SpindleError::corrupt_index(format!("term is not UTF-8: {e}")))?;

        self.prev = self.term.replace(Term::new(field, text));
        self.position += 1;
        Ok(true)
    }

    /// Current term, `None` before the first `next` and after exhaustion.
    pub fn term(&self) -> Option<&Term> {
        self.term.as_ref()
    }

    /// Term before the current one. After exhaustion this is the last term.
    pub fn prev(&self) -> Option<&Term> {
        self.prev.as_ref()
    }

    /// Document frequency of the current term.
    pub fn doc_freq(&self) -> u32 {
        if self.term.is_some() { self.info.doc_freq } else { 0 }
    }

    /// Dictionary data of the current term.
    pub fn term_info(&self) -> TermInfo {
        self.info
    }

    /// Ordinal of the current term.
    pub fn position(&self) -> i64 {
        self.position
    }

    pub fn close(mut self) -> Result<()> {
        self.input.close()
    }

    fn seek_to(&mut self, entry: &IndexEntry) -> Result<()> {
        self.input.seek(SeekFrom::Start(entry.tis_pointer))?;
        self.position = entry.position as i64;
        self.text.clear();
        self.text.extend_from_slice(entry.term.text().as_bytes());
        self.term = Some(entry.term.clone());
        self.prev = None;
        self.info = entry.info;
        Ok(())
    }

    fn scan_to(&mut self, target: &Term) -> Result<()> {
        loop {
            let behind = match &self.term {
                Some(term) => term.cmp(target) == Ordering::Less,
                None => self.position < self.size as i64,
            };
            if !behind || !self.next()? {
                return Ok(());
            }
        }
    }
}

/// Writes `.tis` and `.tii` for one segment. Terms must arrive in order.
pub struct TermInfosWriter<'a> {
    storage: &'a dyn Storage,
    segment: String,
    field_infos: &'a FieldInfos,
    index_interval: u32,
    skip_interval: u32,
    entries: Vec<u8>,
    index: Vec<u8>,
    index_count: u64,
    count: u64,
    last_term: Option<Term>,
    last_info: TermInfo,
}

impl<'a> TermInfosWriter<'a> {
    pub fn new(
        storage: &'a dyn Storage,
        segment: &str,
        field_infos: &'a FieldInfos,
        index_interval: u32,
        skip_interval: u32,
    ) -> Result<Self> {
        if index_interval == 0 || skip_interval == 0 {
            return Err(SpindleError::invalid_operation(
                "index and skip intervals must be positive",
            ));
        }
        Ok(TermInfosWriter {
            storage,
            segment: segment.to_string(),
            field_infos,
            index_interval,
            skip_interval,
            entries: Vec::new(),
            index: Vec::new(),
            index_count: 0,
            count: 0,
            last_term: None,
            last_info: TermInfo::default(),
        })
    }

    pub fn skip_interval(&self) -> u32 {
        self.skip_interval
    }

    /// Append `term` with its dictionary data.
    pub fn add(&mut self, term: &Term, info: &TermInfo) -> Result<()> {
        let field_number = self.field_infos.field_number(term.field()).ok_or_else(|| {
            SpindleError::index(format!("field {} is not registered", term.field()))
        })?;
        if let Some(last) = &self.last_term {
            if last >= term {
                return Err(SpindleError::invalid_operation(format!(
                    "terms out of order: {term} after {last}"
                )));
            }
        }
        if info.freq_pointer < self.last_info.freq_pointer
            || info.prox_pointer < self.last_info.prox_pointer
        {
            return Err(SpindleError::invalid_operation(format!(
                "posting pointers of {term} move backwards"
            )));
        }

        let previous = self.last_term.as_ref().map(|t| t.text().as_bytes()).unwrap_or(&[]);
        let text = term.text().as_bytes();
        let prefix = previous
            .iter()
            .zip(text)
            .take_while(|(a, b)| a == b)
            .count();

        varint::write_u64(&mut self.entries, field_number as u64)?;
        varint::write_u64(&mut self.entries, prefix as u64)?;
        varint::write_u64(&mut self.entries, (text.len() - prefix) as u64)?;
        self.entries.extend_from_slice(&text[prefix..]);
        varint::write_u64(&mut self.entries, info.doc_freq as u64)?;
        varint::write_u64(&mut self.entries, info.freq_pointer - self.last_info.freq_pointer)?;
        varint::write_u64(&mut self.entries, info.prox_pointer - self.last_info.prox_pointer)?;
        if info.doc_freq >= self.skip_interval {
            varint::write_u64(&mut self.entries, info.skip_offset)?;
        }

        if self.count % self.index_interval as u64 == 0 {
            varint::write_u64(&mut self.index, field_number as u64)?;
            varint::write_u64(&mut self.index, text.len() as u64)?;
            self.index.extend_from_slice(text);
            varint::write_u64(&mut self.index, info.doc_freq as u64)?;
            varint::write_u64(&mut self.index, info.freq_pointer)?;
            varint::write_u64(&mut self.index, info.prox_pointer)?;
            varint::write_u64(&mut self.index, info.skip_offset)?;
            varint::write_u64(&mut self.index, TIS_HEADER_LEN + self.entries.len() as u64)?;
            varint::write_u64(&mut self.index, self.count)?;
            self.index_count += 1;
        }

        self.count += 1;
        self.last_term = Some(term.clone());
        self.last_info = *info;
        Ok(())
    }

    /// Write both files.
    pub fn finish(self) -> Result<()> {
        let tis_name = segment_file_name(&self.segment, TERMS_EXTENSION);
        let mut writer = StructWriter::new(self.storage.create_output(&tis_name)?);
        writer.write_header(TERMS_VERSION)?;
        writer.write_u64(self.count)?;
        writer.write_u32(self.index_interval)?;
        writer.write_u32(self.skip_interval)?;
        writer.write_raw(&self.entries)?;
        writer.finish()?;

        let tii_name = segment_file_name(&self.segment, TERMS_INDEX_EXTENSION);
        let mut writer = StructWriter::new(self.storage.create_output(&tii_name)?);
        writer.write_header(TERMS_VERSION)?;
        writer.write_varint(self.index_count)?;
        writer.write_raw(&self.index)?;
        writer.finish()?;

        log::debug!(
            "wrote {} terms ({} indexed) for {}",
            self.count,
            self.index_count,
            self.segment
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    fn field_infos() -> FieldInfos {
        let mut infos = FieldInfos::new();
        infos.add("body", true, true, false, true);
        infos.add("id", true, false, false, false);
        infos
    }

    fn write_terms(storage: &MemoryStorage, count: usize, index_interval: u32) -> Vec<Term> {
        let infos = field_infos();
        let mut writer = TermInfosWriter::new(storage, "_0", &infos, index_interval, 4).unwrap();
        let mut terms: Vec<Term> = (0..count)
            .map(|i| Term::new("body", format!("t{i:04}")))
            .chain((0..3).map(|i| Term::new("id", format!("{i}"))))
            .collect();
        terms.sort();
        for (i, term) in terms.iter().enumerate() {
            let info = TermInfo {
                doc_freq: (i % 7) as u32 + 1,
                freq_pointer: i as u64 * 10,
                prox_pointer: i as u64 * 20,
                skip_offset: if (i % 7) + 1 >= 4 { 3 } else { 0 },
            };
            writer.add(term, &info).unwrap();
        }
        writer.finish().unwrap();
        terms
    }

    fn open(storage: &MemoryStorage, policy: TermsIndexPolicy) -> TermInfosReader {
        TermInfosReader::open(storage, "_0", Arc::new(field_infos()), 1024, policy).unwrap()
    }

    #[test]
    fn test_enumerate_in_order_with_prev() {
        let storage = MemoryStorage::default();
        let terms = write_terms(&storage, 50, 8);
        let reader = open(&storage, TermsIndexPolicy::default());
        assert_eq!(reader.size(), terms.len() as u64);

        let mut terms_enum = reader.terms().unwrap();
        assert!(terms_enum.term().is_none());
        let mut seen = Vec::new();
        while terms_enum.next().unwrap() {
            let current = terms_enum.term().unwrap().clone();
            assert_eq!(terms_enum.prev(), seen.last());
            seen.push(current);
        }
        assert_eq!(seen, terms);
        assert!(terms_enum.term().is_none());
        assert_eq!(terms_enum.prev(), terms.last());
        assert!(!terms_enum.next().unwrap());
        assert_eq!(terms_enum.prev(), terms.last());
        terms_enum.close().unwrap();

        reader.close().unwrap();
        assert_eq!(storage.open_inputs(), 0);
    }

    #[test]
    fn test_get_with_and_without_index() {
        let storage = MemoryStorage::default();
        let terms = write_terms(&storage, 100, 16);

        for policy in [
            TermsIndexPolicy::InMemory { divisor: 1 },
            TermsIndexPolicy::InMemory { divisor: 3 },
            TermsIndexPolicy::NoIndex,
        ] {
            let reader = open(&storage, policy);
            assert_eq!(reader.has_index(), policy != TermsIndexPolicy::NoIndex);
            for (i, term) in terms.iter().enumerate() {
                let info = reader.get(term).unwrap().unwrap();
                assert_eq!(info.doc_freq, (i % 7) as u32 + 1);
                assert_eq!(info.freq_pointer, i as u64 * 10);
                assert_eq!(info.prox_pointer, i as u64 * 20);
            }
            assert!(reader.get(&Term::new("body", "t00005")).unwrap().is_none());
            assert!(reader.get(&Term::new("aaa", "x")).unwrap().is_none());
            assert!(reader.get(&Term::new("zzz", "x")).unwrap().is_none());
            reader.close().unwrap();
        }
        assert_eq!(storage.open_inputs(), 0);
    }

    #[test]
    fn test_terms_from() {
        let storage = MemoryStorage::default();
        write_terms(&storage, 40, 8);
        let reader = open(&storage, TermsIndexPolicy::default());

        let mut terms_enum = reader.terms_from(&Term::new("body", "t0010x")).unwrap();
        assert_eq!(terms_enum.term(), Some(&Term::new("body", "t0011")));
        assert!(terms_enum.next().unwrap());
        assert_eq!(terms_enum.prev(), Some(&Term::new("body", "t0011")));

        let terms_enum = reader.terms_from(&Term::new("zzz", "")).unwrap();
        assert!(terms_enum.term().is_none());
    }

    #[test]
    fn test_out_of_order_rejected() {
        let storage = MemoryStorage::default();
        let infos = field_infos();
        let mut writer = TermInfosWriter::new(&storage, "_0", &infos, 4, 4).unwrap();
        writer.add(&Term::new("body", "b"), &TermInfo::default()).unwrap();
        assert!(writer.add(&Term::new("body", "a"), &TermInfo::default()).is_err());
        assert!(writer.add(&Term::new("nope", "z"), &TermInfo::default()).is_err());
    }

    #[test]
    fn test_zero_divisor_rejected() {
        let storage = MemoryStorage::default();
        write_terms(&storage, 5, 4);
        let err = TermInfosReader::open(
            &storage,
            "_0",
            Arc::new(field_infos()),
            1024,
            TermsIndexPolicy::InMemory { divisor: 0 },
        )
        .unwrap_err();
        assert!(matches!(err, SpindleError::InvalidOperation(_)));
        assert_eq!(storage.open_inputs(), 0);
    }
}
