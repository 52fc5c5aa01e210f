//! Segment descriptors and the file naming scheme.
//!
//! A segment is an immutable slice of the index. Its files share the segment
//! name and are told apart by extension; with `use_compound_file` all of them
//! except deletions live inside `<name>.cfs`. Segments flushed together may
//! share a single document store (stored fields and term vectors) that lives
//! under another segment name, addressed by a document offset.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::Storage;

/// Compound container holding all per-segment files.
pub const COMPOUND_FILE_EXTENSION: &str = "cfs";
/// Compound container holding a shared document store.
pub const COMPOUND_FILE_STORE_EXTENSION: &str = "cfx";
/// Field metadata.
pub const FIELD_INFOS_EXTENSION: &str = "fnm";
/// Term dictionary.
pub const TERMS_EXTENSION: &str = "tis";
/// Sampled term dictionary index used for in-memory seeks.
pub const TERMS_INDEX_EXTENSION: &str = "tii";
/// Document and frequency postings.
pub const FREQ_EXTENSION: &str = "frq";
/// Position postings.
pub const PROX_EXTENSION: &str = "prx";
/// Stored fields pointer index.
pub const FIELDS_INDEX_EXTENSION: &str = "fdx";
/// Stored fields data.
pub const FIELDS_EXTENSION: &str = "fdt";
/// Term vectors pointer index.
pub const VECTORS_INDEX_EXTENSION: &str = "tvx";
/// Term vectors data.
pub const VECTORS_DOCUMENTS_EXTENSION: &str = "tvd";
/// Per-field length norms.
pub const NORMS_EXTENSION: &str = "nrm";
/// Deletion bitmap.
pub const DELETES_EXTENSION: &str = "del";

/// Name of the file listing the live segments.
pub const SEGMENTS_FILE: &str = "segments.json";

/// Extensions that go inside a segment's compound file.
pub const COMPOUND_EXTENSIONS: &[&str] = &[
    FIELD_INFOS_EXTENSION,
    TERMS_EXTENSION,
    TERMS_INDEX_EXTENSION,
    FREQ_EXTENSION,
    PROX_EXTENSION,
    FIELDS_INDEX_EXTENSION,
    FIELDS_EXTENSION,
    VECTORS_INDEX_EXTENSION,
    VECTORS_DOCUMENTS_EXTENSION,
    NORMS_EXTENSION,
];

/// Extensions that make up a document store.
pub const DOC_STORE_EXTENSIONS: &[&str] = &[
    FIELDS_INDEX_EXTENSION,
    FIELDS_EXTENSION,
    VECTORS_INDEX_EXTENSION,
    VECTORS_DOCUMENTS_EXTENSION,
];

/// Build `<segment>.<extension>`.
pub fn segment_file_name(segment: &str, extension: &str) -> String {
    format!("{segment}.{extension}")
}

/// Location of a document store shared with sibling segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocStoreInfo {
    /// Segment name the store files are named after.
    pub segment: String,
    /// Index of this segment's first document inside the store.
    pub offset: u32,
    /// Whether the store is packed into `<segment>.cfx`.
    pub is_compound: bool,
}

/// Descriptor of one segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    /// Segment name, e.g. `_0`.
    pub name: String,

    /// Number of documents, including deleted ones.
    pub doc_count: u32,

    /// Whether the segment files are packed into `<name>.cfs`.
    pub use_compound_file: bool,

    /// Shared document store, when stored fields live outside this segment.
    #[serde(default)]
    pub doc_store: Option<DocStoreInfo>,

    /// Whether any field was indexed with positions.
    pub has_positions: bool,

    /// Whether any field stored term vectors.
    pub has_vectors: bool,

    /// Generation of the current deletion file, if any.
    #[serde(default)]
    pub del_gen: Option<u64>,
}

impl SegmentInfo {
    pub fn new<S: Into<String>>(name: S, doc_count: u32) -> Self {
        SegmentInfo {
            name: name.into(),
            doc_count,
            use_compound_file: false,
            doc_store: None,
            has_positions: true,
            has_vectors: false,
            del_gen: None,
        }
    }

    /// Name of the current deletions file.
    pub fn deletions_file_name(&self) -> Option<String> {
        self.del_gen
            .map(|generation| format!("{}_{}.{}", self.name, to_base36(generation), DELETES_EXTENSION))
    }

    /// Segment the stored fields and vectors are read from.
    pub fn doc_store_segment(&self) -> &str {
        match &self.doc_store {
            Some(store) => &store.segment,
            None => &self.name,
        }
    }

    /// Files that belong to this segment alone (shared doc stores excluded).
    pub fn files(&self) -> Vec<String> {
        let mut files = Vec::new();
        if self.use_compound_file {
            files.push(segment_file_name(&self.name, COMPOUND_FILE_EXTENSION));
        } else {
            for ext in COMPOUND_EXTENSIONS {
                let is_store_ext = DOC_STORE_EXTENSIONS.contains(ext);
                if is_store_ext && self.doc_store.is_some() {
                    continue;
                }
                if (*ext == PROX_EXTENSION && !self.has_positions)
                    || ((*ext == VECTORS_INDEX_EXTENSION || *ext == VECTORS_DOCUMENTS_EXTENSION)
                        && !self.has_vectors)
                {
                    continue;
                }
                files.push(segment_file_name(&self.name, ext));
            }
        }
        if let Some(del) = self.deletions_file_name() {
            files.push(del);
        }
        files
    }
}

/// The set of live segments, persisted as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfos {
    /// Incremented on every commit.
    pub generation: u64,

    /// Used to name new segments.
    pub counter: u64,

    pub segments: Vec<SegmentInfo>,
}

impl SegmentInfos {
    /// Read the segments file from storage.
    pub fn read(storage: &dyn Storage) -> Result<Self> {
        let mut input = storage.open_input(SEGMENTS_FILE)?;
        let mut data = Vec::new();
        input.read_to_end(&mut data)?;
        input.close()?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Write the segments file, bumping the generation.
    pub fn commit(&mut self, storage: &dyn Storage) -> Result<()> {
        self.generation += 1;
        let data = serde_json::to_vec_pretty(self)?;
        let mut output = storage.create_output(SEGMENTS_FILE)?;
        output.write_all(&data)?;
        output.flush_and_sync()?;
        output.close()?;
        log::debug!(
            "committed generation {} with {} segments",
            self.generation,
            self.segments.len()
        );
        Ok(())
    }

    /// Reserve a fresh segment name.
    pub fn new_segment_name(&mut self) -> String {
        let name = format!("_{}", to_base36(self.counter));
        self.counter += 1;
        name
    }

    /// Total documents across segments, deleted ones included.
    pub fn total_doc_count(&self) -> u64 {
        self.segments.iter().map(|s| s.doc_count as u64).sum()
    }
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}
