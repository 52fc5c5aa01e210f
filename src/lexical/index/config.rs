//! Reader and writer configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How the term dictionary seeks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TermsIndexPolicy {
    /// Load the sampled terms index into memory, keeping every `divisor`-th
    /// entry. Larger divisors use less memory and scan further per seek.
    InMemory { divisor: usize },

    /// Do not load the terms index; seeks scan the dictionary from the start.
    NoIndex,
}

impl Default for TermsIndexPolicy {
    fn default() -> Self {
        TermsIndexPolicy::InMemory { divisor: 1 }
    }
}

/// Configuration for opening segment readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Buffer size handed to the storage for every stream the core opens.
    pub read_buffer_size: usize,

    /// Terms index policy.
    pub terms_index: TermsIndexPolicy,

    /// Open stored fields and term vectors when the reader opens.
    pub open_doc_stores: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        ReaderConfig {
            read_buffer_size: 1024,
            terms_index: TermsIndexPolicy::default(),
            open_doc_stores: true,
        }
    }
}

impl ReaderConfig {
    /// Load a configuration from a JSON file. Missing keys take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }
}

/// Configuration for the segment writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Every `index_interval`-th term is written to the terms index.
    pub index_interval: u32,

    /// A skip entry is written every `skip_interval` documents of a posting list.
    pub skip_interval: u32,

    /// Pack the segment files into a compound file.
    pub use_compound_file: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            index_interval: 128,
            skip_interval: 16,
            use_compound_file: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReaderConfig::default();
        assert_eq!(config.read_buffer_size, 1024);
        assert_eq!(config.terms_index, TermsIndexPolicy::InMemory { divisor: 1 });
        assert!(config.open_doc_stores);

        let writer = WriterConfig::default();
        assert_eq!(writer.index_interval, 128);
        assert_eq!(writer.skip_interval, 16);
    }

    #[test]
    fn test_partial_json() {
        let config: ReaderConfig =
            serde_json::from_str(r#"{"terms_index": {"kind": "no_index"}}"#).unwrap();
        assert_eq!(config.terms_index, TermsIndexPolicy::NoIndex);
        assert_eq!(config.read_buffer_size, 1024);

        let config: ReaderConfig =
            serde_json::from_str(r#"{"terms_index": {"kind": "in_memory", "divisor": 4}}"#)
                .unwrap();
        assert_eq!(config.terms_index, TermsIndexPolicy::InMemory { divisor: 4 });
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("reader.json");
        std::fs::write(&path, r#"{"read_buffer_size": 4096, "open_doc_stores": false}"#).unwrap();

        let config = ReaderConfig::from_json_file(&path).unwrap();
        assert_eq!(config.read_buffer_size, 4096);
        assert!(!config.open_doc_stores);
    }
}
