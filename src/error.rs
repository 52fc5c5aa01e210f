//! Error types for the Spindle library.
//!
//! All fallible operations return [`Result`], whose error side is the
//! [`SpindleError`] enum. Two kinds matter most to callers of the read path:
//!
//! - [`SpindleError::Io`] for failures reading an underlying stream, including
//!   missing files (`ErrorKind::NotFound`) and truncated ones
//!   (`ErrorKind::UnexpectedEof`).
//! - [`SpindleError::CorruptIndex`] when two independent sources of truth in
//!   a segment disagree, e.g. the stored-field count and the segment's
//!   declared document count.
//!
//! Exhausting a cursor is never an error; iterators report it through their
//! return values.
//!
//! # Examples
//!
//! ```
//! use spindle::error::{Result, SpindleError};
//!
//! fn open_segment() -> Result<()> {
//!     Err(SpindleError::corrupt_index("doc counts differ for segment _0"))
//! }
//!
//! assert!(open_segment().unwrap_err().is_corrupt_index());
//! ```

use std::io;

use thiserror::Error;

/// The main error type for Spindle operations.
#[derive(Error, Debug)]
pub enum SpindleError {
    /// I/O errors (missing, truncated or unreadable files).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Structural disagreement inside a segment. Never repaired automatically.
    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    /// Index-related errors
    #[error("Index error: {0}")]
    Index(String),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Query-related errors
    #[error("Query error: {0}")]
    Query(String),

    /// Invalid operation, such as releasing a core that is already closed.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),

    /// Generic anyhow error
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with SpindleError.
pub type Result<T> = std::result::Result<T, SpindleError>;

impl SpindleError {
    /// Create a new index error.
    pub fn index<S: Into<String>>(msg: S) -> Self {
        SpindleError::Index(msg.into())
    }

    /// Create a new corrupt index error.
    pub fn corrupt_index<S: Into<String>>(msg: S) -> Self {
        SpindleError::CorruptIndex(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        SpindleError::Storage(msg.into())
    }

    /// Create a new query error.
    pub fn query<S: Into<String>>(msg: S) -> Self {
        SpindleError::Query(msg.into())
    }

    /// Create a new invalid operation error.
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        SpindleError::InvalidOperation(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        SpindleError::Other(msg.into())
    }

    /// Create an I/O error of kind `NotFound` for a named file.
    pub fn not_found<S: Into<String>>(name: S) -> Self {
        SpindleError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("file not found: {}", name.into()),
        ))
    }

    /// Whether this is a corrupt index error.
    pub fn is_corrupt_index(&self) -> bool {
        matches!(self, SpindleError::CorruptIndex(_))
    }

    /// Whether this is an I/O error of the given kind.
    pub fn is_io_kind(&self, kind: io::ErrorKind) -> bool {
        matches!(self, SpindleError::Io(e) if e.kind() == kind)
    }
}
