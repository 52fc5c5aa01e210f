//! # Spindle
//!
//! Segment readers for an inverted index and exact phrase scoring on top of
//! them.
//!
//! ## Features
//!
//! - One shared, reference-counted core of open files per segment, however
//!   many logical readers attach to it
//! - Compound files and doc stores shared between segments
//! - Term dictionaries with a lazily loadable sampled index
//! - Exact phrase scoring that intersects positions in fixed-size windows
//! - A small write path and segment merger for building and compacting
//!   indexes

pub mod cli;
pub mod error;
pub mod lexical;
pub mod storage;
pub mod util;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
