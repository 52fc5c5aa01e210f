//! Lexical search over inverted-index segments.
//!
//! This module provides the on-disk segment readers, the shared per-segment
//! core that readers attach to, and exact phrase scoring over term
//! positions.

// Per-file readers
pub mod core;

// Segments, readers and the fixture write path
pub mod index;

// Phrase scoring
pub mod search;

pub mod term;
