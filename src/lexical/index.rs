//! Segment management: descriptors, shared cores, readers and the minimal
//! write path used to produce and merge segments.

pub mod config;
pub mod core_readers;
pub mod merge;
pub mod multi;
pub mod reader;
pub mod segment;
pub mod writer;
