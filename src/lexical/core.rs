//! Readers for the individual files of a segment.
//!
//! - Field metadata (`.fnm`)
//! - Term dictionary and its sampled index (`.tis`, `.tii`)
//! - Frequency and position postings (`.frq`, `.prx`)
//! - Stored fields and term vectors (`.fdx`/`.fdt`, `.tvx`/`.tvd`)
//! - Length norms (`.nrm`)
//! - Deletion bitmaps (`.del`)

pub mod deletes;
pub mod field_infos;
pub mod norms;
pub mod posting;
pub mod stored;
pub mod terms;
