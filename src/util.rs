//! Shared utility modules used across Spindle components.

pub mod small_float;
pub mod varint;
