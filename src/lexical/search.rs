//! Phrase search execution and scoring.

pub mod phrase_query;
pub mod phrase_scorer;
pub mod similarity;
