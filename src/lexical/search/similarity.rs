//! Scoring components for phrase hits.

use crate::util::small_float;

/// Term frequency, inverse document frequency and length normalization.
///
/// Defines the interface for pluggable scoring of phrase matches.
pub trait Similarity: Send + Sync + std::fmt::Debug {
    /// Score contribution of a phrase occurring `freq` times in a document.
    fn tf(&self, freq: f32) -> f32;

    /// Weight of a term appearing in `doc_freq` of `num_docs` documents.
    fn idf(&self, doc_freq: u64, num_docs: u64) -> f32;

    /// Normalization factor for a field holding `num_terms` terms.
    fn length_norm(&self, num_terms: u32) -> f32;

    /// Encode a normalization factor into its one-byte form.
    fn encode_norm(&self, norm: f32) -> u8 {
        small_float::encode_norm(norm)
    }

    /// Decode a byte produced by [`encode_norm`](Similarity::encode_norm).
    fn decode_norm(&self, byte: u8) -> f32 {
        small_float::decode_norm(byte)
    }

    /// Get similarity name.
    fn name(&self) -> &str;
}

/// Classic tf-idf: `sqrt(freq)`, `ln(num_docs / (doc_freq + 1)) + 1` and
/// `1 / sqrt(num_terms)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSimilarity;

impl Similarity for DefaultSimilarity {
    fn tf(&self, freq: f32) -> f32 {
        freq.sqrt()
    }

    fn idf(&self, doc_freq: u64, num_docs: u64) -> f32 {
        ((num_docs as f64 / (doc_freq as f64 + 1.0)).ln() + 1.0) as f32
    }

    fn length_norm(&self, num_terms: u32) -> f32 {
        if num_terms == 0 {
            return 0.0;
        }
        1.0 / (num_terms as f32).sqrt()
    }

    fn name(&self) -> &str {
        "default"
    }
}
