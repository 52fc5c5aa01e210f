//! Exact phrase queries over an [`IndexReader`].

use std::cmp::Ordering;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpindleError};
use crate::lexical::core::posting::TermPositions;
use crate::lexical::index::multi::IndexReader;
use crate::lexical::index::reader::SegmentReader;
use crate::lexical::search::phrase_scorer::{ExactPhraseScorer, PostingsAndFreq, ScorerState};
use crate::lexical::search::similarity::Similarity;
use crate::lexical::term::Term;

/// A document matching a phrase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhraseHit {
    /// Document number in the composite reader.
    pub doc: u32,
    /// Number of phrase occurrences.
    pub freq: u32,
    pub score: f32,
}

/// Terms that must occur at fixed relative positions in one field.
#[derive(Debug, Clone, PartialEq)]
pub struct PhraseQuery {
    field: String,
    terms: Vec<(String, u32)>,
    boost: f32,
}

impl PhraseQuery {
    pub fn new<F: Into<String>>(field: F) -> Self {
        PhraseQuery {
            field: field.into(),
            terms: Vec::new(),
            boost: 1.0,
        }
    }

    /// Split `phrase` on whitespace into consecutive terms.
    pub fn parse<F: Into<String>>(field: F, phrase: &str) -> Self {
        phrase
            .split_whitespace()
            .fold(Self::new(field), |query, token| query.add(token))
    }

    /// Append a term one position after the last one.
    pub fn add<T: Into<String>>(self, text: T) -> Self {
        let position = self.terms.last().map(|(_, p)| p + 1).unwrap_or(0);
        self.add_at(text, position)
    }

    /// Add a term at an explicit relative position.
    pub fn add_at<T: Into<String>>(mut self, text: T, position: u32) -> Self {
        self.terms.push((text.into(), position));
        self
    }

    pub fn with_boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn terms(&self) -> &[(String, u32)] {
        &self.terms
    }

    /// Query weight: the summed idf of the terms over the live documents of
    /// the index, times the boost.
    pub fn weight(&self, reader: &IndexReader, similarity: &dyn Similarity) -> Result<f32> {
        let mut idf = 0.0;
        for (text, _) in &self.terms {
            let doc_freq = reader.doc_freq(&Term::new(self.field.as_str(), text.as_str()))?;
            idf += similarity.idf(doc_freq, reader.num_docs() as u64);
        }
        Ok(idf * self.boost)
    }

    /// Scorer over one segment. `None` when the segment cannot match: the
    /// field is unknown there or one of the terms is absent.
    pub fn scorer(
        &self,
        segment: &SegmentReader,
        similarity: Arc<dyn Similarity>,
        weight: f32,
    ) -> Result<Option<ExactPhraseScorer>> {
        if self.terms.is_empty() {
            return Err(SpindleError::query("phrase has no terms"));
        }
        let field_infos = segment.field_infos();
        let Some(field) = field_infos.by_name(&self.field) else {
            return Ok(None);
        };
        if !field.has_positions {
            return Err(SpindleError::query(format!(
                "field {} was indexed without positions",
                self.field
            )));
        }

        // phrase positions are relative to the earliest term
        let base = self.terms.iter().map(|(_, position)| *position).min().unwrap_or(0);
        let mut postings = Vec::with_capacity(self.terms.len());
        for (text, position) in &self.terms {
            let term = Term::new(self.field.as_str(), text.as_str());
            match segment.term_info(&term)? {
                Some(info) => {
                    let cursor = segment.positions_for(&term, info)?;
                    let relative = position - base;
                    postings.push(PostingsAndFreq::new(Box::new(cursor), info.doc_freq, relative));
                }
                None => {
                    for mut opened in postings {
                        opened.postings.close()?;
                    }
                    return Ok(None);
                }
            }
        }

        let norms = segment.norms(&self.field)?;
        ExactPhraseScorer::new(postings, similarity, weight, norms).map(Some)
    }

    /// All matching documents, best score first and ties by doc number.
    pub fn search(
        &self,
        reader: &IndexReader,
        similarity: Arc<dyn Similarity>,
    ) -> Result<Vec<PhraseHit>> {
        let weight = self.weight(reader, similarity.as_ref())?;
        let leaves: Vec<(u32, &SegmentReader)> = reader.leaves().collect();
        let per_segment: Vec<Result<Vec<PhraseHit>>> = leaves
            .par_iter()
            .map(|&(base, segment)| {
                self.search_segment(segment, base, Arc::clone(&similarity), weight)
            })
            .collect();

        let mut hits = Vec::new();
        for result in per_segment {
            hits.extend(result?);
        }
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.doc.cmp(&b.doc))
        });
        log::debug!("phrase {:?} in {}: {} hits", self.terms, self.field, hits.len());
        Ok(hits)
    }

    /// The best `n` hits.
    pub fn top(
        &self,
        reader: &IndexReader,
        similarity: Arc<dyn Similarity>,
        n: usize,
    ) -> Result<Vec<PhraseHit>> {
        let mut hits = self.search(reader, similarity)?;
        hits.truncate(n);
        Ok(hits)
    }

    fn search_segment(
        &self,
        segment: &SegmentReader,
        base: u32,
        similarity: Arc<dyn Similarity>,
        weight: f32,
    ) -> Result<Vec<PhraseHit>> {
        let Some(mut scorer) = self.scorer(segment, similarity, weight)? else {
            return Ok(Vec::new());
        };
        let mut hits = Vec::new();
        scorer.next_doc()?;
        while scorer.state() == ScorerState::Match {
            hits.push(PhraseHit {
                doc: base + scorer.doc(),
                freq: scorer.freq(),
                score: scorer.score(),
            });
            scorer.next_doc()?;
        }
        scorer.close()?;
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexical::index::config::{ReaderConfig, WriterConfig};
    use crate::lexical::index::segment::SegmentInfos;
    use crate::lexical::index::writer::{SegmentWriter, WriterDocument};
    use crate::lexical::search::similarity::DefaultSimilarity;
    use crate::storage::Storage;
    use crate::storage::memory::MemoryStorage;

    fn index(segments: &[&[&str]]) -> (Arc<MemoryStorage>, IndexReader) {
        let memory = Arc::new(MemoryStorage::default());
        let mut infos = SegmentInfos::default();
        for docs in segments {
            let name = infos.new_segment_name();
            let mut writer = SegmentWriter::new(memory.as_ref(), &name, WriterConfig::default());
            for text in docs.iter() {
                writer
                    .add_document(WriterDocument::new().text("body", *text).keyword("tag", "x"))
                    .unwrap();
            }
            infos.segments.push(writer.flush().unwrap());
        }
        infos.commit(memory.as_ref()).unwrap();
        let storage: Arc<dyn Storage> = memory.clone();
        let reader = IndexReader::open(storage, &ReaderConfig::default()).unwrap();
        (memory, reader)
    }

    #[test]
    fn test_parse() {
        let query = PhraseQuery::parse("body", "  new  york city ");
        assert_eq!(
            query.terms(),
            &[("new".to_string(), 0), ("york".to_string(), 1), ("city".to_string(), 2)]
        );
        let gapped = PhraseQuery::new("body").add("a").add_at("c", 2);
        assert_eq!(gapped.terms()[1].1, 2);
    }

    #[test]
    fn test_search_across_segments() {
        let (memory, reader) = index(&[
            &["new york city", "york new"],
            &["a new york new york", "new jersey"],
        ]);
        let similarity: Arc<dyn Similarity> = Arc::new(DefaultSimilarity);
        let hits = PhraseQuery::parse("body", "new york").search(&reader, similarity).unwrap();

        let mut docs: Vec<(u32, u32)> = hits.iter().map(|h| (h.doc, h.freq)).collect();
        docs.sort();
        assert_eq!(docs, vec![(0, 1), (2, 2)]);
        assert!(hits.iter().all(|h| h.score > 0.0));

        reader.close().unwrap();
        assert_eq!(memory.open_inputs(), 0);
    }

    #[test]
    fn test_gap_and_missing_terms() {
        let (_memory, reader) = index(&[&["a b c", "a x c", "a c"]]);
        let similarity: Arc<dyn Similarity> = Arc::new(DefaultSimilarity);

        let gapped = PhraseQuery::new("body").add("a").add_at("c", 2);
        let hits = gapped.search(&reader, Arc::clone(&similarity)).unwrap();
        let docs: Vec<u32> = hits.iter().map(|h| h.doc).collect();
        assert_eq!(docs.len(), 2);
        assert!(docs.contains(&0) && docs.contains(&1));

        let missing = PhraseQuery::parse("body", "a zzz");
        assert!(missing.search(&reader, Arc::clone(&similarity)).unwrap().is_empty());
        let other_field = PhraseQuery::parse("title", "a b");
        assert!(other_field.search(&reader, Arc::clone(&similarity)).unwrap().is_empty());
        assert!(PhraseQuery::new("body").search(&reader, similarity).is_err());
    }

    #[test]
    fn test_shifted_phrase_positions_match_like_zero_based() {
        let (_memory, reader) = index(&[&["x y z", "q x y", "y x"]]);
        let similarity: Arc<dyn Similarity> = Arc::new(DefaultSimilarity);

        let zero_based = PhraseQuery::parse("body", "x y")
            .search(&reader, Arc::clone(&similarity))
            .unwrap();
        let shifted = PhraseQuery::new("body")
            .add_at("x", 3)
            .add_at("y", 4)
            .search(&reader, Arc::clone(&similarity))
            .unwrap();
        assert_eq!(zero_based.len(), 2);
        assert_eq!(shifted, zero_based);

        // insertion order does not matter either
        let reversed = PhraseQuery::new("body")
            .add_at("y", 8)
            .add_at("x", 7)
            .search(&reader, similarity)
            .unwrap();
        assert_eq!(reversed, zero_based);
    }

    #[test]
    fn test_top_orders_by_score() {
        let (_memory, reader) = index(&[&["x y z z", "x y x y x y", "x y q q q q q q q q"]]);
        let similarity: Arc<dyn Similarity> = Arc::new(DefaultSimilarity);
        let top = PhraseQuery::parse("body", "x y").top(&reader, similarity, 2).unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].doc, 1);
        assert!(top[0].score >= top[1].score);
    }
}
