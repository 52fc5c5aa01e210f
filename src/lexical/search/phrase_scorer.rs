//! Exact phrase matching over position cursors.
//!
//! Documents are found by a conjunction of the terms' cursors, driven by the
//! rarest term. Inside a matching document, positions are intersected one
//! window of [`CHUNK`] positions at a time: the first term stamps its slots
//! with the current generation, each following term advances the slots its
//! predecessors reached, and the last term counts complete chains. Stamps
//! from earlier windows or documents are told apart by generation instead of
//! clearing the arrays.

use std::sync::Arc;

use crate::error::{Result, SpindleError};
use crate::lexical::search::similarity::Similarity;

pub use crate::lexical::core::posting::{NO_MORE_DOCS, TermPositions};

/// Span of positions processed per window.
pub const CHUNK: usize = 4096;

/// Frequencies below this use a precomputed tf score.
pub const SCORE_CACHE_SIZE: usize = 32;

/// A term seeks when its doc freq exceeds this multiple of the rarest term's.
const SEEK_FACTOR: u64 = 5;

/// Sequential steps tried before falling back to a seek.
const MAX_SEQUENTIAL_STEPS: u32 = 50;

/// One phrase term: its cursor, doc freq and position within the phrase.
#[derive(Debug)]
pub struct PostingsAndFreq {
    pub postings: Box<dyn TermPositions>,
    pub doc_freq: u32,
    pub position: u32,
}

impl PostingsAndFreq {
    pub fn new(postings: Box<dyn TermPositions>, doc_freq: u32, position: u32) -> Self {
        PostingsAndFreq {
            postings,
            doc_freq,
            position,
        }
    }
}

/// Iteration state of an [`ExactPhraseScorer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScorerState {
    Unstarted,
    Iterating,
    Match,
    Exhausted,
}

#[derive(Debug)]
struct ChunkState {
    postings: Box<dyn TermPositions>,
    offset: i64,
    use_advance: bool,

    pos_upto: u32,
    pos_limit: u32,
    pos: i64,
    last_pos: i64,
}

impl ChunkState {
    fn next_position(&mut self) -> Result<()> {
        self.pos = self.offset + self.postings.next_position()? as i64;
        Ok(())
    }
}

/// Scorer for documents containing every term at consecutive phrase
/// positions.
#[derive(Debug)]
pub struct ExactPhraseScorer {
    chunk_states: Vec<ChunkState>,
    end_minus_1: usize,

    counts: Vec<u32>,
    gens: Vec<u32>,
    generation: u32,

    score_cache: [f32; SCORE_CACHE_SIZE],
    similarity: Arc<dyn Similarity>,
    value: f32,
    norms: Option<Arc<[u8]>>,

    no_docs: bool,
    state: ScorerState,
    doc: u32,
    freq: u32,
}

impl ExactPhraseScorer {
    /// Build a scorer over one cursor per phrase term.
    ///
    /// Terms are reordered rarest first. Every cursor except the rarest one
    /// is moved to its first document here; an empty posting list makes the
    /// scorer exhausted from the start.
    pub fn new(
        mut postings: Vec<PostingsAndFreq>,
        similarity: Arc<dyn Similarity>,
        value: f32,
        norms: Option<Arc<[u8]>>,
    ) -> Result<Self> {
        if postings.is_empty() {
            return Err(SpindleError::query("phrase has no terms"));
        }
        postings.sort_by_key(|p| (p.doc_freq, p.position));

        let rarest = postings[0].doc_freq as u64;
        let mut no_docs = postings.iter().any(|p| p.doc_freq == 0);
        let mut chunk_states = Vec::with_capacity(postings.len());
        for (i, p) in postings.into_iter().enumerate() {
            let mut cs = ChunkState {
                postings: p.postings,
                offset: -(p.position as i64),
                use_advance: p.doc_freq as u64 > SEEK_FACTOR * rarest,
                pos_upto: 0,
                pos_limit: 0,
                pos: 0,
                last_pos: -1,
            };
            if i > 0 && !no_docs && !cs.postings.next()? {
                no_docs = true;
            }
            chunk_states.push(cs);
        }

        let mut score_cache = [0.0f32; SCORE_CACHE_SIZE];
        for (i, slot) in score_cache.iter_mut().enumerate() {
            *slot = similarity.tf(i as f32) * value;
        }

        let end_minus_1 = chunk_states.len() - 1;
        Ok(ExactPhraseScorer {
            chunk_states,
            end_minus_1,
            counts: vec![0; CHUNK],
            gens: vec![0; CHUNK],
            generation: 0,
            score_cache,
            similarity,
            value,
            norms,
            no_docs,
            state: ScorerState::Unstarted,
            doc: 0,
            freq: 0,
        })
    }

    /// Current document. Meaningful while the state is `Match`.
    pub fn doc(&self) -> u32 {
        self.doc
    }

    /// Phrase occurrences in the current document.
    pub fn freq(&self) -> u32 {
        self.freq
    }

    pub fn state(&self) -> ScorerState {
        self.state
    }

    /// Move to the next matching document, or [`NO_MORE_DOCS`].
    pub fn next_doc(&mut self) -> Result<u32> {
        if self.start_iteration() {
            return Ok(NO_MORE_DOCS);
        }
        if !self.chunk_states[0].postings.next()? {
            return Ok(self.exhaust());
        }
        let mut doc = self.chunk_states[0].postings.doc();
        loop {
            match self.align_others(doc, false)? {
                Alignment::Exhausted => return Ok(self.exhaust()),
                Alignment::Matched => {
                    if let Some(doc) = self.check_phrase(doc)? {
                        return Ok(doc);
                    }
                    if !self.chunk_states[0].postings.next()? {
                        return Ok(self.exhaust());
                    }
                }
                Alignment::Overshot(target) => {
                    if !self.step_first_to(target)? {
                        return Ok(self.exhaust());
                    }
                }
            }
            doc = self.chunk_states[0].postings.doc();
        }
    }

    /// Move to the first matching document `>= target`. The scorer always
    /// moves past its current document.
    pub fn advance(&mut self, target: u32) -> Result<u32> {
        let target = match self.state {
            ScorerState::Unstarted => target,
            _ => target.max(self.doc.saturating_add(1)),
        };
        if self.start_iteration() {
            return Ok(NO_MORE_DOCS);
        }
        if !self.chunk_states[0].postings.skip_to(target)? {
            return Ok(self.exhaust());
        }
        let mut doc = self.chunk_states[0].postings.doc();
        loop {
            match self.align_others(doc, true)? {
                Alignment::Exhausted => return Ok(self.exhaust()),
                Alignment::Matched => {
                    if let Some(doc) = self.check_phrase(doc)? {
                        return Ok(doc);
                    }
                    if !self.chunk_states[0].postings.next()? {
                        return Ok(self.exhaust());
                    }
                }
                Alignment::Overshot(target) => {
                    if !self.chunk_states[0].postings.skip_to(target)? {
                        return Ok(self.exhaust());
                    }
                }
            }
            doc = self.chunk_states[0].postings.doc();
        }
    }

    /// Score of the current document: tf of the phrase freq times the query
    /// weight, times the decoded length norm when norms are present.
    pub fn score(&self) -> f32 {
        let freq = self.freq as usize;
        let raw = if freq < SCORE_CACHE_SIZE {
            self.score_cache[freq]
        } else {
            self.similarity.tf(freq as f32) * self.value
        };
        match &self.norms {
            Some(norms) => match norms.get(self.doc as usize) {
                Some(&norm) => raw * self.similarity.decode_norm(norm),
                None => raw,
            },
            None => raw,
        }
    }

    /// Close every cursor.
    pub fn close(&mut self) -> Result<()> {
        let mut result = Ok(());
        for cs in &mut self.chunk_states {
            if let Err(e) = cs.postings.close() {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Returns true when iteration is already over.
    fn start_iteration(&mut self) -> bool {
        if self.state == ScorerState::Exhausted {
            return true;
        }
        if self.no_docs {
            self.exhaust();
            return true;
        }
        self.state = ScorerState::Iterating;
        false
    }

    fn exhaust(&mut self) -> u32 {
        self.state = ScorerState::Exhausted;
        self.doc = NO_MORE_DOCS;
        self.freq = 0;
        NO_MORE_DOCS
    }

    fn check_phrase(&mut self, doc: u32) -> Result<Option<u32>> {
        self.doc = doc;
        self.freq = self.phrase_freq()?;
        if self.freq == 0 {
            return Ok(None);
        }
        self.state = ScorerState::Match;
        Ok(Some(doc))
    }

    /// Step the rarest cursor until it reaches `target`.
    fn step_first_to(&mut self, target: u32) -> Result<bool> {
        let first = &mut self.chunk_states[0].postings;
        while first.doc() < target {
            if !first.next()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Bring every non-rarest cursor to `doc`. With `seek_all`, every lagging
    /// cursor seeks; otherwise each follows its own strategy.
    fn align_others(&mut self, doc: u32, seek_all: bool) -> Result<Alignment> {
        for cs in &mut self.chunk_states[1..] {
            let postings = &mut cs.postings;
            let mut doc2 = postings.doc();
            if seek_all || cs.use_advance {
                if doc2 < doc {
                    if !postings.skip_to(doc)? {
                        return Ok(Alignment::Exhausted);
                    }
                    doc2 = postings.doc();
                }
            } else {
                let mut steps = 0;
                while doc2 < doc {
                    steps += 1;
                    if steps == MAX_SEQUENTIAL_STEPS {
                        if !postings.skip_to(doc)? {
                            return Ok(Alignment::Exhausted);
                        }
                        doc2 = postings.doc();
                        break;
                    }
                    if !postings.next()? {
                        return Ok(Alignment::Exhausted);
                    }
                    doc2 = postings.doc();
                }
            }
            if doc2 > doc {
                return Ok(Alignment::Overshot(doc2));
            }
        }
        Ok(Alignment::Matched)
    }

    fn phrase_freq(&mut self) -> Result<u32> {
        if self.end_minus_1 == 0 {
            return Ok(self.chunk_states[0].postings.freq());
        }

        for cs in &mut self.chunk_states {
            cs.pos_limit = cs.postings.freq();
            cs.next_position()?;
            cs.pos_upto = 1;
            cs.last_pos = i64::MIN;
        }

        let mut freq = 0;
        let mut chunk_start = 0i64;
        let mut chunk_end = CHUNK as i64;
        let mut end = false;

        while !end {
            self.generation = self.generation.wrapping_add(1);
            if self.generation == 0 {
                self.gens.fill(0);
                self.generation = 1;
            }
            let generation = self.generation;

            // first term
            {
                let cs = &mut self.chunk_states[0];
                while cs.pos < chunk_end {
                    if cs.pos > cs.last_pos {
                        cs.last_pos = cs.pos;
                        let index = cs.pos - chunk_start;
                        if index >= 0 {
                            self.counts[index as usize] = 1;
                            self.gens[index as usize] = generation;
                        }
                    }
                    if cs.pos_upto == cs.pos_limit {
                        end = true;
                        break;
                    }
                    cs.pos_upto += 1;
                    cs.next_position()?;
                }
            }

            // middle terms
            let mut any = true;
            for t in 1..self.end_minus_1 {
                let cs = &mut self.chunk_states[t];
                any = false;
                while cs.pos < chunk_end {
                    if cs.pos > cs.last_pos {
                        cs.last_pos = cs.pos;
                        let index = cs.pos - chunk_start;
                        if index >= 0 {
                            let slot = index as usize;
                            if self.gens[slot] == generation && self.counts[slot] == t as u32 {
                                self.counts[slot] += 1;
                                any = true;
                            }
                        }
                    }
                    if cs.pos_upto == cs.pos_limit {
                        end = true;
                        break;
                    }
                    cs.pos_upto += 1;
                    cs.next_position()?;
                }
                if !any {
                    break;
                }
            }

            if !any {
                chunk_start += CHUNK as i64;
                chunk_end += CHUNK as i64;
                continue;
            }

            // last term
            {
                let expected = self.end_minus_1 as u32;
                let cs = &mut self.chunk_states[self.end_minus_1];
                while cs.pos < chunk_end {
                    if cs.pos > cs.last_pos {
                        cs.last_pos = cs.pos;
                        let index = cs.pos - chunk_start;
                        if index >= 0 {
                            let slot = index as usize;
                            if self.gens[slot] == generation && self.counts[slot] == expected {
                                freq += 1;
                            }
                        }
                    }
                    if cs.pos_upto == cs.pos_limit {
                        end = true;
                        break;
                    }
                    cs.pos_upto += 1;
                    cs.next_position()?;
                }
            }

            chunk_start += CHUNK as i64;
            chunk_end += CHUNK as i64;
        }

        Ok(freq)
    }

    #[cfg(test)]
    fn set_generation(&mut self, generation: u32) {
        self.generation = generation;
    }

    #[cfg(test)]
    fn generation(&self) -> u32 {
        self.generation
    }
}

enum Alignment {
    Matched,
    Overshot(u32),
    Exhausted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexical::core::posting::MemoryTermPositions;
    use crate::lexical::search::similarity::DefaultSimilarity;

    fn term(postings: Vec<(u32, Vec<u32>)>, position: u32) -> PostingsAndFreq {
        let doc_freq = postings.len() as u32;
        PostingsAndFreq::new(Box::new(MemoryTermPositions::new(postings)), doc_freq, position)
    }

    fn scorer(terms: Vec<PostingsAndFreq>) -> ExactPhraseScorer {
        ExactPhraseScorer::new(terms, Arc::new(DefaultSimilarity), 1.0, None).unwrap()
    }

    fn all_matches(scorer: &mut ExactPhraseScorer) -> Vec<(u32, u32)> {
        let mut matches = Vec::new();
        loop {
            let doc = scorer.next_doc().unwrap();
            if doc == NO_MORE_DOCS {
                return matches;
            }
            matches.push((doc, scorer.freq()));
        }
    }

    #[test]
    fn test_two_term_phrase_freq() {
        let mut scorer = scorer(vec![
            term(vec![(0, vec![3, 10])], 0),
            term(vec![(0, vec![4, 11])], 1),
        ]);
        assert_eq!(scorer.state(), ScorerState::Unstarted);
        assert_eq!(scorer.next_doc().unwrap(), 0);
        assert_eq!(scorer.state(), ScorerState::Match);
        assert_eq!(scorer.freq(), 2);
        assert_eq!(scorer.next_doc().unwrap(), NO_MORE_DOCS);
        assert_eq!(scorer.state(), ScorerState::Exhausted);
        assert_eq!(scorer.next_doc().unwrap(), NO_MORE_DOCS);
    }

    #[test]
    fn test_match_across_chunk_boundary() {
        let mut scorer = scorer(vec![
            term(vec![(7, vec![4095, 9000])], 0),
            term(vec![(7, vec![4096, 9500])], 1),
        ]);
        assert_eq!(all_matches(&mut scorer), vec![(7, 1)]);
    }

    #[test]
    fn test_three_term_chain() {
        // "a b c": only the run starting at 20 is complete
        let mut scorer = scorer(vec![
            term(vec![(1, vec![0, 20, 40])], 0),
            term(vec![(1, vec![1, 21, 50]), (2, vec![1])], 1),
            term(vec![(1, vec![5, 22, 42]), (2, vec![2])], 2),
        ]);
        assert_eq!(all_matches(&mut scorer), vec![(1, 1)]);
    }

    #[test]
    fn test_repeated_term_in_phrase() {
        // "x x": positions 3,4,5 hold two overlapping occurrences
        let positions = vec![3, 4, 5, 9];
        let mut scorer = scorer(vec![
            term(vec![(0, positions.clone())], 0),
            term(vec![(0, positions)], 1),
        ]);
        assert_eq!(all_matches(&mut scorer), vec![(0, 2)]);
    }

    #[test]
    fn test_documents_without_phrase_are_skipped() {
        let mut scorer = scorer(vec![
            term(vec![(0, vec![1]), (2, vec![5]), (4, vec![0])], 0),
            term(vec![(0, vec![0]), (2, vec![6]), (3, vec![1]), (4, vec![1])], 1),
        ]);
        assert_eq!(all_matches(&mut scorer), vec![(2, 1), (4, 1)]);
    }

    #[test]
    fn test_empty_posting_list_short_circuits() {
        let b = MemoryTermPositions::new(vec![(0, vec![1])]);
        let stats = b.stats();
        let mut scorer = scorer(vec![
            term(vec![], 0),
            PostingsAndFreq::new(Box::new(b), 1, 1),
        ]);
        assert_eq!(scorer.next_doc().unwrap(), NO_MORE_DOCS);
        assert_eq!(scorer.state(), ScorerState::Exhausted);
        assert_eq!(scorer.advance(0).unwrap(), NO_MORE_DOCS);
        assert_eq!(stats.next_calls(), 0);
        assert_eq!(stats.skip_calls(), 0);
    }

    #[test]
    fn test_generation_wraparound_clears_stamps() {
        let mut scorer = scorer(vec![
            term(vec![(0, vec![2]), (1, vec![7]), (2, vec![0])], 0),
            term(vec![(0, vec![3]), (1, vec![3]), (2, vec![1])], 1),
        ]);
        assert_eq!(scorer.next_doc().unwrap(), 0);
        assert_eq!(scorer.generation(), 1);

        // slot 2 still carries a count of 1 stamped with generation 1
        scorer.set_generation(u32::MAX);
        assert_eq!(scorer.next_doc().unwrap(), 2);
        assert_eq!(scorer.freq(), 1);
        assert_eq!(scorer.generation(), 2);
    }

    #[test]
    fn test_frequent_term_seeks() {
        let rare = MemoryTermPositions::new(vec![(500, vec![0]), (1000, vec![0])]);
        let common = MemoryTermPositions::new((0..2000).map(|doc| (doc, vec![1])).collect());
        let common_stats = common.stats();
        let mut scorer = scorer(vec![
            PostingsAndFreq::new(Box::new(common), 2000, 1),
            PostingsAndFreq::new(Box::new(rare), 2, 0),
        ]);
        assert_eq!(all_matches(&mut scorer), vec![(500, 1), (1000, 1)]);
        // one next from the constructor, everything else seeks
        assert_eq!(common_stats.next_calls(), 1);
        assert_eq!(common_stats.skip_calls(), 2);
    }

    #[test]
    fn test_close_frequencies_step_then_fall_back() {
        let first: Vec<(u32, Vec<u32>)> = std::iter::once(0)
            .chain(200..220)
            .map(|doc| (doc, vec![0]))
            .collect();
        let second: Vec<(u32, Vec<u32>)> = (0..80).chain(200..210).map(|doc| (doc, vec![1])).collect();
        let second = MemoryTermPositions::new(second);
        let stats = second.stats();
        let mut scorer = scorer(vec![term(first, 0), PostingsAndFreq::new(Box::new(second), 90, 1)]);

        assert_eq!(scorer.next_doc().unwrap(), 0);
        assert_eq!(stats.skip_calls(), 0);
        assert_eq!(scorer.next_doc().unwrap(), 200);
        assert_eq!(stats.skip_calls(), 1);

        let matches = all_matches(&mut scorer);
        assert_eq!(matches.len(), 9);
        assert_eq!(matches.last(), Some(&(209, 1)));
    }

    #[test]
    fn test_advance() {
        let docs: Vec<(u32, Vec<u32>)> = (0..50).map(|doc| (doc * 2, vec![4])).collect();
        let next: Vec<(u32, Vec<u32>)> = (0..50).map(|doc| (doc * 2, vec![5])).collect();
        let mut scorer = scorer(vec![term(docs, 0), term(next, 1)]);

        assert_eq!(scorer.advance(31).unwrap(), 32);
        // never moves backwards
        assert_eq!(scorer.advance(10).unwrap(), 34);
        assert_eq!(scorer.next_doc().unwrap(), 36);
        assert_eq!(scorer.advance(99).unwrap(), NO_MORE_DOCS);
        assert_eq!(scorer.state(), ScorerState::Exhausted);
    }

    #[test]
    fn test_score_uses_cache_and_norms() {
        let sim = DefaultSimilarity;
        let terms = || {
            vec![
                term(vec![(0, vec![0, 2]), (1, vec![0])], 0),
                term(vec![(0, vec![1, 3]), (1, vec![1])], 1),
            ]
        };

        let mut plain = ExactPhraseScorer::new(terms(), Arc::new(sim), 2.0, None).unwrap();
        assert_eq!(plain.next_doc().unwrap(), 0);
        assert!((plain.score() - 2.0f32.sqrt() * 2.0).abs() < 1e-6);

        let norms: Arc<[u8]> = vec![sim.encode_norm(0.5), sim.encode_norm(1.0)].into();
        let mut normed = ExactPhraseScorer::new(terms(), Arc::new(sim), 2.0, Some(norms)).unwrap();
        assert_eq!(normed.next_doc().unwrap(), 0);
        assert!((normed.score() - 2.0f32.sqrt()).abs() < 1e-6);
        assert_eq!(normed.next_doc().unwrap(), 1);
        assert!((normed.score() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_large_freq_bypasses_cache() {
        let a: Vec<u32> = (0..40).map(|i| i * 2).collect();
        let b: Vec<u32> = (0..40).map(|i| i * 2 + 1).collect();
        let mut scorer = scorer(vec![term(vec![(0, a)], 0), term(vec![(0, b)], 1)]);
        assert_eq!(scorer.next_doc().unwrap(), 0);
        assert_eq!(scorer.freq(), 40);
        assert!((scorer.score() - 40f32.sqrt()).abs() < 1e-5);
    }

    #[test]
    fn test_single_term_phrase() {
        let mut scorer = scorer(vec![term(vec![(3, vec![1, 8]), (5, vec![2])], 0)]);
        assert_eq!(all_matches(&mut scorer), vec![(3, 2), (5, 1)]);
    }
}
