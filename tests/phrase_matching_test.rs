#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use std::collections::BTreeMap;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use spindle::lexical::core::posting::MemoryTermPositions;
    use spindle::lexical::index::config::{ReaderConfig, WriterConfig};
    use spindle::lexical::index::multi::IndexReader;
    use spindle::lexical::index::segment::SegmentInfos;
    use spindle::lexical::index::writer::{SegmentWriter, WriterDocument};
    use spindle::lexical::search::phrase_query::PhraseQuery;
    use spindle::lexical::search::phrase_scorer::{
        ExactPhraseScorer, NO_MORE_DOCS, PostingsAndFreq, ScorerState,
    };
    use spindle::lexical::search::similarity::{DefaultSimilarity, Similarity};
    use spindle::storage::Storage;
    use spindle::storage::memory::MemoryStorage;

    const VOCABULARY: [&str; 4] = ["a", "b", "c", "d"];

    fn random_doc(rng: &mut StdRng, len: usize) -> Vec<&'static str> {
        (0..len)
            .map(|_| VOCABULARY[rng.random_range(0..VOCABULARY.len())])
            .collect()
    }

    /// Count start positions where every phrase term sits at its offset.
    fn brute_force(doc: &[&str], phrase: &[(&str, u32)]) -> u32 {
        let mut count = 0;
        for start in 0..doc.len() {
            let matched = phrase.iter().all(|&(term, offset)| {
                doc.get(start + offset as usize).is_some_and(|token| *token == term)
            });
            if matched {
                count += 1;
            }
        }
        count
    }

    fn build(rng: &mut StdRng) -> (Arc<MemoryStorage>, Vec<Vec<&'static str>>) {
        let memory = Arc::new(MemoryStorage::default());
        let mut infos = SegmentInfos::default();
        let mut all_docs = Vec::new();
        for segment in 0..3 {
            let name = infos.new_segment_name();
            let config = WriterConfig {
                use_compound_file: segment == 1,
                skip_interval: 4,
                ..WriterConfig::default()
            };
            let mut writer = SegmentWriter::new(memory.as_ref(), &name, config);
            for i in 0..40 {
                // a few documents span several position windows
                let len = if i % 17 == 3 {
                    9000
                } else {
                    rng.random_range(1..40)
                };
                let doc = random_doc(rng, len);
                writer
                    .add_document(WriterDocument::new().text("body", doc.join(" ")))
                    .unwrap();
                all_docs.push(doc);
            }
            infos.segments.push(writer.flush().unwrap());
        }
        infos.commit(memory.as_ref()).unwrap();
        (memory, all_docs)
    }

    #[test]
    fn test_random_phrases_match_brute_force() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let (memory, docs) = build(&mut rng);
        let storage: Arc<dyn Storage> = memory.clone();
        let reader = IndexReader::open(storage, &ReaderConfig::default()).unwrap();
        let similarity: Arc<dyn Similarity> = Arc::new(DefaultSimilarity);

        for _ in 0..150 {
            let terms = rng.random_range(1..=4);
            let mut phrase = Vec::with_capacity(terms);
            let mut offset = 0;
            for _ in 0..terms {
                phrase.push((VOCABULARY[rng.random_range(0..VOCABULARY.len())], offset));
                // mostly adjacent, sometimes a gap
                offset += if rng.random_range(0..5) == 0 { 2 } else { 1 };
            }

            let query = phrase
                .iter()
                .fold(PhraseQuery::new("body"), |query, &(term, at)| query.add_at(term, at));
            let mut hits: Vec<(u32, u32)> = query
                .search(&reader, Arc::clone(&similarity))
                .unwrap()
                .iter()
                .map(|hit| (hit.doc, hit.freq))
                .collect();
            hits.sort();

            let expected: Vec<(u32, u32)> = docs
                .iter()
                .enumerate()
                .map(|(doc, tokens)| (doc as u32, brute_force(tokens, &phrase)))
                .filter(|&(_, freq)| freq > 0)
                .collect();
            assert_eq!(hits, expected, "phrase {phrase:?}");
        }

        reader.close().unwrap();
        assert_eq!(memory.open_inputs(), 0);
    }

    #[test]
    fn test_advance_agrees_with_next_doc() {
        let mut rng = StdRng::seed_from_u64(42);
        let (memory, _) = build(&mut rng);
        let storage: Arc<dyn Storage> = memory.clone();
        let reader = IndexReader::open(storage, &ReaderConfig::default()).unwrap();
        let similarity: Arc<dyn Similarity> = Arc::new(DefaultSimilarity);
        let query = PhraseQuery::parse("body", "a b");

        for segment in reader.segment_readers() {
            let Some(mut scorer) = query.scorer(segment, Arc::clone(&similarity), 1.0).unwrap()
            else {
                continue;
            };
            let mut all = Vec::new();
            scorer.next_doc().unwrap();
            while scorer.state() == ScorerState::Match {
                all.push(scorer.doc());
                scorer.next_doc().unwrap();
            }
            scorer.close().unwrap();

            // every third target, jumping with advance
            let Some(mut jumping) = query.scorer(segment, Arc::clone(&similarity), 1.0).unwrap()
            else {
                continue;
            };
            for target in (0..segment.max_doc()).step_by(3) {
                if jumping.state() == ScorerState::Exhausted {
                    break;
                }
                if jumping.state() == ScorerState::Match && jumping.doc() >= target {
                    continue;
                }
                let doc = jumping.advance(target).unwrap();
                let expected = all.iter().copied().find(|&d| d >= target);
                match expected {
                    Some(expected) => assert_eq!(doc, expected),
                    None => assert_eq!(jumping.state(), ScorerState::Exhausted),
                }
            }
            jumping.close().unwrap();
        }
        reader.close().unwrap();
    }

    type Postings = BTreeMap<u32, Vec<u32>>;

    /// Random postings over `max_doc` docs: each doc is present with
    /// probability `density`, docs in `boost` with `boost_density`.
    fn random_postings(
        rng: &mut StdRng,
        max_doc: u32,
        density: f64,
        boost: &Postings,
        boost_density: f64,
    ) -> Postings {
        let mut postings = Postings::new();
        for doc in 0..max_doc {
            let present = if boost.contains_key(&doc) {
                rng.random_bool(boost_density)
            } else {
                rng.random_bool(density)
            };
            if present {
                let mut positions: Vec<u32> =
                    (0..rng.random_range(1..4)).map(|_| rng.random_range(0..6)).collect();
                positions.sort_unstable();
                positions.dedup();
                postings.insert(doc, positions);
            }
        }
        postings
    }

    /// Docs holding every term, with the number of starts where each term
    /// sits at its phrase offset.
    fn intersect(terms: &[(&Postings, u32)]) -> Vec<(u32, u32)> {
        let (first, first_offset) = terms[0];
        let mut matches = Vec::new();
        for (&doc, positions) in first {
            if !terms.iter().all(|(postings, _)| postings.contains_key(&doc)) {
                continue;
            }
            let freq = positions
                .iter()
                .filter(|&&p| p >= first_offset)
                .filter(|&&p| {
                    let start = p - first_offset;
                    terms
                        .iter()
                        .all(|(postings, offset)| postings[&doc].contains(&(start + offset)))
                })
                .count() as u32;
            if freq > 0 {
                matches.push((doc, freq));
            }
        }
        matches
    }

    #[test]
    fn test_skewed_doc_freqs_seek_and_match_intersection() {
        let mut rng = StdRng::seed_from_u64(0xdf5);
        for round in 0..20 {
            let max_doc = 20_000;
            let mut rare = random_postings(&mut rng, max_doc, 0.002, &Postings::new(), 0.0);
            if rare.is_empty() {
                rare.insert(max_doc / 2, vec![0]);
            }
            let common = random_postings(&mut rng, max_doc, 0.3, &rare, 0.8);
            let middle = random_postings(&mut rng, max_doc, 0.05, &rare, 0.8);
            assert!(common.len() > 5 * rare.len());
            assert!(middle.len() > 5 * rare.len());

            let mut phrase = vec![(&common, 1), (&rare, 0)];
            if round % 2 == 1 {
                phrase.push((&middle, 2));
            }
            let expected = intersect(&phrase);

            let mut terms = Vec::new();
            let mut stats = Vec::new();
            for &(postings, offset) in &phrase {
                let list: Vec<(u32, Vec<u32>)> =
                    postings.iter().map(|(doc, positions)| (*doc, positions.clone())).collect();
                let positions = MemoryTermPositions::new(list);
                stats.push(positions.stats());
                terms.push(PostingsAndFreq::new(
                    Box::new(positions),
                    postings.len() as u32,
                    offset,
                ));
            }
            let similarity: Arc<dyn Similarity> = Arc::new(DefaultSimilarity);
            let mut scorer = ExactPhraseScorer::new(terms, similarity, 1.0, None).unwrap();
            let mut matched = Vec::new();
            loop {
                let doc = scorer.next_doc().unwrap();
                if doc == NO_MORE_DOCS {
                    break;
                }
                matched.push((doc, scorer.freq()));
            }
            scorer.close().unwrap();

            assert_eq!(matched, expected, "round {round}");
            // the frequent terms reached their targets by seeking
            assert!(stats[0].skip_calls() > 0, "round {round}");
            if phrase.len() == 3 {
                assert!(stats[2].skip_calls() > 0, "round {round}");
            }
        }
    }
}
