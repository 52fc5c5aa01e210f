//! Criterion benchmarks for phrase scoring and segment access.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use spindle::lexical::core::posting::MemoryTermPositions;
use spindle::lexical::index::config::{ReaderConfig, WriterConfig};
use spindle::lexical::index::multi::IndexReader;
use spindle::lexical::index::segment::SegmentInfos;
use spindle::lexical::index::writer::{SegmentWriter, WriterDocument};
use spindle::lexical::search::phrase_query::PhraseQuery;
use spindle::lexical::search::phrase_scorer::{ExactPhraseScorer, PostingsAndFreq, ScorerState};
use spindle::lexical::search::similarity::{DefaultSimilarity, Similarity};
use spindle::storage::Storage;
use spindle::storage::memory::MemoryStorage;

const WORDS: [&str; 12] = [
    "search", "engine", "segment", "reader", "phrase", "term", "index", "query", "score",
    "merge", "store", "field",
];

/// Deterministic pseudo-random documents.
fn generate_documents(count: usize, len: usize) -> Vec<String> {
    let mut state = 0x2545_f491_u64;
    (0..count)
        .map(|_| {
            (0..len)
                .map(|_| {
                    state ^= state << 13;
                    state ^= state >> 7;
                    state ^= state << 17;
                    WORDS[(state % WORDS.len() as u64) as usize]
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

fn build_index(docs: &[String]) -> (Arc<MemoryStorage>, IndexReader) {
    let memory = Arc::new(MemoryStorage::default());
    let mut infos = SegmentInfos::default();
    for chunk in docs.chunks(1000) {
        let name = infos.new_segment_name();
        let mut writer = SegmentWriter::new(memory.as_ref(), &name, WriterConfig::default());
        for doc in chunk {
            writer.add_document(WriterDocument::new().text("body", doc.as_str())).unwrap();
        }
        infos.segments.push(writer.flush().unwrap());
    }
    infos.commit(memory.as_ref()).unwrap();
    let storage: Arc<dyn Storage> = memory.clone();
    let reader = IndexReader::open(storage, &ReaderConfig::default()).unwrap();
    (memory, reader)
}

fn bench_phrase_query(c: &mut Criterion) {
    let docs = generate_documents(4000, 50);
    let (_memory, reader) = build_index(&docs);
    let similarity: Arc<dyn Similarity> = Arc::new(DefaultSimilarity);

    let mut group = c.benchmark_group("phrase_query");
    group.throughput(Throughput::Elements(docs.len() as u64));
    for phrase in ["segment reader", "search engine index", "phrase term query score"] {
        let query = PhraseQuery::parse("body", phrase);
        group.bench_function(phrase, |b| {
            b.iter(|| {
                let hits = query.search(&reader, Arc::clone(&similarity)).unwrap();
                black_box(hits.len())
            })
        });
    }
    group.finish();
    reader.close().unwrap();
}

fn bench_scorer_windows(c: &mut Criterion) {
    // one long document whose positions span many windows
    let first: Vec<u32> = (0..200_000).step_by(3).collect();
    let second: Vec<u32> = first.iter().map(|p| p + 1).collect();
    let similarity: Arc<dyn Similarity> = Arc::new(DefaultSimilarity);

    c.bench_function("exact_phrase_long_document", |b| {
        b.iter(|| {
            let postings = vec![
                PostingsAndFreq::new(
                    Box::new(MemoryTermPositions::new(vec![(0, first.clone())])),
                    1,
                    0,
                ),
                PostingsAndFreq::new(
                    Box::new(MemoryTermPositions::new(vec![(0, second.clone())])),
                    1,
                    1,
                ),
            ];
            let mut scorer =
                ExactPhraseScorer::new(postings, Arc::clone(&similarity), 1.0, None).unwrap();
            scorer.next_doc().unwrap();
            assert_eq!(scorer.state(), ScorerState::Match);
            black_box(scorer.freq())
        })
    });
}

fn bench_term_enumeration(c: &mut Criterion) {
    let docs = generate_documents(4000, 50);
    let (_memory, reader) = build_index(&docs);

    c.bench_function("merged_term_enum", |b| {
        b.iter(|| {
            let mut terms = reader.terms().unwrap();
            let mut total = 0u64;
            while terms.next().unwrap() {
                total += terms.doc_freq();
            }
            terms.close().unwrap();
            black_box(total)
        })
    });
    reader.close().unwrap();
}

criterion_group!(
    benches,
    bench_phrase_query,
    bench_scorer_windows,
    bench_term_enumeration
);
criterion_main!(benches);
