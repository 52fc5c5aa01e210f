use std::sync::Arc;

use spindle::lexical::core::posting::TermPositions;
use spindle::lexical::index::config::{ReaderConfig, WriterConfig};
use spindle::lexical::index::multi::IndexReader;
use spindle::lexical::index::segment::SegmentInfos;
use spindle::lexical::index::writer::{SegmentWriter, WriterDocument};
use spindle::lexical::search::phrase_query::PhraseQuery;
use spindle::lexical::search::similarity::{DefaultSimilarity, Similarity};
use spindle::lexical::term::Term;
use spindle::storage::file::FileStorageConfig;
use spindle::storage::{Storage, StorageConfig, StorageFactory};

use tempfile::tempdir;

fn write_index(storage: &dyn Storage) {
    let mut infos = SegmentInfos::default();
    for compound in [false, true] {
        let name = infos.new_segment_name();
        let config = WriterConfig {
            use_compound_file: compound,
            ..WriterConfig::default()
        };
        let mut writer = SegmentWriter::new(storage, &name, config);
        for text in ["to be or not to be", "that is the question", "to be is to do"] {
            writer
                .add_document(WriterDocument::new().text_with_vectors("body", text))
                .unwrap();
        }
        infos.segments.push(writer.flush().unwrap());
    }
    infos.commit(storage).unwrap();
}

#[test]
fn test_buffered_and_mmap_inputs_agree() {
    let dir = tempdir().unwrap();
    let storage =
        StorageFactory::create(StorageConfig::File(FileStorageConfig::new(dir.path()))).unwrap();
    write_index(storage.as_ref());

    let similarity: Arc<dyn Similarity> = Arc::new(DefaultSimilarity);
    let mut results = Vec::new();
    for use_mmap in [false, true] {
        let mut config = FileStorageConfig::new(dir.path());
        config.use_mmap = use_mmap;
        let storage = StorageFactory::create(StorageConfig::File(config)).unwrap();
        let reader_config = ReaderConfig {
            read_buffer_size: 16,
            ..ReaderConfig::default()
        };
        let reader = IndexReader::open(storage, &reader_config).unwrap();

        assert_eq!(reader.max_doc(), 6);
        assert_eq!(reader.doc_freq(&Term::new("body", "be")).unwrap(), 4);
        let hits = PhraseQuery::parse("body", "to be")
            .search(&reader, Arc::clone(&similarity))
            .unwrap();
        let mut matched: Vec<(u32, u32)> = hits.iter().map(|h| (h.doc, h.freq)).collect();
        matched.sort();
        assert_eq!(matched, vec![(0, 2), (2, 1), (3, 2), (5, 1)]);

        let segment = &reader.segment_readers()[1];
        let mut to = segment.term_positions(&Term::new("body", "to")).unwrap().unwrap();
        assert!(to.next().unwrap());
        let positions: Vec<u32> = (0..to.freq()).map(|_| to.next_position().unwrap()).collect();
        assert_eq!(positions, vec![0, 4]);
        to.close().unwrap();

        results.push((matched, reader.document(4).unwrap().get("body").map(String::from)));
        reader.close().unwrap();
    }
    assert_eq!(results[0], results[1]);
    assert_eq!(results[0].1.as_deref(), Some("that is the question"));
}
