//! Command implementations for the Spindle CLI.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, bail};

use crate::cli::args::*;
use crate::cli::output::*;
use crate::lexical::index::config::{ReaderConfig, WriterConfig};
use crate::lexical::index::merge::optimize;
use crate::lexical::index::multi::IndexReader;
use crate::lexical::index::segment::{SEGMENTS_FILE, SegmentInfos};
use crate::lexical::index::writer::{SegmentWriter, WriterDocument};
use crate::lexical::search::phrase_query::PhraseQuery;
use crate::lexical::search::similarity::{DefaultSimilarity, Similarity};
use crate::lexical::term::Term;
use crate::storage::Storage;
use crate::storage::file::{FileStorage, FileStorageConfig};

/// Execute a CLI command.
pub fn execute_command(args: SpindleArgs) -> anyhow::Result<()> {
    match &args.command {
        Command::Index(index_args) => index_file(index_args, &args),
        Command::Terms(terms_args) => list_terms(terms_args, &args),
        Command::Phrase(phrase_args) => phrase_search(phrase_args, &args),
        Command::Optimize(optimize_args) => optimize_index(optimize_args, &args),
        Command::Info(info_args) => show_info(info_args, &args),
    }
}

fn open_storage(path: &Path) -> anyhow::Result<Arc<dyn Storage>> {
    let storage = FileStorage::new(path, FileStorageConfig::new(path))
        .with_context(|| format!("cannot open index directory {}", path.display()))?;
    Ok(Arc::new(storage))
}

fn open_existing(path: &Path) -> anyhow::Result<Arc<dyn Storage>> {
    if !path.join(SEGMENTS_FILE).exists() {
        bail!("no index found at {}", path.display());
    }
    open_storage(path)
}

fn reader_config(cli_args: &SpindleArgs) -> anyhow::Result<ReaderConfig> {
    match &cli_args.config {
        Some(path) => ReaderConfig::from_json_file(path)
            .with_context(|| format!("invalid reader config {}", path.display())),
        None => Ok(ReaderConfig::default()),
    }
}

/// Index every non-blank line of a file as one document of a new segment.
fn index_file(args: &IndexArgs, cli_args: &SpindleArgs) -> anyhow::Result<()> {
    let start_time = Instant::now();
    let storage = open_storage(&args.index_path)?;
    let mut infos = if storage.file_exists(SEGMENTS_FILE) {
        SegmentInfos::read(storage.as_ref())?
    } else {
        SegmentInfos::default()
    };

    let input = File::open(&args.input)
        .with_context(|| format!("cannot read {}", args.input.display()))?;
    let name = infos.new_segment_name();
    let config = WriterConfig {
        use_compound_file: args.compound,
        ..WriterConfig::default()
    };
    let mut writer = SegmentWriter::new(storage.as_ref(), &name, config);
    for (line_no, line) in BufReader::new(input).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let document = if args.vectors {
            WriterDocument::new().text_with_vectors(args.field.as_str(), line)
        } else {
            WriterDocument::new().text(args.field.as_str(), line)
        };
        writer.add_document(document.keyword("line", (line_no + 1).to_string()))?;
    }
    if writer.doc_count() == 0 {
        bail!("{} has no documents to index", args.input.display());
    }

    let info = writer.flush()?;
    let documents_added = info.doc_count;
    let compound = info.use_compound_file;
    infos.segments.push(info);
    infos.commit(storage.as_ref())?;

    output_result(
        "Segment written",
        &IndexingResult {
            segment: name,
            documents_added,
            compound,
            duration_ms: start_time.elapsed().as_millis() as u64,
        },
        cli_args,
    )?;
    Ok(())
}

/// List terms in dictionary order with their doc freqs summed over segments.
fn list_terms(args: &TermsArgs, cli_args: &SpindleArgs) -> anyhow::Result<()> {
    let storage = open_existing(&args.index_path)?;
    let reader = IndexReader::open(storage, &reader_config(cli_args)?)?;

    let mut terms = match (&args.field, &args.from) {
        (Some(field), Some(from)) => reader.terms_from(&Term::new(field.as_str(), from.as_str()))?,
        (Some(field), None) => reader.terms_from(&Term::new(field.as_str(), ""))?,
        _ => reader.terms()?,
    };
    let limit = args.limit.unwrap_or(usize::MAX);
    let mut entries = Vec::new();
    while entries.len() < limit && terms.next()? {
        let Some(term) = terms.term() else {
            break;
        };
        if let Some(field) = &args.field {
            if term.field() != field {
                break;
            }
        }
        entries.push(TermEntry {
            field: term.field().to_string(),
            text: term.text().to_string(),
            doc_freq: terms.doc_freq(),
        });
    }
    terms.close()?;
    reader.close()?;

    output_result("Terms", &TermList { terms: entries }, cli_args)?;
    Ok(())
}

/// Run an exact phrase query and print the best hits.
fn phrase_search(args: &PhraseArgs, cli_args: &SpindleArgs) -> anyhow::Result<()> {
    let start_time = Instant::now();
    let storage = open_existing(&args.index_path)?;
    let reader = IndexReader::open(storage, &reader_config(cli_args)?)?;

    let query = args
        .phrase
        .iter()
        .flat_map(|term| term.split_whitespace())
        .fold(PhraseQuery::new(args.field.as_str()), |query, term| query.add(term));
    let similarity: Arc<dyn Similarity> = Arc::new(DefaultSimilarity);
    let all_hits = query.search(&reader, similarity)?;
    let total_hits = all_hits.len();

    let mut hits = Vec::with_capacity(args.limit.min(total_hits));
    for hit in all_hits.into_iter().take(args.limit) {
        let fields = if args.show_documents {
            Some(reader.document(hit.doc)?.fields().to_vec())
        } else {
            None
        };
        hits.push(PhraseHitOutput {
            doc: hit.doc,
            freq: hit.freq,
            score: hit.score,
            fields,
        });
    }
    reader.close()?;

    output_result(
        "Phrase results",
        &PhraseResults {
            phrase: args.phrase.join(" "),
            total_hits,
            hits,
            duration_ms: start_time.elapsed().as_millis() as u64,
        },
        cli_args,
    )?;
    Ok(())
}

/// Merge every segment into one.
fn optimize_index(args: &OptimizeArgs, cli_args: &SpindleArgs) -> anyhow::Result<()> {
    let start_time = Instant::now();
    let storage = open_existing(&args.index_path)?;
    let segments_before = SegmentInfos::read(storage.as_ref())?.segments.len();

    let writer_config = WriterConfig {
        use_compound_file: args.compound,
        ..WriterConfig::default()
    };
    let infos = optimize(storage, &reader_config(cli_args)?, &writer_config)
        .context("optimize failed")?;

    output_result(
        "Index optimized",
        &OptimizationResult {
            segments_before,
            segments_after: infos.segments.len(),
            documents: infos.total_doc_count() as u32,
            duration_ms: start_time.elapsed().as_millis() as u64,
        },
        cli_args,
    )?;
    Ok(())
}

/// Show the commit and its segments.
fn show_info(args: &InfoArgs, cli_args: &SpindleArgs) -> anyhow::Result<()> {
    let storage = open_existing(&args.index_path)?;
    let infos = SegmentInfos::read(storage.as_ref())?;
    let reader = IndexReader::from_segments(
        Arc::clone(&storage),
        &infos.segments,
        &reader_config(cli_args)?,
    )?;

    let mut segments = Vec::with_capacity(infos.segments.len());
    for segment in reader.segment_readers() {
        let info = segment.info();
        segments.push(SegmentSummary {
            name: info.name.clone(),
            doc_count: info.doc_count,
            live_docs: segment.num_docs(),
            compound: info.use_compound_file,
            doc_store: info.doc_store.as_ref().map(|store| store.segment.clone()),
            fields: segment.field_infos().iter().map(|f| f.name.clone()).collect(),
        });
    }
    let live_documents = reader.num_docs() as u64;
    reader.close()?;

    let mut index_size_bytes = 0;
    for file in storage.list_files()? {
        index_size_bytes += storage.file_size(&file)?;
    }

    output_result(
        "Index information",
        &IndexInfo {
            generation: infos.generation,
            total_documents: infos.total_doc_count(),
            live_documents,
            index_size_bytes,
            segments,
        },
        cli_args,
    )?;
    Ok(())
}
