//! Output formatting for CLI commands.

use serde::{Deserialize, Serialize};

use crate::cli::args::{OutputFormat, SpindleArgs};
use crate::error::Result;

/// Result of indexing a file.
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexingResult {
    pub segment: String,
    pub documents_added: u32,
    pub compound: bool,
    pub duration_ms: u64,
}

/// One term with its doc freq.
#[derive(Debug, Serialize, Deserialize)]
pub struct TermEntry {
    pub field: String,
    pub text: String,
    pub doc_freq: u64,
}

/// Result of listing terms.
#[derive(Debug, Serialize, Deserialize)]
pub struct TermList {
    pub terms: Vec<TermEntry>,
}

/// One phrase hit, optionally with its stored fields.
#[derive(Debug, Serialize, Deserialize)]
pub struct PhraseHitOutput {
    pub doc: u32,
    pub freq: u32,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<(String, String)>>,
}

/// Result of a phrase query.
#[derive(Debug, Serialize, Deserialize)]
pub struct PhraseResults {
    pub phrase: String,
    pub total_hits: usize,
    pub hits: Vec<PhraseHitOutput>,
    pub duration_ms: u64,
}

/// Result of optimizing an index.
#[derive(Debug, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub segments_before: usize,
    pub segments_after: usize,
    pub documents: u32,
    pub duration_ms: u64,
}

/// Summary of one segment.
#[derive(Debug, Serialize, Deserialize)]
pub struct SegmentSummary {
    pub name: String,
    pub doc_count: u32,
    pub live_docs: u32,
    pub compound: bool,
    pub doc_store: Option<String>,
    pub fields: Vec<String>,
}

/// Summary of an index.
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexInfo {
    pub generation: u64,
    pub total_documents: u64,
    pub live_documents: u64,
    pub index_size_bytes: u64,
    pub segments: Vec<SegmentSummary>,
}

/// Output a command result in the requested format.
pub fn output_result<T: Serialize>(message: &str, result: &T, args: &SpindleArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Human => output_human(message, result, args),
        OutputFormat::Json => output_json(result, args),
    }
}

fn output_human<T: Serialize>(message: &str, result: &T, args: &SpindleArgs) -> Result<()> {
    if args.verbosity() > 0 {
        println!("{message}");
        println!();
    }
    let value = serde_json::to_value(result)?;
    for line in human_lines(&value) {
        println!("{line}");
    }
    Ok(())
}

/// Render a result as `key: value` lines. Arrays of objects become numbered
/// blocks.
fn human_lines(value: &serde_json::Value) -> Vec<String> {
    let mut lines = Vec::new();
    match value {
        serde_json::Value::Object(obj) => {
            for (key, val) in obj {
                match val {
                    serde_json::Value::Array(items)
                        if items.iter().all(|item| item.is_object()) && !items.is_empty() =>
                    {
                        lines.push(format!("{key}:"));
                        for (i, item) in items.iter().enumerate() {
                            lines.push(format!("  [{}]", i + 1));
                            for line in human_lines(item) {
                                lines.push(format!("    {line}"));
                            }
                        }
                    }
                    _ => lines.push(format!("{key}: {}", format_value(val, key))),
                }
            }
        }
        other => lines.push(format_value(other, "")),
    }
    lines
}

fn output_json<T: Serialize>(result: &T, args: &SpindleArgs) -> Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };
    println!("{json}");
    Ok(())
}

fn format_value(value: &serde_json::Value, key: &str) -> String {
    match value {
        serde_json::Value::Number(n) if key.ends_with("_bytes") => match n.as_u64() {
            Some(bytes) => format_bytes(bytes),
            None => n.to_string(),
        },
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(|v| format_value(v, "")).collect();
            format!("[{}]", items.join(", "))
        }
        serde_json::Value::Object(_) => value.to_string(),
        serde_json::Value::Null => "-".to_string(),
    }
}

/// Format bytes into human-readable format.
fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_human_lines() {
        let result = PhraseResults {
            phrase: "new york".to_string(),
            total_hits: 1,
            hits: vec![PhraseHitOutput {
                doc: 4,
                freq: 2,
                score: 1.5,
                fields: None,
            }],
            duration_ms: 3,
        };
        let lines = human_lines(&serde_json::to_value(&result).unwrap());
        // keys come out sorted
        assert_eq!(lines[0], "duration_ms: 3");
        assert_eq!(lines[1], "hits:");
        assert_eq!(lines[2], "  [1]");
        assert_eq!(lines[3], "    doc: 4");
        assert_eq!(lines[4], "    freq: 2");
        assert_eq!(lines[6], "phrase: new york");
        assert_eq!(lines.last().map(String::as_str), Some("total_hits: 1"));
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&serde_json::json!(2048), "index_size_bytes"), "2.0 KB");
        assert_eq!(format_value(&serde_json::json!(null), "doc_store"), "-");
        assert_eq!(format_value(&serde_json::json!(["a", "b"]), "fields"), "[a, b]");
    }
}
