//! Chunk Loader: reads a directory of JSON chunk files into an ordered
//! sequence of [`Chunk`] records.
//!
//! Each `*.json` file holds either a single chunk object or an array of
//! chunk objects with `id`, `content`, and optional `metadata` fields.
//! Files are enumerated in lexicographic filename order so repeated loads
//! of the same directory yield the same sequence.
//!
//! Policy: a record missing `id` or `content` is skipped and reported; a
//! file that is not valid JSON is skipped and reported as one issue.
//! Neither aborts the other files. No deduplication happens here — that is
//! the store's job.

use serde_json::Value;
use std::path::Path;

use crate::error::{Error, Result};
use crate::models::{Chunk, LoadIssue, LoadReport};

/// Load all chunk records from `dir`. Pure read; no side effects.
pub fn load_chunks(dir: &Path) -> Result<LoadReport> {
    if !dir.is_dir() {
        return Err(Error::Input {
            path: dir.to_path_buf(),
            message: "chunk directory does not exist".into(),
        });
    }

    let mut files: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    let mut report = LoadReport::default();

    for file in files {
        let content = match std::fs::read_to_string(&file) {
            Ok(c) => c,
            Err(e) => {
                report.skipped.push(LoadIssue {
                    file,
                    record: None,
                    message: format!("unreadable file: {}", e),
                });
                continue;
            }
        };

        let parsed: Value = match serde_json::from_str(&content) {
            Ok(v) => v,
            Err(e) => {
                report.skipped.push(LoadIssue {
                    file,
                    record: None,
                    message: format!("invalid JSON: {}", e),
                });
                continue;
            }
        };

        report.files_read += 1;

        match parsed {
            Value::Array(records) => {
                for (index, record) in records.into_iter().enumerate() {
                    match parse_record(record) {
                        Ok(chunk) => report.chunks.push(chunk),
                        Err(message) => report.skipped.push(LoadIssue {
                            file: file.clone(),
                            record: Some(index),
                            message,
                        }),
                    }
                }
            }
            record @ Value::Object(_) => match parse_record(record) {
                Ok(chunk) => report.chunks.push(chunk),
                Err(message) => report.skipped.push(LoadIssue {
                    file,
                    record: Some(0),
                    message,
                }),
            },
            _ => report.skipped.push(LoadIssue {
                file,
                record: None,
                message: "expected a JSON object or array of objects".into(),
            }),
        }
    }

    Ok(report)
}

/// Validate one JSON record into a [`Chunk`]. Requires a non-empty string
/// `id` and a string `content`; `metadata` defaults to an empty object.
fn parse_record(value: Value) -> std::result::Result<Chunk, String> {
    let Value::Object(mut obj) = value else {
        return Err("record is not a JSON object".into());
    };

    let id = match obj.remove("id") {
        Some(Value::String(s)) if !s.is_empty() => s,
        Some(Value::String(_)) => return Err("field 'id' is empty".into()),
        Some(_) => return Err("field 'id' is not a string".into()),
        None => return Err("missing required field 'id'".into()),
    };

    let content = match obj.remove("content") {
        Some(Value::String(s)) => s,
        Some(_) => return Err("field 'content' is not a string".into()),
        None => return Err("missing required field 'content'".into()),
    };

    let metadata = match obj.remove("metadata") {
        Some(Value::Object(map)) => map,
        Some(Value::Null) | None => serde_json::Map::new(),
        Some(_) => return Err("field 'metadata' is not an object".into()),
    };

    Ok(Chunk {
        id,
        content,
        metadata,
    })
}
