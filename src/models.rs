//! Core data types that flow through the load → embed → store pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// One unit of searchable text: the unit of embedding, storage, and
/// deduplication. `id` is the primary key in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    /// Freeform metadata, preserved verbatim alongside the vector.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// A ranked similarity-search match.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    pub metadata: Map<String, Value>,
    /// Cosine similarity against the query embedding, in `[-1.0, 1.0]`.
    pub score: f64,
}

/// A skipped file or record from the loader, kept for reporting.
#[derive(Debug, Clone)]
pub struct LoadIssue {
    pub file: PathBuf,
    /// Index of the record within the file, when the file itself parsed.
    pub record: Option<usize>,
    pub message: String,
}

/// Outcome of loading a chunk directory.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Chunks in file-enumeration order, within-file order preserved.
    pub chunks: Vec<Chunk>,
    pub files_read: usize,
    pub skipped: Vec<LoadIssue>,
}

/// Outcome of an add operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddReport {
    /// Distinct chunks handed to the store (after in-batch dedup).
    pub requested: usize,
    /// Chunks whose id was already present and was left untouched.
    pub already_present: usize,
    /// Chunks actually embedded and committed.
    pub added: usize,
}
