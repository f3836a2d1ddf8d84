//! Error taxonomy for chunk-sync.
//!
//! Four failure classes cross the library boundary:
//! - [`Error::Config`] — fatal at startup (credential, paths, names)
//! - [`Error::Input`] — the chunk directory itself is unusable
//! - [`Error::Embedding`] / [`Error::EmbeddingAborted`] — the embedding
//!   service failed
//! - [`Error::Query`] — a similarity query cannot be answered
//!
//! Per-file and per-record input problems are *not* errors: the loader
//! skips and reports them (see [`crate::models::LoadIssue`]).

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing/empty credential, unwritable storage path, malformed
    /// collection name, or an invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// The chunk directory is missing or unreadable.
    #[error("input error at {}: {message}", .path.display())]
    Input { path: PathBuf, message: String },

    /// The embedding service failed outside an add batch (e.g. while
    /// embedding a query).
    #[error("embedding service error: {0}")]
    Embedding(#[source] anyhow::Error),

    /// The embedding service failed mid-add. Rows committed before the
    /// failure stay committed; `added` of `requested` tells the caller
    /// where a retry will resume.
    #[error("embedding service error after committing {added} of {requested} chunks: {source}")]
    EmbeddingAborted {
        added: usize,
        requested: usize,
        #[source]
        source: anyhow::Error,
    },

    /// Query against an empty collection, or blank query text.
    #[error("query error: {0}")]
    Query(String),

    #[error(transparent)]
    Store(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
