//! # chunk-sync
//!
//! Incremental sync of JSON text chunks into a local SQLite-backed vector
//! store, with similarity queries powered by Gemini embeddings.
//!
//! The pipeline is deliberately thin: load chunk records from a directory
//! of JSON files, diff their ids against what the collection already holds,
//! embed only the missing ones, and store `(id, embedding, content,
//! metadata)` rows. Queries embed the query text once and rank stored rows
//! by cosine similarity.
//!
//! ```text
//! *.json files ──▶ loader ──▶ ChunkStore ──▶ SQLite
//!                               │  ▲
//!                     embed new │  │ query
//!                               ▼  │
//!                          Gemini API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with defaults |
//! | [`error`] | Typed error taxonomy |
//! | [`models`] | Chunks, search hits, reports |
//! | [`loader`] | JSON chunk directory → ordered records |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Idempotent schema creation |
//! | [`embedding`] | Provider trait, Gemini client, vector utilities |
//! | [`store`] | Existing-id diff, batched add, similarity query |
//! | [`sync`] | Sync entry flow |
//! | [`search`] | Query-only entry flow |

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod search;
pub mod store;
pub mod sync;
