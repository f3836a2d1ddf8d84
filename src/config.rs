use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Default collection name, matching the tool's documented layout.
pub const DEFAULT_COLLECTION: &str = "document_chunks";
/// Default embedding model identifier.
pub const DEFAULT_MODEL: &str = "text-embedding-004";

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub db: DbConfig,
    pub store: StoreConfig,
    pub sync: SyncConfig,
    pub embedding: EmbeddingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db: DbConfig::default(),
            store: StoreConfig::default(),
            sync: SyncConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DbConfig {
    /// Path to the SQLite database file; parent directories are created
    /// on first use.
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/chunks.sqlite"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    /// Named collection the run operates on. Created if absent, reused
    /// afterwards, never implicitly deleted.
    pub collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    /// Directory scanned for `*.json` chunk files when `cks sync` is run
    /// without an explicit directory argument.
    pub chunk_dir: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_dir: PathBuf::from("./chunk_files"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding model identifier (e.g. `text-embedding-004`).
    pub model: String,
    /// Texts per embedding API call; also the unit of transactional insert.
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            batch_size: 16,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

/// Load configuration from a TOML file, falling back to defaults when the
/// file does not exist. The API credential never lives in this file — it is
/// passed explicitly into the provider constructor.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))?
    } else {
        Config::default()
    };

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    validate_collection_name(&config.store.collection)?;

    if config.embedding.model.trim().is_empty() {
        return Err(Error::Config("embedding.model must not be empty".into()));
    }
    if config.embedding.batch_size == 0 {
        return Err(Error::Config("embedding.batch_size must be > 0".into()));
    }

    Ok(())
}

/// A collection name must be non-empty and limited to `[A-Za-z0-9._-]`.
pub fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Config("collection name must not be empty".into()));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(Error::Config(format!(
            "malformed collection name '{}': only [A-Za-z0-9._-] allowed",
            name
        )));
    }
    Ok(())
}
