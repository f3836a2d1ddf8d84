//! # chunk-sync CLI (`cks`)
//!
//! ```bash
//! cks --config ./cks.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cks init` | Create the SQLite database and schema |
//! | `cks sync [DIR]` | Load JSON chunks and embed + store the missing ones |
//! | `cks query "<text>"` | Similarity search against the stored chunks |
//! | `cks info` | Show collection name, database path, and chunk count |
//!
//! Commands that call the embedding service (`sync` without `--dry-run`,
//! `query`) read the credential from the `GEMINI_API_KEY` environment
//! variable here at the binary edge and pass it in explicitly; the library
//! never touches the environment.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use chunk_sync::config;
use chunk_sync::embedding::{DisabledProvider, EmbeddingProvider, GeminiProvider};
use chunk_sync::error::Error;
use chunk_sync::{search, sync};

#[derive(Parser)]
#[command(
    name = "cks",
    about = "Sync JSON text chunks into a local vector store and query them by similarity",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Defaults apply if the file does
    /// not exist.
    #[arg(long, global = true, default_value = "./cks.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Load chunks from a directory of JSON files and add the ones whose
    /// ids are not yet stored. Already-present ids are never re-embedded
    /// unless --force is given.
    Sync {
        /// Chunk directory; defaults to `sync.chunk_dir` from the config.
        dir: Option<PathBuf>,

        /// Re-embed and upsert every loaded chunk, overwriting stored
        /// vectors and metadata for existing ids.
        #[arg(long)]
        force: bool,

        /// Show load and diff counts without embedding or writing anything.
        /// Needs no API key.
        #[arg(long)]
        dry_run: bool,

        /// Run one demonstration query after the sync completes.
        #[arg(long)]
        query: Option<String>,
    },

    /// Similarity search against an already-populated collection. Never
    /// inserts or re-embeds stored chunks.
    Query {
        /// The query text.
        text: String,

        /// Maximum number of results.
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },

    /// Show collection name, database path, and chunk count. Needs no API
    /// key.
    Info,
}

/// Read the credential from the environment and build the Gemini provider.
fn gemini_provider(
    config: &config::Config,
) -> Result<Box<dyn EmbeddingProvider>, Error> {
    let api_key = std::env::var("GEMINI_API_KEY").map_err(|_| {
        Error::Config("GEMINI_API_KEY environment variable is not set".into())
    })?;
    Ok(Box::new(GeminiProvider::new(&api_key, &config.embedding)?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = chunk_sync::db::connect(&cfg.db.path).await?;
            chunk_sync::migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Sync {
            dir,
            force,
            dry_run,
            query,
        } => {
            let provider: Box<dyn EmbeddingProvider> = if dry_run {
                Box::new(DisabledProvider)
            } else {
                gemini_provider(&cfg)?
            };
            sync::run_sync(
                &cfg,
                provider,
                dir.as_deref(),
                force,
                dry_run,
                query.as_deref(),
            )
            .await?;
        }
        Commands::Query { text, limit } => {
            let provider = gemini_provider(&cfg)?;
            search::run_query(&cfg, provider, &text, limit).await?;
        }
        Commands::Info => {
            sync::run_info(&cfg, Box::new(DisabledProvider)).await?;
        }
    }

    Ok(())
}
