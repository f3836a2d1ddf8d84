//! Sync entry flow: load chunks from disk, diff against the store, embed
//! and insert what is missing, report counts. Also hosts the `info`
//! reporting flow.

use std::path::Path;

use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::loader;
use crate::search::print_hits;
use crate::store::ChunkStore;

/// Run the full sync flow. With `dry_run`, nothing is embedded or written —
/// the flow only previews what an add would do. With `force`, every loaded
/// chunk is re-embedded and upserted. `demo_query` optionally runs one
/// similarity query against the freshly synced collection.
pub async fn run_sync(
    config: &Config,
    provider: Box<dyn EmbeddingProvider>,
    dir: Option<&Path>,
    force: bool,
    dry_run: bool,
    demo_query: Option<&str>,
) -> Result<()> {
    let dir = dir.unwrap_or(&config.sync.chunk_dir);
    let report = loader::load_chunks(dir)?;

    for issue in &report.skipped {
        match issue.record {
            Some(index) => eprintln!(
                "Warning: skipped record {} in {}: {}",
                index,
                issue.file.display(),
                issue.message
            ),
            None => eprintln!(
                "Warning: skipped {}: {}",
                issue.file.display(),
                issue.message
            ),
        }
    }

    let store = ChunkStore::open(config, provider).await?;

    if dry_run {
        let new = store.filter_new_chunks(&report.chunks).await?;
        println!("sync {} (dry-run)", dir.display());
        println!("  files read: {}", report.files_read);
        println!("  chunks loaded: {}", report.chunks.len());
        println!("  skipped records: {}", report.skipped.len());
        println!("  already present: {}", report.chunks.len() - new.len());
        println!("  would add: {}", new.len());
        store.close().await;
        return Ok(());
    }

    let added = store.add_chunks(&report.chunks, force).await?;

    println!("sync {}", dir.display());
    println!("  files read: {}", report.files_read);
    println!("  chunks loaded: {}", report.chunks.len());
    println!("  skipped records: {}", report.skipped.len());
    println!("  requested: {}", added.requested);
    println!("  already present: {}", added.already_present);
    println!("  added: {}", added.added);
    println!(
        "  collection '{}' now holds {} chunks",
        store.collection(),
        store.count().await?
    );

    if let Some(query) = demo_query {
        println!();
        println!("demo query: {:?}", query);
        let hits = store.query_similar(query, 3).await?;
        print_hits(&hits);
    }

    println!("ok");
    store.close().await;
    Ok(())
}

/// Print collection name, backing database path, and chunk count.
pub async fn run_info(config: &Config, provider: Box<dyn EmbeddingProvider>) -> Result<()> {
    let store = ChunkStore::open(config, provider).await?;

    println!("collection: {}", store.collection());
    println!("  database: {}", config.db.path.display());
    println!("  chunks: {}", store.count().await?);

    store.close().await;
    Ok(())
}
