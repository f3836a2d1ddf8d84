//! Query-only entry flow.
//!
//! Opens an assumed-populated collection and runs similarity queries. This
//! path contains no insertion call at all — a read can never trigger
//! re-embedding of stored chunks.

use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::models::SearchHit;
use crate::store::ChunkStore;

pub async fn run_query(
    config: &Config,
    provider: Box<dyn EmbeddingProvider>,
    query: &str,
    limit: usize,
) -> Result<()> {
    let store = ChunkStore::open(config, provider).await?;
    let hits = store.query_similar(query, limit).await?;

    if hits.is_empty() {
        println!("No results.");
    } else {
        print_hits(&hits);
    }

    store.close().await;
    Ok(())
}

/// Print ranked hits with score, id, source metadata, and an excerpt.
pub fn print_hits(hits: &[SearchHit]) {
    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [{:.4}] {}", i + 1, hit.score, hit.id);
        if let Some(source) = hit.metadata.get("source_file").and_then(|v| v.as_str()) {
            println!("    source: {}", source);
        }
        println!("    excerpt: \"{}\"", excerpt(&hit.content, 200));
    }
}

fn excerpt(content: &str, max_chars: usize) -> String {
    let flat = content.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() <= max_chars {
        flat.to_string()
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
