//! The chunk store: sole owner of the SQLite pool and the embedding
//! provider. Every store mutation and similarity query passes through
//! [`ChunkStore`].
//!
//! The incremental-add path is a set difference: ids already in the
//! collection are never re-embedded unless `force_recompute` is set.
//! Embedding happens in config-sized batches; each batch's rows are
//! inserted inside one transaction, so a provider failure aborts the
//! operation while everything committed so far stays committed. A retry
//! through [`ChunkStore::filter_new_chunks`] resumes where the failure
//! left off.

use sqlx::{Row, SqlitePool};
use std::collections::{BTreeSet, HashMap};

use crate::config::{validate_collection_name, Config};
use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::migrate;
use crate::models::{AddReport, Chunk, SearchHit};

pub struct ChunkStore {
    pool: SqlitePool,
    provider: Box<dyn EmbeddingProvider>,
    collection: String,
    batch_size: usize,
}

impl ChunkStore {
    /// Open (or create) the store described by `config`. Runs migrations,
    /// so the collection is usable immediately.
    pub async fn open(config: &Config, provider: Box<dyn EmbeddingProvider>) -> Result<Self> {
        let pool = db::connect(&config.db.path).await?;
        Self::with_pool(
            pool,
            provider,
            &config.store.collection,
            config.embedding.batch_size,
        )
        .await
    }

    /// Build a store over an existing pool. Used by embedders of the
    /// library and by tests (in-memory SQLite, fake providers).
    pub async fn with_pool(
        pool: SqlitePool,
        provider: Box<dyn EmbeddingProvider>,
        collection: &str,
        batch_size: usize,
    ) -> Result<Self> {
        validate_collection_name(collection)?;
        if batch_size == 0 {
            return Err(Error::Config("batch size must be > 0".into()));
        }
        migrate::run_migrations(&pool).await?;

        Ok(Self {
            pool,
            provider,
            collection: collection.to_string(),
            batch_size,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Ids currently present in the collection. Id-only SELECT — never
    /// touches vectors, never calls the embedding service.
    pub async fn existing_ids(&self) -> Result<BTreeSet<String>> {
        let rows = sqlx::query("SELECT id FROM chunks WHERE collection = ?")
            .bind(&self.collection)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    /// The ordered subsequence of `chunks` whose ids are not yet stored.
    /// Read-only with respect to the store; also serves dry-run previews.
    pub async fn filter_new_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Chunk>> {
        let existing = self.existing_ids().await?;
        Ok(chunks
            .iter()
            .filter(|c| !existing.contains(&c.id))
            .cloned()
            .collect())
    }

    /// Embed and insert the chunks that are not yet stored. Makes zero
    /// embedding calls when nothing is missing.
    pub async fn add_chunks_if_missing(&self, chunks: &[Chunk]) -> Result<AddReport> {
        self.add_chunks(chunks, false).await
    }

    /// Embed and insert chunks. With `force_recompute`, the missing-id
    /// filter is bypassed and every chunk is re-embedded and upserted,
    /// overwriting prior vectors and metadata — the explicit recovery path
    /// for stale embeddings.
    ///
    /// Duplicate ids within `chunks` resolve last-write-wins before any
    /// embedding happens.
    pub async fn add_chunks(&self, chunks: &[Chunk], force_recompute: bool) -> Result<AddReport> {
        let distinct = dedup_last_write_wins(chunks);
        let requested = distinct.len();

        let to_add = if force_recompute {
            distinct
        } else {
            let existing = self.existing_ids().await?;
            distinct
                .into_iter()
                .filter(|c| !existing.contains(&c.id))
                .collect()
        };
        let already_present = requested - to_add.len();

        if to_add.is_empty() {
            return Ok(AddReport {
                requested,
                already_present,
                added: 0,
            });
        }

        let mut added = 0usize;

        for batch in to_add.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();

            let vectors = self
                .provider
                .embed_documents(&texts)
                .await
                .map_err(|source| Error::EmbeddingAborted {
                    added,
                    requested: to_add.len(),
                    source,
                })?;

            if vectors.len() != batch.len() {
                return Err(Error::EmbeddingAborted {
                    added,
                    requested: to_add.len(),
                    source: anyhow::anyhow!(
                        "provider returned {} vectors for {} texts",
                        vectors.len(),
                        batch.len()
                    ),
                });
            }

            // One transaction per batch: either all of these rows land or
            // none of them do.
            let mut tx = self.pool.begin().await?;
            let now = chrono::Utc::now().timestamp();

            for (chunk, vector) in batch.iter().zip(vectors.iter()) {
                let metadata_json =
                    serde_json::Value::Object(chunk.metadata.clone()).to_string();
                sqlx::query(
                    r#"
                    INSERT INTO chunks
                        (collection, id, content, metadata_json, model, dims, embedding, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(collection, id) DO UPDATE SET
                        content = excluded.content,
                        metadata_json = excluded.metadata_json,
                        model = excluded.model,
                        dims = excluded.dims,
                        embedding = excluded.embedding,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(&self.collection)
                .bind(&chunk.id)
                .bind(&chunk.content)
                .bind(&metadata_json)
                .bind(self.provider.model_name())
                .bind(vector.len() as i64)
                .bind(vec_to_blob(vector))
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            added += batch.len();
        }

        Ok(AddReport {
            requested,
            already_present,
            added,
        })
    }

    /// Nearest-neighbor lookup: embed the query once, score every stored
    /// vector by cosine similarity, return the top `n_results` matches in
    /// descending score order (id ascending as the deterministic
    /// tie-break). Never mutates the store.
    pub async fn query_similar(&self, query_text: &str, n_results: usize) -> Result<Vec<SearchHit>> {
        if query_text.trim().is_empty() {
            return Err(Error::Query("query text is empty".into()));
        }
        if self.count().await? == 0 {
            return Err(Error::Query(format!(
                "collection '{}' is empty — run a sync first",
                self.collection
            )));
        }

        let query_vec = self
            .provider
            .embed_query(query_text)
            .await
            .map_err(Error::Embedding)?;

        let rows = sqlx::query(
            "SELECT id, content, metadata_json, embedding FROM chunks WHERE collection = ?",
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<SearchHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let score = cosine_similarity(&query_vec, &blob_to_vec(&blob)) as f64;
                let metadata_json: String = row.get("metadata_json");
                let metadata = serde_json::from_str(&metadata_json).unwrap_or_default();

                SearchHit {
                    id: row.get("id"),
                    content: row.get("content"),
                    metadata,
                    score,
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(n_results);

        Ok(hits)
    }

    /// Number of chunks stored in the collection.
    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Release the connection pool. Dropping the store also releases it at
    /// process exit; this exists for symmetry.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Resolve duplicate ids within one input batch: the last occurrence wins,
/// at the position of the first occurrence.
fn dedup_last_write_wins(chunks: &[Chunk]) -> Vec<Chunk> {
    let mut position: HashMap<&str, usize> = HashMap::new();
    let mut out: Vec<Chunk> = Vec::new();

    for chunk in chunks {
        match position.get(chunk.id.as_str()) {
            Some(&idx) => out[idx] = chunk.clone(),
            None => {
                position.insert(chunk.id.as_str(), out.len());
                out.push(chunk.clone());
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingProvider;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Deterministic fake: a byte histogram, so identical texts embed
    /// identically and texts over disjoint alphabets are orthogonal.
    fn fake_vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; 8];
        for b in text.bytes() {
            v[(b as usize) % 8] += 1.0;
        }
        v
    }

    struct FakeProvider {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EmbeddingProvider for FakeProvider {
        fn model_name(&self) -> &str {
            "fake-embed"
        }

        async fn embed_documents(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| fake_vector(t)).collect())
        }

        async fn embed_query(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(fake_vector(text))
        }
    }

    /// Succeeds for the first `allow` batch calls, then errors.
    struct FailAfterProvider {
        allow: usize,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EmbeddingProvider for FailAfterProvider {
        fn model_name(&self) -> &str {
            "fail-after"
        }

        async fn embed_documents(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call >= self.allow {
                anyhow::bail!("simulated service outage");
            }
            Ok(texts.iter().map(|t| fake_vector(t)).collect())
        }

        async fn embed_query(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            anyhow::bail!("simulated service outage");
        }
    }

    fn chunk(id: &str, content: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            content: content.to_string(),
            metadata: serde_json::Map::new(),
        }
    }

    async fn store_with_fake(batch_size: usize) -> (ChunkStore, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = FakeProvider {
            calls: calls.clone(),
        };
        let pool = db::connect_memory().await.unwrap();
        let store = ChunkStore::with_pool(pool, Box::new(provider), "test", batch_size)
            .await
            .unwrap();
        (store, calls)
    }

    fn abc() -> Vec<Chunk> {
        vec![
            chunk("a", "aaaa"),
            chunk("b", "bbbb"),
            chunk("c", "cccc"),
        ]
    }

    #[tokio::test]
    async fn scenario_a_fresh_store_adds_all() {
        let (store, _) = store_with_fake(16).await;

        let report = store.add_chunks_if_missing(&abc()).await.unwrap();
        assert_eq!(report.added, 3);
        assert_eq!(report.already_present, 0);

        let ids = store.existing_ids().await.unwrap();
        let expected: BTreeSet<String> =
            ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn scenario_b_second_run_adds_nothing_and_skips_the_service() {
        let (store, calls) = store_with_fake(16).await;

        store.add_chunks_if_missing(&abc()).await.unwrap();
        let calls_after_first = calls.load(Ordering::SeqCst);

        let report = store.add_chunks_if_missing(&abc()).await.unwrap();
        assert_eq!(report.added, 0);
        assert_eq!(report.already_present, 3);
        assert_eq!(
            calls.load(Ordering::SeqCst),
            calls_after_first,
            "idempotent re-add must make zero embedding calls"
        );
    }

    #[tokio::test]
    async fn scenario_c_overlapping_batch_adds_only_the_new_id() {
        let (store, _) = store_with_fake(16).await;
        store.add_chunks_if_missing(&abc()).await.unwrap();

        let report = store
            .add_chunks_if_missing(&[chunk("c", "cccc"), chunk("d", "dddd")])
            .await
            .unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(report.already_present, 1);
        assert_eq!(store.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn scenario_d_query_returns_the_matching_chunk() {
        let (store, _) = store_with_fake(16).await;
        store.add_chunks_if_missing(&abc()).await.unwrap();

        let hits = store.query_similar("bbbb", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
        assert!(hits[0].score > 0.99);
        assert!(hits[0].score <= 1.0 + 1e-6);
    }

    #[tokio::test]
    async fn scenario_e_query_on_empty_collection_is_a_query_error() {
        let (store, _) = store_with_fake(16).await;
        let err = store.query_similar("anything", 3).await.unwrap_err();
        assert!(matches!(err, Error::Query(_)));
    }

    #[tokio::test]
    async fn blank_query_text_is_rejected() {
        let (store, _) = store_with_fake(16).await;
        store.add_chunks_if_missing(&abc()).await.unwrap();
        let err = store.query_similar("   ", 3).await.unwrap_err();
        assert!(matches!(err, Error::Query(_)));
    }

    #[tokio::test]
    async fn disjoint_adds_union() {
        let (store, _) = store_with_fake(2).await;
        store
            .add_chunks_if_missing(&[chunk("a", "aaaa"), chunk("b", "bbbb")])
            .await
            .unwrap();
        store
            .add_chunks_if_missing(&[chunk("c", "cccc"), chunk("d", "dddd")])
            .await
            .unwrap();

        let ids = store.existing_ids().await.unwrap();
        let expected: BTreeSet<String> = ["a", "b", "c", "d"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn filter_is_read_only() {
        let (store, calls) = store_with_fake(16).await;
        store.add_chunks_if_missing(&abc()).await.unwrap();
        let before = store.existing_ids().await.unwrap();
        let calls_before = calls.load(Ordering::SeqCst);

        for _ in 0..3 {
            let new = store
                .filter_new_chunks(&[chunk("a", "aaaa"), chunk("z", "zzzz")])
                .await
                .unwrap();
            let ids: Vec<&str> = new.iter().map(|c| c.id.as_str()).collect();
            assert_eq!(ids, vec!["z"]);
        }

        assert_eq!(store.existing_ids().await.unwrap(), before);
        assert_eq!(calls.load(Ordering::SeqCst), calls_before);
    }

    #[tokio::test]
    async fn force_recompute_overwrites_without_changing_membership() {
        let (store, _) = store_with_fake(16).await;
        store
            .add_chunks_if_missing(&[chunk("a", "aaaa")])
            .await
            .unwrap();
        let before = store.existing_ids().await.unwrap();

        let mut updated = chunk("a", "eeee");
        updated
            .metadata
            .insert("revised".into(), serde_json::json!(true));
        let report = store.add_chunks(&[updated], true).await.unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(report.already_present, 0);

        assert_eq!(store.existing_ids().await.unwrap(), before);

        // The stored content, metadata, and vector now reflect the rewrite
        let hits = store.query_similar("eeee", 1).await.unwrap();
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[0].content, "eeee");
        assert_eq!(hits[0].metadata["revised"], true);
        assert!(hits[0].score > 0.99);
    }

    #[tokio::test]
    async fn duplicate_ids_in_one_batch_last_write_wins() {
        let (store, _) = store_with_fake(16).await;

        let report = store
            .add_chunks_if_missing(&[chunk("x", "aaaa"), chunk("x", "bbbb")])
            .await
            .unwrap();
        assert_eq!(report.requested, 1);
        assert_eq!(report.added, 1);

        let hits = store.query_similar("bbbb", 1).await.unwrap();
        assert_eq!(hits[0].id, "x");
        assert_eq!(hits[0].content, "bbbb");
    }

    #[tokio::test]
    async fn partial_failure_keeps_committed_batches_and_is_resumable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = FailAfterProvider {
            allow: 1,
            calls: calls.clone(),
        };
        let pool = db::connect_memory().await.unwrap();
        let store = ChunkStore::with_pool(pool.clone(), Box::new(provider), "test", 2)
            .await
            .unwrap();

        let four = vec![
            chunk("a", "aaaa"),
            chunk("b", "bbbb"),
            chunk("c", "cccc"),
            chunk("d", "dddd"),
        ];

        let err = store.add_chunks_if_missing(&four).await.unwrap_err();
        match err {
            Error::EmbeddingAborted {
                added, requested, ..
            } => {
                assert_eq!(added, 2, "first batch of 2 committed before the outage");
                assert_eq!(requested, 4);
            }
            other => panic!("expected EmbeddingAborted, got {:?}", other),
        }

        // The first batch survived the failure
        let ids = store.existing_ids().await.unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("a") && ids.contains("b"));

        // A retry over the same pool picks up only the remainder
        let retry_calls = Arc::new(AtomicUsize::new(0));
        let retry_store = ChunkStore::with_pool(
            pool,
            Box::new(FakeProvider {
                calls: retry_calls,
            }),
            "test",
            2,
        )
        .await
        .unwrap();

        let report = retry_store.add_chunks_if_missing(&four).await.unwrap();
        assert_eq!(report.added, 2);
        assert_eq!(report.already_present, 2);
        assert_eq!(retry_store.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn query_results_are_ranked_and_truncated() {
        let (store, _) = store_with_fake(16).await;
        store
            .add_chunks_if_missing(&[
                chunk("near", "bbbb"),
                chunk("close", "bbbc"),
                chunk("far", "hhhh"),
            ])
            .await
            .unwrap();

        let hits = store.query_similar("bbbb", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "near");
        assert_eq!(hits[1].id, "close");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn collections_are_isolated() {
        let pool = db::connect_memory().await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let store_a = ChunkStore::with_pool(
            pool.clone(),
            Box::new(FakeProvider {
                calls: calls.clone(),
            }),
            "col_a",
            16,
        )
        .await
        .unwrap();
        let store_b =
            ChunkStore::with_pool(pool, Box::new(FakeProvider { calls }), "col_b", 16)
                .await
                .unwrap();

        store_a
            .add_chunks_if_missing(&[chunk("a", "aaaa")])
            .await
            .unwrap();

        assert_eq!(store_a.count().await.unwrap(), 1);
        assert_eq!(store_b.count().await.unwrap(), 0);
        assert!(store_b.existing_ids().await.unwrap().is_empty());
    }

    #[test]
    fn dedup_keeps_first_position_last_value() {
        let input = vec![
            chunk("a", "one"),
            chunk("b", "two"),
            chunk("a", "three"),
        ];
        let out = dedup_last_write_wins(&input);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, "a");
        assert_eq!(out[0].content, "three");
        assert_eq!(out[1].id, "b");
    }
}
