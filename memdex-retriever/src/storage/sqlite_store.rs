//! SQLite implementation of [`IndexStore`]
//!
//! ## Database Schema
//!
//! ```sql
//! -- One row per agent: which document version and settings built its index
//! CREATE TABLE index_meta (
//!     agent_id TEXT PRIMARY KEY,
//!     content_digest TEXT NOT NULL,
//!     schema_version INTEGER NOT NULL,
//!     chunk_size INTEGER NOT NULL,
//!     chunk_overlap INTEGER NOT NULL,
//!     embedding_provider TEXT NOT NULL,
//!     embedding_model TEXT NOT NULL,
//!     chunk_count INTEGER NOT NULL,
//!     built_at TIMESTAMP NOT NULL
//! );
//!
//! -- Chunks; `seq` is the chunk id within the agent's index
//! CREATE TABLE chunks (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     agent_id TEXT NOT NULL,
//!     seq INTEGER NOT NULL,
//!     source TEXT NOT NULL,
//!     start_offset INTEGER NOT NULL,
//!     end_offset INTEGER NOT NULL,
//!     content TEXT NOT NULL,
//!     UNIQUE(agent_id, seq)
//! );
//!
//! -- Cached vectors, native-endian f32 blobs
//! CREATE TABLE chunk_embeddings (
//!     chunk_id INTEGER PRIMARY KEY REFERENCES chunks(id) ON DELETE CASCADE,
//!     provider_model TEXT NOT NULL,
//!     dimension INTEGER NOT NULL,
//!     embedding BLOB NOT NULL
//! );
//!
//! -- Lexical prefilter, rowid = chunks.id
//! CREATE VIRTUAL TABLE chunks_fts USING fts5(content, tokenize = 'unicode61 remove_diacritics 0');
//! ```
//!
//! A rebuild deletes and rewrites all of an agent's rows in one transaction, so
//! readers see either the old index or the new one.

use super::{Candidate, IndexBuild, IndexMetadata, IndexStore, SCHEMA_VERSION, StoredChunk};
use crate::error::Result;
use crate::retrieval::lexical::{containment_score, fts_match_expression, query_terms};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Clone, Debug)]
pub struct SqliteIndexStore {
    path: Option<PathBuf>,
    pool: SqlitePool,
}

impl SqliteIndexStore {
    /// Opens (creating if needed) the database at `db_path`.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
                .create_if_missing(true),
        )
        .await?;
        Self::new_with_pool(Some(db_path.to_path_buf()), pool).await
    }

    /// Opens an in-memory database for testing.
    pub async fn open_memory() -> Result<Self> {
        // Every connection to ":memory:" is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(
                SqliteConnectOptions::new()
                    .in_memory(true)
                    .foreign_keys(true),
            )
            .await?;
        Self::new_with_pool(None, pool).await
    }

    async fn new_with_pool(path: Option<PathBuf>, pool: SqlitePool) -> Result<Self> {
        Self::create_tables(&pool).await?;
        Ok(Self { path, pool })
    }

    /// Database file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Get the underlying SQLite connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_meta (
                agent_id TEXT PRIMARY KEY,
                content_digest TEXT NOT NULL,
                schema_version INTEGER NOT NULL,
                chunk_size INTEGER NOT NULL,
                chunk_overlap INTEGER NOT NULL,
                embedding_provider TEXT NOT NULL,
                embedding_model TEXT NOT NULL,
                chunk_count INTEGER NOT NULL,
                built_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                source TEXT NOT NULL,
                start_offset INTEGER NOT NULL,
                end_offset INTEGER NOT NULL,
                content TEXT NOT NULL,
                CONSTRAINT unique_chunk UNIQUE(agent_id, seq)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunk_embeddings (
                chunk_id INTEGER PRIMARY KEY,
                provider_model TEXT NOT NULL,
                dimension INTEGER NOT NULL,
                embedding BLOB NOT NULL,
                FOREIGN KEY (chunk_id) REFERENCES chunks(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts
            USING fts5(content, tokenize = 'unicode61 remove_diacritics 0')
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_agent ON chunks(agent_id)")
            .execute(pool)
            .await?;

        Ok(())
    }

    async fn delete_agent_rows(tx: &mut Transaction<'_, Sqlite>, agent_id: &str) -> Result<()> {
        sqlx::query(
            "DELETE FROM chunks_fts WHERE rowid IN (SELECT id FROM chunks WHERE agent_id = ?1)",
        )
        .bind(agent_id)
        .execute(&mut **tx)
        .await?;
        sqlx::query(
            "DELETE FROM chunk_embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE agent_id = ?1)",
        )
        .bind(agent_id)
        .execute(&mut **tx)
        .await?;
        sqlx::query("DELETE FROM chunks WHERE agent_id = ?1")
            .bind(agent_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    fn row_to_chunk(row: &SqliteRow) -> StoredChunk {
        let seq: i64 = row.get("seq");
        let start_offset: i64 = row.get("start_offset");
        let end_offset: i64 = row.get("end_offset");
        StoredChunk {
            chunk_id: seq as usize,
            source: row.get("source"),
            start_offset: start_offset as usize,
            end_offset: end_offset as usize,
            text: row.get("content"),
        }
    }

    /// Chunks matching any query term, best bm25 rank first.
    async fn fts_candidates(
        &self,
        agent_id: &str,
        expression: &str,
        k: usize,
    ) -> Result<Vec<StoredChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.seq, c.source, c.start_offset, c.end_offset, c.content
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.rowid
            WHERE c.agent_id = ?1 AND chunks_fts MATCH ?2
            ORDER BY bm25(chunks_fts), c.seq
            LIMIT ?3
            "#,
        )
        .bind(agent_id)
        .bind(expression)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(Self::row_to_chunk).collect())
    }
}

fn encode_embedding(embedding: &[f32]) -> &[u8] {
    bytemuck::cast_slice::<f32, u8>(embedding)
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    // Blobs carry no alignment guarantee.
    bytes
        .chunks_exact(std::mem::size_of::<f32>())
        .map(bytemuck::pod_read_unaligned::<f32>)
        .collect()
}

#[async_trait]
impl IndexStore for SqliteIndexStore {
    async fn load_metadata(&self, agent_id: &str) -> Result<Option<IndexMetadata>> {
        let row = sqlx::query(
            r#"
            SELECT agent_id, content_digest, schema_version, chunk_size, chunk_overlap,
                   embedding_provider, embedding_model, chunk_count, built_at
            FROM index_meta WHERE agent_id = ?1
            "#,
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let chunk_size: i64 = row.try_get("chunk_size")?;
        let chunk_overlap: i64 = row.try_get("chunk_overlap")?;
        let chunk_count: i64 = row.try_get("chunk_count")?;
        let built_at: DateTime<Utc> = row.try_get("built_at")?;
        Ok(Some(IndexMetadata {
            agent_id: row.try_get("agent_id")?,
            content_digest: row.try_get("content_digest")?,
            schema_version: row.try_get("schema_version")?,
            chunk_size: chunk_size as usize,
            chunk_overlap: chunk_overlap as usize,
            embedding_provider: row.try_get("embedding_provider")?,
            embedding_model: row.try_get("embedding_model")?,
            chunk_count: chunk_count as usize,
            built_at,
        }))
    }

    async fn rebuild(&self, agent_id: &str, build: &IndexBuild) -> Result<()> {
        let provider_model = build.provider_model();
        let mut tx = self.pool.begin().await?;

        Self::delete_agent_rows(&mut tx, agent_id).await?;

        for (idx, chunk) in build.chunks.iter().enumerate() {
            let id = sqlx::query(
                r#"
                INSERT INTO chunks (agent_id, seq, source, start_offset, end_offset, content)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(agent_id)
            .bind(chunk.chunk_id as i64)
            .bind(&chunk.source)
            .bind(chunk.start_offset as i64)
            .bind(chunk.end_offset as i64)
            .bind(&chunk.text)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

            sqlx::query("INSERT INTO chunks_fts (rowid, content) VALUES (?1, ?2)")
                .bind(id)
                .bind(&chunk.text)
                .execute(&mut *tx)
                .await?;

            if let Some(Some(embedding)) = build.embeddings.get(idx) {
                sqlx::query(
                    r#"
                    INSERT INTO chunk_embeddings (chunk_id, provider_model, dimension, embedding)
                    VALUES (?1, ?2, ?3, ?4)
                    "#,
                )
                .bind(id)
                .bind(&provider_model)
                .bind(embedding.len() as i64)
                .bind(encode_embedding(embedding))
                .execute(&mut *tx)
                .await?;
            }
        }

        let fp = &build.fingerprint;
        sqlx::query(
            r#"
            INSERT INTO index_meta (
                agent_id, content_digest, schema_version, chunk_size, chunk_overlap,
                embedding_provider, embedding_model, chunk_count, built_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(agent_id) DO UPDATE SET
                content_digest = excluded.content_digest,
                schema_version = excluded.schema_version,
                chunk_size = excluded.chunk_size,
                chunk_overlap = excluded.chunk_overlap,
                embedding_provider = excluded.embedding_provider,
                embedding_model = excluded.embedding_model,
                chunk_count = excluded.chunk_count,
                built_at = excluded.built_at
            "#,
        )
        .bind(agent_id)
        .bind(&fp.content_digest)
        .bind(SCHEMA_VERSION)
        .bind(fp.chunk_size as i64)
        .bind(fp.chunk_overlap as i64)
        .bind(&fp.embedding_provider)
        .bind(&fp.embedding_model)
        .bind(build.chunks.len() as i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(
            "Committed {} chunks ({} with vectors) for agent {}",
            build.chunks.len(),
            build.embedded_count(),
            agent_id
        );
        Ok(())
    }

    async fn lexical_prefilter(
        &self,
        agent_id: &str,
        query_text: &str,
        k: usize,
    ) -> Result<Vec<Candidate>> {
        let k = k.max(1);
        let terms = query_terms(query_text);

        let mut chunks = match fts_match_expression(&terms) {
            Some(expression) => self.fts_candidates(agent_id, &expression, k).await?,
            None => Vec::new(),
        };

        if chunks.is_empty() {
            let rows = sqlx::query(
                r#"
                SELECT seq, source, start_offset, end_offset, content
                FROM chunks WHERE agent_id = ?1
                ORDER BY seq DESC
                LIMIT ?2
                "#,
            )
            .bind(agent_id)
            .bind(k as i64)
            .fetch_all(&self.pool)
            .await?;
            chunks = rows.iter().map(Self::row_to_chunk).collect();
        }

        Ok(chunks
            .into_iter()
            .map(|chunk| Candidate {
                lexical_score: containment_score(&terms, &chunk.text),
                chunk,
            })
            .collect())
    }

    async fn get_embeddings(
        &self,
        agent_id: &str,
        chunk_ids: &[usize],
    ) -> Result<HashMap<usize, Vec<f32>>> {
        if chunk_ids.is_empty() {
            return Ok(HashMap::new());
        }

        // ?1 is the agent, chunk ids follow
        let placeholders = (0..chunk_ids.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let query = format!(
            "SELECT c.seq, e.embedding FROM chunk_embeddings e
             JOIN chunks c ON c.id = e.chunk_id
             WHERE c.agent_id = ?1 AND c.seq IN ({placeholders})"
        );

        let mut query_builder = sqlx::query(&query).bind(agent_id);
        for id in chunk_ids {
            query_builder = query_builder.bind(*id as i64);
        }

        let rows = query_builder.fetch_all(&self.pool).await?;
        let mut embeddings = HashMap::with_capacity(rows.len());
        for row in rows {
            let seq: i64 = row.get("seq");
            let bytes: Vec<u8> = row.get("embedding");
            embeddings.insert(seq as usize, decode_embedding(&bytes));
        }
        Ok(embeddings)
    }

    async fn list_chunks(&self, agent_id: &str) -> Result<Vec<StoredChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT seq, source, start_offset, end_offset, content
            FROM chunks WHERE agent_id = ?1
            ORDER BY seq
            "#,
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(Self::row_to_chunk).collect())
    }

    async fn delete_index(&self, agent_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::delete_agent_rows(&mut tx, agent_id).await?;
        sqlx::query("DELETE FROM index_meta WHERE agent_id = ?1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn repair_schema(&self, agent_id: &str) -> Result<()> {
        Self::create_tables(&self.pool).await?;

        // A recreated FTS table starts empty; refill it for every agent
        let reindexed = sqlx::query(
            r#"
            INSERT INTO chunks_fts (rowid, content)
            SELECT id, content FROM chunks
            WHERE id NOT IN (SELECT rowid FROM chunks_fts)
            "#,
        )
        .execute(&self.pool)
        .await?
        .rows_affected();
        if reindexed > 0 {
            warn!("Restored {} full-text entries after a schema repair", reindexed);
        }

        self.delete_index(agent_id).await
    }

    async fn reset_schema(&self) -> Result<()> {
        for table in ["chunks_fts", "chunk_embeddings", "chunks", "index_meta"] {
            sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
                .execute(&self.pool)
                .await?;
        }
        Self::create_tables(&self.pool).await
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::IndexFingerprint;
    use anyhow::Result;
    use tempfile::tempdir;

    fn build(digest: &str, texts: &[&str], embeddings: Vec<Option<Vec<f32>>>) -> IndexBuild {
        let mut offset = 0;
        let chunks = texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let start = offset;
                offset += text.chars().count();
                StoredChunk {
                    chunk_id: i,
                    source: "memory/MEMORY.md".to_string(),
                    start_offset: start,
                    end_offset: offset,
                    text: text.to_string(),
                }
            })
            .collect();
        IndexBuild {
            fingerprint: IndexFingerprint {
                content_digest: digest.to_string(),
                chunk_size: 256,
                chunk_overlap: 32,
                embedding_provider: "stub".to_string(),
                embedding_model: "v1".to_string(),
            },
            chunks,
            embeddings,
        }
    }

    #[tokio::test]
    async fn test_rebuild_and_metadata() -> Result<()> {
        let store = SqliteIndexStore::open_memory().await?;
        assert!(store.load_metadata("alice").await?.is_none());

        store
            .rebuild(
                "alice",
                &build("d1", &["likes tea", "hates coffee"], vec![None, None]),
            )
            .await?;

        let meta = store.load_metadata("alice").await?.expect("metadata");
        assert_eq!(meta.content_digest, "d1");
        assert_eq!(meta.schema_version, SCHEMA_VERSION);
        assert_eq!(meta.chunk_count, 2);
        assert_eq!(meta.embedding_provider, "stub");

        // A second rebuild replaces, never appends
        store
            .rebuild("alice", &build("d2", &["only one"], vec![None]))
            .await?;
        let chunks = store.list_chunks("alice").await?;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "only one");
        assert_eq!(
            store.load_metadata("alice").await?.map(|m| m.content_digest),
            Some("d2".to_string())
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_embeddings_round_trip_exactly() -> Result<()> {
        let store = SqliteIndexStore::open_memory().await?;
        let vector = vec![0.1_f32, -2.5, 3.0e-7, f32::MAX];
        store
            .rebuild(
                "alice",
                &build("d", &["a", "b", "c"], vec![Some(vector.clone()), None, Some(vec![1.0])]),
            )
            .await?;

        let embeddings = store.get_embeddings("alice", &[0, 1, 2, 7]).await?;
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[&0], vector);
        assert_eq!(embeddings[&2], vec![1.0]);
        assert!(!embeddings.contains_key(&1));
        assert!(store.get_embeddings("alice", &[]).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_prefilter_ranks_matches_and_falls_back() -> Result<()> {
        let store = SqliteIndexStore::open_memory().await?;
        store
            .rebuild(
                "alice",
                &build(
                    "d",
                    &[
                        "the staging password rotates on fridays",
                        "lunch is at noon",
                        "the staging cluster lives in eu-west",
                        "favourite colour is green",
                    ],
                    vec![None; 4],
                ),
            )
            .await?;

        let candidates = store
            .lexical_prefilter("alice", "staging password", 10)
            .await?;
        let ids: Vec<usize> = candidates.iter().map(|c| c.chunk.chunk_id).collect();
        assert_eq!(ids, vec![0, 2]);
        assert_eq!(candidates[0].lexical_score, 1.0);
        assert_eq!(candidates[1].lexical_score, 0.5);

        // No overlap: most recent chunks, all with a zero lexical score
        let fallback = store.lexical_prefilter("alice", "zebra", 3).await?;
        let ids: Vec<usize> = fallback.iter().map(|c| c.chunk.chunk_id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
        assert!(fallback.iter().all(|c| c.lexical_score == 0.0));

        // Punctuation-only query has no terms at all
        assert_eq!(store.lexical_prefilter("alice", "?!", 2).await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_agents_are_isolated() -> Result<()> {
        let store = SqliteIndexStore::open_memory().await?;
        store
            .rebuild("alice", &build("a", &["alice likes tea"], vec![Some(vec![1.0])]))
            .await?;
        store
            .rebuild("bob", &build("b", &["bob likes tea"], vec![Some(vec![2.0])]))
            .await?;

        let candidates = store.lexical_prefilter("bob", "tea", 5).await?;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].chunk.text, "bob likes tea");
        assert_eq!(store.get_embeddings("bob", &[0]).await?[&0], vec![2.0]);

        store.delete_index("alice").await?;
        assert!(store.load_metadata("alice").await?.is_none());
        assert!(store.list_chunks("alice").await?.is_empty());
        assert!(store.lexical_prefilter("alice", "tea", 5).await?.is_empty());
        assert_eq!(store.list_chunks("bob").await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_reset_schema_recovers_broken_tables() -> Result<()> {
        let temp_dir = tempdir()?;
        let store = SqliteIndexStore::open(&temp_dir.path().join("retrieval.db")).await?;
        store
            .rebuild("alice", &build("d", &["x"], vec![None]))
            .await?;

        sqlx::query("DROP TABLE index_meta")
            .execute(store.pool())
            .await?;
        assert!(store.load_metadata("alice").await.is_err());

        store.reset_schema().await?;
        assert!(store.load_metadata("alice").await?.is_none());
        assert!(store.list_chunks("alice").await?.is_empty());
        store.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_repair_keeps_other_agents() -> Result<()> {
        let store = SqliteIndexStore::open_memory().await?;
        store
            .rebuild("alice", &build("a", &["alice likes tea"], vec![Some(vec![1.0])]))
            .await?;
        store
            .rebuild("bob", &build("b", &["bob likes coffee"], vec![Some(vec![2.0])]))
            .await?;

        sqlx::query("DROP TABLE chunks_fts")
            .execute(store.pool())
            .await?;
        let err = store
            .lexical_prefilter("bob", "coffee", 5)
            .await
            .expect_err("the full-text table is gone");
        assert!(err.is_schema_damage());

        store.repair_schema("alice").await?;
        assert!(store.load_metadata("alice").await?.is_none());
        assert!(store.list_chunks("alice").await?.is_empty());

        let candidates = store.lexical_prefilter("bob", "coffee", 5).await?;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].lexical_score, 1.0);
        assert_eq!(store.get_embeddings("bob", &[0]).await?[&0], vec![2.0]);
        assert!(store.load_metadata("bob").await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_persists_across_reopen() -> Result<()> {
        let temp_dir = tempdir()?;
        let path = temp_dir.path().join("nested/storage/retrieval.db");
        {
            let store = SqliteIndexStore::open(&path).await?;
            store
                .rebuild("alice", &build("d", &["kept"], vec![Some(vec![0.5, 0.5])]))
                .await?;
            store.close().await;
        }
        let store = SqliteIndexStore::open(&path).await?;
        assert_eq!(store.path(), Some(path.as_path()));
        assert_eq!(store.list_chunks("alice").await?[0].text, "kept");
        assert_eq!(store.get_embeddings("alice", &[0]).await?[&0], vec![0.5, 0.5]);
        Ok(())
    }
}
