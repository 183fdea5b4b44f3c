//! Storage abstraction for per-agent indexes
//!
//! An index is the full chunk set of one memory document, the cached vector of
//! each chunk, a lexical prefilter over the chunk text and the metadata saying
//! which document version and settings produced it. [`IndexStore`] is the
//! contract; two formats implement it:
//!
//! - [`sqlite_store::SqliteIndexStore`]: SQLite with an FTS5 table, the primary
//!   format
//! - [`flat_file_store::FlatFileStore`]: the older single JSON file, used as the
//!   primary store by the `flat_file` engine and as a read-only fallback
//!
//! ## Architecture
//!
//! ```text
//!                ┌─ SqliteIndexStore (index_meta, chunks, chunk_embeddings, chunks_fts)
//! IndexStore ────┤
//!                └─ FlatFileStore (storage/memory_index/index.json)
//! ```

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

pub mod flat_file_store;
pub mod sqlite_store;

/// Version of the stored layout. Indexes written under another version are
/// rebuilt, never migrated in place.
pub const SCHEMA_VERSION: i64 = 1;

/// Everything that has to match for a stored index to be current
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFingerprint {
    pub content_digest: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embedding_provider: String,
    pub embedding_model: String,
}

/// Metadata of one agent's committed index
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexMetadata {
    pub agent_id: String,
    pub content_digest: String,
    pub schema_version: i64,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embedding_provider: String,
    pub embedding_model: String,
    pub chunk_count: usize,
    pub built_at: DateTime<Utc>,
}

impl IndexMetadata {
    /// Why this index doesn't match `expected`, or `None` when it does.
    pub fn staleness(&self, expected: &IndexFingerprint) -> Option<&'static str> {
        if self.schema_version != SCHEMA_VERSION {
            Some("schema version changed")
        } else if self.content_digest != expected.content_digest {
            Some("memory document changed")
        } else if self.chunk_size != expected.chunk_size
            || self.chunk_overlap != expected.chunk_overlap
        {
            Some("chunking settings changed")
        } else if self.embedding_provider != expected.embedding_provider
            || self.embedding_model != expected.embedding_model
        {
            Some("embedding provider changed")
        } else {
            None
        }
    }
}

/// One stored window of the memory document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredChunk {
    /// Position in the chunk sequence
    pub chunk_id: usize,
    pub source: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub text: String,
}

/// A chunk shortlisted by the lexical prefilter
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub chunk: StoredChunk,
    /// Share of distinct query terms found in the chunk, in `[0, 1]`
    pub lexical_score: f32,
}

/// A complete replacement index for one agent
#[derive(Debug, Clone)]
pub struct IndexBuild {
    pub fingerprint: IndexFingerprint,
    pub chunks: Vec<StoredChunk>,
    /// One slot per chunk; `None` where no vector could be obtained
    pub embeddings: Vec<Option<Vec<f32>>>,
}

impl IndexBuild {
    pub fn embedded_count(&self) -> usize {
        self.embeddings.iter().filter(|e| e.is_some()).count()
    }

    /// `provider:model` recorded next to each cached vector
    pub fn provider_model(&self) -> String {
        format!(
            "{}:{}",
            self.fingerprint.embedding_provider, self.fingerprint.embedding_model
        )
    }
}

/// Durable storage of per-agent indexes
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Metadata of the agent's committed index, if there is one
    async fn load_metadata(&self, agent_id: &str) -> Result<Option<IndexMetadata>>;

    /// Replace the agent's whole index atomically
    async fn rebuild(&self, agent_id: &str, build: &IndexBuild) -> Result<()>;

    /// Up to `k` chunks ranked by token overlap with `query_text`.
    ///
    /// When nothing overlaps, the `k` most recent chunks are returned instead so
    /// the semantic signal can still rank them.
    async fn lexical_prefilter(
        &self,
        agent_id: &str,
        query_text: &str,
        k: usize,
    ) -> Result<Vec<Candidate>>;

    /// Cached vectors for the given chunk ids; chunks without one are absent
    async fn get_embeddings(
        &self,
        agent_id: &str,
        chunk_ids: &[usize],
    ) -> Result<HashMap<usize, Vec<f32>>>;

    /// Every chunk of the agent's index, in sequence order
    async fn list_chunks(&self, agent_id: &str) -> Result<Vec<StoredChunk>>;

    /// Remove the agent's index
    async fn delete_index(&self, agent_id: &str) -> Result<()>;

    /// Recreate whatever part of the layout is missing and drop the agent's
    /// index, leaving other agents' indexes in place
    async fn repair_schema(&self, agent_id: &str) -> Result<()>;

    /// Drop and recreate the storage layout, losing every index in it
    async fn reset_schema(&self) -> Result<()>;

    /// Release connections and file handles
    async fn close(&self);
}
