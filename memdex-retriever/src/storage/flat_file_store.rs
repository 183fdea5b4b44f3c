//! [`IndexStore`] over a single legacy JSON file.
//!
//! One file holds one agent's index, so the `agent_id` arguments only label
//! the metadata. There is no FTS table; the prefilter ranks every chunk by its
//! containment score.

use super::{Candidate, IndexBuild, IndexMetadata, IndexStore, SCHEMA_VERSION, StoredChunk};
use crate::error::Result;
use crate::retrieval::legacy::LegacyIndex;
use crate::retrieval::lexical::{containment_score, query_terms};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FlatFileStore {
    path: PathBuf,
    defaults: (usize, usize),
}

impl FlatFileStore {
    /// `defaults` are the window settings assumed for files that don't record
    /// their own.
    pub fn new<P: Into<PathBuf>>(path: P, defaults: (usize, usize)) -> Self {
        Self {
            path: path.into(),
            defaults,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Option<LegacyIndex>> {
        LegacyIndex::read(&self.path).await
    }

    async fn load_chunks(&self) -> Result<Vec<StoredChunk>> {
        Ok(match self.load().await? {
            Some(legacy) => legacy.to_build(None, self.defaults).chunks,
            None => Vec::new(),
        })
    }
}

#[async_trait]
impl IndexStore for FlatFileStore {
    async fn load_metadata(&self, agent_id: &str) -> Result<Option<IndexMetadata>> {
        let Some(legacy) = self.load().await? else {
            return Ok(None);
        };
        let fp = legacy.to_build(None, self.defaults).fingerprint;
        Ok(Some(IndexMetadata {
            agent_id: agent_id.to_string(),
            content_digest: fp.content_digest,
            schema_version: SCHEMA_VERSION,
            chunk_size: fp.chunk_size,
            chunk_overlap: fp.chunk_overlap,
            embedding_provider: fp.embedding_provider,
            embedding_model: fp.embedding_model,
            chunk_count: legacy.chunks.len(),
            built_at: LegacyIndex::modified_at(&self.path).await?,
        }))
    }

    async fn rebuild(&self, _agent_id: &str, build: &IndexBuild) -> Result<()> {
        LegacyIndex::from_build(build).write_atomic(&self.path).await
    }

    async fn lexical_prefilter(
        &self,
        _agent_id: &str,
        query_text: &str,
        k: usize,
    ) -> Result<Vec<Candidate>> {
        let k = k.max(1);
        let terms = query_terms(query_text);
        let chunks = self.load_chunks().await?;

        let mut matched: Vec<Candidate> = chunks
            .iter()
            .filter_map(|chunk| {
                let lexical_score = containment_score(&terms, &chunk.text);
                (lexical_score > 0.0).then(|| Candidate {
                    chunk: chunk.clone(),
                    lexical_score,
                })
            })
            .collect();

        if matched.is_empty() {
            return Ok(chunks
                .into_iter()
                .rev()
                .take(k)
                .map(|chunk| Candidate {
                    chunk,
                    lexical_score: 0.0,
                })
                .collect());
        }

        matched.sort_by(|a, b| {
            b.lexical_score
                .total_cmp(&a.lexical_score)
                .then(a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
        });
        matched.truncate(k);
        Ok(matched)
    }

    async fn get_embeddings(
        &self,
        _agent_id: &str,
        chunk_ids: &[usize],
    ) -> Result<HashMap<usize, Vec<f32>>> {
        let Some(legacy) = self.load().await? else {
            return Ok(HashMap::new());
        };
        let vectors = legacy.vectors();
        Ok(chunk_ids
            .iter()
            .filter_map(|&id| {
                vectors
                    .get(id)
                    .cloned()
                    .flatten()
                    .map(|vector| (id, vector))
            })
            .collect())
    }

    async fn list_chunks(&self, _agent_id: &str) -> Result<Vec<StoredChunk>> {
        self.load_chunks().await
    }

    async fn delete_index(&self, _agent_id: &str) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn repair_schema(&self, agent_id: &str) -> Result<()> {
        self.delete_index(agent_id).await
    }

    async fn reset_schema(&self) -> Result<()> {
        self.delete_index("").await
    }

    async fn close(&self) {}
}
