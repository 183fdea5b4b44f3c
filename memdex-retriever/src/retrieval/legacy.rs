//! The older flat-file index format and its one-time import.
//!
//! Before the SQLite store existed, each agent's index was a single JSON file
//! holding the chunk texts and a parallel array of vectors:
//!
//! ```json
//! {
//!   "digest": "...", "chunk_size": 256, "chunk_overlap": 32,
//!   "source": "memory/MEMORY.md",
//!   "chunks": ["text", "..."],
//!   "embeddings": [[0.1, 0.2], []],
//!   "embedding_provider": "openai", "embedding_model": "text-embedding-3-small",
//!   "embedding_error": ""
//! }
//! ```
//!
//! Files written by other tools may miss fields or hold junk in `embeddings`;
//! both are tolerated.

use crate::document::DEFAULT_SOURCE;
use crate::error::Result;
use crate::storage::{IndexBuild, IndexFingerprint, IndexStore, StoredChunk};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

const DEFAULT_PROVIDER: &str = "openai";
const DEFAULT_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyIndex {
    pub digest: String,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub chunks: Vec<String>,
    pub source: Option<String>,
    pub embedding_provider: Option<String>,
    pub embedding_model: Option<String>,
    pub embeddings: Vec<serde_json::Value>,
    pub embedding_error: String,
}

/// `Some` only for a non-empty array of numbers.
fn parse_vector(value: &serde_json::Value) -> Option<Vec<f32>> {
    let items = value.as_array()?;
    if items.is_empty() {
        return None;
    }
    items
        .iter()
        .map(|v| v.as_f64().map(|x| x as f32))
        .collect()
}

impl LegacyIndex {
    /// Read the file at `path`; `None` when it doesn't exist.
    pub async fn read(path: &Path) -> Result<Option<Self>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Last modification time of the file at `path`.
    pub async fn modified_at(path: &Path) -> Result<DateTime<Utc>> {
        let modified = tokio::fs::metadata(path).await?.modified()?;
        Ok(DateTime::<Utc>::from(modified))
    }

    /// Write to `path` through a temporary file and a rename.
    pub async fn write_atomic(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut payload = serde_json::to_string_pretty(self)?;
        payload.push('\n');
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, payload).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    pub fn source(&self) -> &str {
        self.source.as_deref().unwrap_or(DEFAULT_SOURCE)
    }

    pub fn provider(&self) -> &str {
        self.embedding_provider.as_deref().unwrap_or(DEFAULT_PROVIDER)
    }

    pub fn model(&self) -> &str {
        self.embedding_model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// One slot per chunk.
    pub fn vectors(&self) -> Vec<Option<Vec<f32>>> {
        (0..self.chunks.len())
            .map(|idx| self.embeddings.get(idx).and_then(parse_vector))
            .collect()
    }

    /// Chunks with offsets reconstructed from the recorded window settings.
    pub fn stored_chunks(&self, chunk_size: usize, chunk_overlap: usize) -> Vec<StoredChunk> {
        let step = chunk_size.saturating_sub(chunk_overlap).max(1);
        self.chunks
            .iter()
            .enumerate()
            .map(|(idx, text)| {
                let start = idx * step;
                StoredChunk {
                    chunk_id: idx,
                    source: self.source().to_string(),
                    start_offset: start,
                    end_offset: start + text.chars().count(),
                    text: text.clone(),
                }
            })
            .collect()
    }

    /// Convert into an index build.
    ///
    /// Missing window settings default to `defaults`; an empty digest is
    /// replaced by `current_digest` when known.
    pub fn to_build(&self, current_digest: Option<&str>, defaults: (usize, usize)) -> IndexBuild {
        let chunk_size = self.chunk_size.unwrap_or(defaults.0);
        let chunk_overlap = self.chunk_overlap.unwrap_or(defaults.1);
        let content_digest = if self.digest.is_empty() {
            current_digest.unwrap_or_default().to_string()
        } else {
            self.digest.clone()
        };

        IndexBuild {
            fingerprint: IndexFingerprint {
                content_digest,
                chunk_size,
                chunk_overlap,
                embedding_provider: self.provider().to_string(),
                embedding_model: self.model().to_string(),
            },
            chunks: self.stored_chunks(chunk_size, chunk_overlap),
            embeddings: self.vectors(),
        }
    }

    /// The flat-file form of `build`.
    pub fn from_build(build: &IndexBuild) -> Self {
        let missing = build.chunks.len() - build.embedded_count();
        let embedding_error = if missing == 0 {
            String::new()
        } else {
            format!("{missing} of {} chunks have no vector", build.chunks.len())
        };
        let fp = &build.fingerprint;

        Self {
            digest: fp.content_digest.clone(),
            chunk_size: Some(fp.chunk_size),
            chunk_overlap: Some(fp.chunk_overlap),
            chunks: build.chunks.iter().map(|c| c.text.clone()).collect(),
            source: Some(
                build
                    .chunks
                    .first()
                    .map(|c| c.source.clone())
                    .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            ),
            embedding_provider: Some(fp.embedding_provider.clone()),
            embedding_model: Some(fp.embedding_model.clone()),
            embeddings: build
                .embeddings
                .iter()
                .map(|e| match e {
                    Some(v) => serde_json::Value::from(v.clone()),
                    None => serde_json::Value::Array(Vec::new()),
                })
                .collect(),
            embedding_error,
        }
    }
}

/// Import the legacy file at `legacy_path` into `store` for `agent_id`.
///
/// Returns the number of imported chunks, or `None` when there is no legacy
/// file. The file itself is left untouched.
pub async fn import_into(
    store: &dyn IndexStore,
    agent_id: &str,
    legacy_path: &Path,
    current_digest: Option<&str>,
    defaults: (usize, usize),
) -> Result<Option<usize>> {
    let Some(legacy) = LegacyIndex::read(legacy_path).await? else {
        return Ok(None);
    };
    let build = legacy.to_build(current_digest, defaults);
    store.rebuild(agent_id, &build).await?;
    info!(
        "Imported {} legacy chunks ({} with vectors) for agent {}",
        build.chunks.len(),
        build.embedded_count(),
        agent_id
    );
    Ok(Some(build.chunks.len()))
}
