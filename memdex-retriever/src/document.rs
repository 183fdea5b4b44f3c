//! Access to each agent's memory document.
//!
//! The engine never writes the document; it only needs its text, a digest to
//! detect changes and a label to attribute results to.

use crate::error::{Result, RetrievalError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Source label attached to every result taken from the memory document
pub const DEFAULT_SOURCE: &str = "memory/MEMORY.md";

/// Content fingerprint of a memory document (blake3, hex encoded).
pub fn content_digest(text: &str) -> String {
    hex::encode(blake3::hash(text.as_bytes()).as_bytes())
}

/// Reject agent ids that are not a single, plain path component.
pub fn validate_agent_id(agent_id: &str) -> Result<()> {
    let valid = !agent_id.is_empty()
        && agent_id.len() <= 128
        && agent_id != "."
        && agent_id != ".."
        && agent_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(RetrievalError::InvalidAgentId {
            agent_id: agent_id.to_string(),
        })
    }
}

/// Owner of the memory documents
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Current text of the agent's memory document
    async fn text(&self, agent_id: &str) -> Result<String>;

    /// Digest of the current text; equal digests mean equal text
    async fn digest(&self, agent_id: &str) -> Result<String> {
        Ok(content_digest(&self.text(agent_id).await?))
    }

    /// Label identifying where the agent's chunks come from
    fn source(&self, _agent_id: &str) -> String {
        DEFAULT_SOURCE.to_string()
    }
}

/// Documents stored as `<root>/<agent_id>/memory/MEMORY.md`.
///
/// A missing file reads as an empty document.
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn memory_path(&self, agent_id: &str) -> Result<PathBuf> {
        validate_agent_id(agent_id)?;
        Ok(self.root.join(agent_id).join(DEFAULT_SOURCE))
    }

    /// Replace the document's text atomically (temp file + rename).
    ///
    /// Callers should follow a save with
    /// [`IndexManager::invalidate`](crate::retrieval::manager::IndexManager::invalidate).
    pub async fn write(&self, agent_id: &str, text: &str) -> Result<()> {
        let path = self.memory_path(agent_id)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("md.tmp");
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn text(&self, agent_id: &str) -> Result<String> {
        let path = self.memory_path(agent_id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(RetrievalError::DocumentUnavailable {
                agent_id: agent_id.to_string(),
                source: e,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    #[test]
    fn test_agent_id_validation() {
        for ok in ["alice", "agent-7", "team_a.bot"] {
            assert!(validate_agent_id(ok).is_ok(), "{ok}");
        }
        for bad in ["", ".", "..", "a/b", "../etc", "a b", "é"] {
            assert!(
                matches!(
                    validate_agent_id(bad),
                    Err(RetrievalError::InvalidAgentId { .. })
                ),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_digest_is_stable_and_sensitive() {
        let a = content_digest("likes tea");
        assert_eq!(a, content_digest("likes tea"));
        assert_ne!(a, content_digest("likes tea."));
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_fs_document_store() -> Result<()> {
        let temp_dir = tempdir()?;
        let store = FsDocumentStore::new(temp_dir.path());

        assert_eq!(store.text("alice").await?, "");
        assert_eq!(store.digest("alice").await?, content_digest(""));

        store.write("alice", "Prefers metric units.").await?;
        assert_eq!(store.text("alice").await?, "Prefers metric units.");
        assert!(temp_dir.path().join("alice/memory/MEMORY.md").exists());
        assert_eq!(store.source("alice"), "memory/MEMORY.md");

        assert!(store.text("../alice").await.is_err());
        Ok(())
    }
}
