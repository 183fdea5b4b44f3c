//! Engine configuration.
//!
//! Loaded once from TOML, overridden from the environment for provider
//! selection and secrets, then validated. Every field has a default, so an
//! empty file (or no file) is a valid configuration:
//!
//! ```toml
//! [retrieval]
//! enabled = true
//! chunk_size = 256
//! chunk_overlap = 32
//! semantic_weight = 0.7
//! lexical_weight = 0.3
//! top_k = 3
//!
//! [storage]
//! engine = "sqlite"            # or "flat_file"
//! db_path = "storage/retrieval.db"
//! legacy_index_path = "storage/memory_index/index.json"
//! prefilter_k = 20
//!
//! [embedding]
//! provider = "openai"          # openai | google_ai_studio | disabled
//! timeout_secs = 5
//! batch_size = 16
//! ```
//!
//! Relative storage paths are resolved against the agent's directory
//! (`<workspace_root>/<agent_id>/`). An absolute `db_path` makes every agent
//! share one database, keyed by agent id.

use crate::error::{Result, RetrievalError};
use memdex_context::ChunkSplitter;
use memdex_embed::EmbedConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MemdexConfig {
    pub retrieval: RetrievalConfig,
    pub storage: StorageConfig,
    pub embedding: EmbedConfig,
}

/// Chunking and scoring parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Whether callers should run retrieval at all. The engine itself doesn't
    /// consult this.
    pub enabled: bool,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub semantic_weight: f32,
    pub lexical_weight: f32,
    /// Results returned when a caller doesn't ask for a specific count
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chunk_size: memdex_context::DEFAULT_CHUNK_SIZE,
            chunk_overlap: memdex_context::DEFAULT_CHUNK_OVERLAP,
            semantic_weight: 0.7,
            lexical_weight: 0.3,
            top_k: 3,
        }
    }
}

/// Which on-disk format is the primary index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageEngine {
    /// SQLite with an FTS5 prefilter; the legacy file is imported once
    #[default]
    Sqlite,
    /// The legacy JSON file is the index
    FlatFile,
}

impl std::fmt::Display for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageEngine::Sqlite => write!(f, "sqlite"),
            StorageEngine::FlatFile => write!(f, "flat_file"),
        }
    }
}

impl std::str::FromStr for StorageEngine {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(StorageEngine::Sqlite),
            "flat_file" | "flat-file" | "json" => Ok(StorageEngine::FlatFile),
            _ => Err(format!(
                "Invalid storage engine: '{s}'. Valid values are: sqlite, flat_file"
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub engine: StorageEngine,
    pub db_path: PathBuf,
    pub legacy_index_path: PathBuf,
    /// Candidates shortlisted by the lexical prefilter before scoring
    pub prefilter_k: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            engine: StorageEngine::default(),
            db_path: PathBuf::from("storage/retrieval.db"),
            legacy_index_path: PathBuf::from("storage/memory_index/index.json"),
            prefilter_k: 20,
        }
    }
}

impl StorageConfig {
    /// Database file for the agent whose directory is `agent_dir`.
    pub fn db_path_for(&self, agent_dir: &Path) -> PathBuf {
        agent_dir.join(&self.db_path)
    }

    /// Legacy flat-file index for the agent whose directory is `agent_dir`.
    pub fn legacy_path_for(&self, agent_dir: &Path) -> PathBuf {
        agent_dir.join(&self.legacy_index_path)
    }

    /// Whether all agents share one database file.
    pub fn is_shared_db(&self) -> bool {
        self.db_path.is_absolute()
    }
}

impl MemdexConfig {
    /// Parse a TOML document and validate it. The environment is not consulted.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| RetrievalError::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` (defaults when `None`), apply environment overrides and
    /// validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: Self = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    RetrievalError::invalid_config(format!(
                        "cannot read {}: {e}",
                        path.display()
                    ))
                })?;
                toml::from_str(&content).map_err(|e| {
                    RetrievalError::invalid_config(format!("{}: {e}", path.display()))
                })?
            }
            None => Self::default(),
        };
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `EMBEDDING_PROVIDER`, model, base URL and API key variables.
    pub fn with_env_overrides(mut self) -> Self {
        self.embedding = self.embedding.with_env_overrides();
        self
    }

    /// Builder-style embedding configuration.
    pub fn with_embedding(mut self, embedding: EmbedConfig) -> Self {
        self.embedding = embedding;
        self
    }

    /// Builder-style storage engine selection.
    pub fn with_engine(mut self, engine: StorageEngine) -> Self {
        self.storage.engine = engine;
        self
    }

    /// Builder-style window configuration.
    pub fn with_chunking(mut self, chunk_size: usize, chunk_overlap: usize) -> Self {
        self.retrieval.chunk_size = chunk_size;
        self.retrieval.chunk_overlap = chunk_overlap;
        self
    }

    /// The window splitter described by this configuration.
    pub fn splitter(&self) -> Result<ChunkSplitter> {
        ChunkSplitter::new(self.retrieval.chunk_size, self.retrieval.chunk_overlap)
            .map_err(|e| RetrievalError::invalid_config(e.to_string()))
    }

    /// Check every constraint the types can't express.
    pub fn validate(&self) -> Result<()> {
        self.splitter()?;

        let r = &self.retrieval;
        for (name, weight) in [
            ("semantic_weight", r.semantic_weight),
            ("lexical_weight", r.lexical_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(RetrievalError::invalid_config(format!(
                    "{name} must be a finite, non-negative number (got {weight})"
                )));
            }
        }
        if r.lexical_weight == 0.0 && r.semantic_weight == 0.0 {
            return Err(RetrievalError::invalid_config(
                "semantic_weight and lexical_weight can't both be zero",
            ));
        }
        if r.top_k == 0 {
            return Err(RetrievalError::invalid_config("top_k must be at least 1"));
        }
        if self.storage.prefilter_k == 0 {
            return Err(RetrievalError::invalid_config(
                "prefilter_k must be at least 1",
            ));
        }
        if self.storage.legacy_index_path.as_os_str().is_empty()
            || self.storage.db_path.as_os_str().is_empty()
        {
            return Err(RetrievalError::invalid_config(
                "storage paths must not be empty",
            ));
        }
        self.embedding
            .validate()
            .map_err(|e| RetrievalError::invalid_config(e.to_string()))
    }
}
