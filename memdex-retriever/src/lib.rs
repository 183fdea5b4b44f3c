//! memdex-retriever: per-agent memory retrieval
//!
//! Each agent keeps a free-form memory document (`memory/MEMORY.md`). This
//! crate cuts it into overlapping windows, caches a vector per window and, for
//! every chat turn, returns the few windows most relevant to the user's
//! message. Ranking blends cosine similarity with lexical overlap and falls
//! back to lexical overlap alone when no embedding provider is reachable.
//!
//! ## Key Modules
//!
//! - **[`retrieval`]**: Index lifecycle ([`IndexManager`]), scoring and the
//!   legacy flat-file format
//! - **[`storage`]**: Storage abstraction with SQLite and flat-file
//!   implementations
//! - **[`document`]**: Access to the memory documents
//! - **[`config`]**: TOML configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use memdex_embed::EmbeddingGateway;
//! use memdex_retriever::{FsDocumentStore, IndexManager, MemdexConfig, render_context};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = MemdexConfig::load(None)?;
//! let gateway = EmbeddingGateway::from_config(&config.embedding)?;
//! let documents = Arc::new(FsDocumentStore::new("workspace"));
//! let manager = IndexManager::new("workspace", config, documents, gateway)?;
//!
//! let results = manager.query("alice", "when does the staging password rotate?", 3).await?;
//! println!("{}", render_context(&results));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! MEMORY.md → ChunkSplitter → EmbeddingGateway → IndexStore (SQLite | JSON)
//!                                                     ↓
//!           query → EmbeddingGateway → lexical prefilter → Scorer → results
//! ```

pub mod config;
pub mod document;
pub mod error;
pub mod retrieval;
pub mod storage;

pub use config::{MemdexConfig, RetrievalConfig, StorageConfig, StorageEngine};
pub use document::{DocumentStore, FsDocumentStore, content_digest};
pub use error::{Result, RetrievalError};
pub use retrieval::context::render_context;
pub use retrieval::index_state::IndexState;
pub use retrieval::manager::{IndexManager, IndexStatus};
pub use retrieval::scorer::{ScoredResult, Scorer};
