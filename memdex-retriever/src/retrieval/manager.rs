//! Per-agent index lifecycle.
//!
//! [`IndexManager`] owns one [`AgentIndex`] per agent id and moves it through
//! `Stale -> Rebuilding -> Fresh`. A query first makes sure the index matches
//! the current memory document (rebuilding when it doesn't), then reads the
//! committed index:
//!
//! ```text
//! query ─> ensure fresh ─> embed query (best effort) ─> lexical prefilter
//!                                                     ─> cached vectors ─> Scorer
//! ```
//!
//! Rebuilds of one agent are serialized by its lock. A query that finds a
//! rebuild in flight doesn't wait for it; it reads the last committed index.

use super::index_state::IndexState;
use super::legacy;
use super::scorer::{ScoredResult, Scorer};
use crate::config::{MemdexConfig, StorageEngine};
use crate::document::{DocumentStore, validate_agent_id};
use crate::error::{Result, RetrievalError};
use crate::storage::flat_file_store::FlatFileStore;
use crate::storage::sqlite_store::SqliteIndexStore;
use crate::storage::{IndexBuild, IndexFingerprint, IndexMetadata, IndexStore, StoredChunk};
use memdex_context::ChunkSplitter;
use memdex_embed::EmbeddingGateway;
use serde::Serialize;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

/// Bookkeeping for one agent's index
#[derive(Debug)]
struct AgentIndex {
    agent_id: String,
    db_path: PathBuf,
    legacy_path: PathBuf,
    rebuild_lock: Mutex<()>,
    state: RwLock<IndexState>,
    /// Set by `invalidate`; forces a rebuild even if the digest matches
    dirty: AtomicBool,
    /// Set when reading the store hit a damaged layout; the next refresh
    /// repairs it
    corrupt: AtomicBool,
}

impl AgentIndex {
    fn new(agent_id: &str, workspace_root: &Path, config: &MemdexConfig) -> Self {
        let agent_dir = workspace_root.join(agent_id);
        Self {
            agent_id: agent_id.to_string(),
            db_path: config.storage.db_path_for(&agent_dir),
            legacy_path: config.storage.legacy_path_for(&agent_dir),
            rebuild_lock: Mutex::new(()),
            state: RwLock::new(IndexState::Stale),
            dirty: AtomicBool::new(false),
            corrupt: AtomicBool::new(false),
        }
    }

    async fn state(&self) -> IndexState {
        *self.state.read().await
    }

    async fn set_state(&self, state: IndexState) {
        *self.state.write().await = state;
    }
}

/// Point-in-time view of one agent's index
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub agent_id: String,
    pub state: IndexState,
    pub engine: String,
    /// Why the index is stale, when it is
    pub stale_reason: Option<String>,
    pub metadata: Option<IndexMetadata>,
    pub legacy_index_present: bool,
}

pub struct IndexManager {
    workspace_root: PathBuf,
    config: MemdexConfig,
    documents: Arc<dyn DocumentStore>,
    gateway: EmbeddingGateway,
    splitter: ChunkSplitter,
    scorer: Scorer,
    agents: RwLock<HashMap<String, Arc<AgentIndex>>>,
    /// Open SQLite stores by database path; agents sharing a database share
    /// one entry
    stores: Mutex<HashMap<PathBuf, Arc<dyn IndexStore>>>,
}

impl std::fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexManager")
            .field("workspace_root", &self.workspace_root)
            .field("engine", &self.config.storage.engine)
            .field("gateway", &self.gateway)
            .finish_non_exhaustive()
    }
}

impl IndexManager {
    /// Create a manager for agents living under `workspace_root`.
    ///
    /// `config` is validated again here so a hand-built configuration can't
    /// slip past the checks done at load time.
    pub fn new<P: Into<PathBuf>>(
        workspace_root: P,
        config: MemdexConfig,
        documents: Arc<dyn DocumentStore>,
        gateway: EmbeddingGateway,
    ) -> Result<Self> {
        config.validate()?;
        let splitter = config.splitter()?;
        let scorer = Scorer::new(
            config.retrieval.semantic_weight,
            config.retrieval.lexical_weight,
        );
        Ok(Self {
            workspace_root: workspace_root.into(),
            config,
            documents,
            gateway,
            splitter,
            scorer,
            agents: RwLock::new(HashMap::new()),
            stores: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &MemdexConfig {
        &self.config
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn default_top_k(&self) -> usize {
        self.config.retrieval.top_k
    }

    /// Retrieve up to `top_k` chunks of the agent's memory relevant to
    /// `query_text`, best first.
    ///
    /// Rebuilds the index first when it is stale. Embedding failures only
    /// reduce the ranking to lexical scores; storage failures are returned.
    pub async fn query(
        &self,
        agent_id: &str,
        query_text: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredResult>> {
        let agent = self.agent(agent_id).await?;
        let top_k = top_k.max(1);

        let store = match agent.rebuild_lock.try_lock() {
            Ok(guard) => self.refresh(&agent, guard).await?,
            Err(_) => {
                debug!(
                    "Rebuild in progress for agent {}, reading the committed index",
                    agent.agent_id
                );
                self.committed_store(&agent).await
            }
        };
        let Some(store) = store else {
            return Ok(Vec::new());
        };

        let query_vector = match self.gateway.embed(query_text).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!("{e}; ranking lexically");
                None
            }
        };

        match self
            .search(store.as_ref(), &agent, query_text, query_vector.as_deref(), top_k)
            .await
        {
            Ok(results) => Ok(results),
            Err(e) if !e.is_schema_damage() => Err(e),
            Err(e) => {
                warn!(
                    "{}",
                    RetrievalError::IndexCorrupt {
                        agent_id: agent.agent_id.clone(),
                        reason: e.to_string(),
                    }
                );
                agent.corrupt.store(true, Ordering::SeqCst);
                agent.set_state(IndexState::Stale).await;

                let guard = agent.rebuild_lock.lock().await;
                match self.refresh(&agent, guard).await? {
                    Some(store) => {
                        self.search(store.as_ref(), &agent, query_text, query_vector.as_deref(), top_k)
                            .await
                    }
                    None => Ok(Vec::new()),
                }
            }
        }
    }

    async fn search(
        &self,
        store: &dyn IndexStore,
        agent: &AgentIndex,
        query_text: &str,
        query_vector: Option<&[f32]>,
        top_k: usize,
    ) -> Result<Vec<ScoredResult>> {
        let k = top_k.max(self.config.storage.prefilter_k);
        let candidates = store
            .lexical_prefilter(&agent.agent_id, query_text, k)
            .await?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = match query_vector {
            Some(_) => {
                let ids: Vec<usize> = candidates.iter().map(|c| c.chunk.chunk_id).collect();
                store.get_embeddings(&agent.agent_id, &ids).await?
            }
            None => HashMap::new(),
        };

        let results = self.scorer.score(query_vector, candidates, &vectors, top_k);
        debug!(
            "Query for agent {} returned {} result(s)",
            agent.agent_id,
            results.len()
        );
        Ok(results)
    }

    /// Bring the agent's index up to date, waiting for a rebuild already in
    /// flight instead of starting a second one.
    ///
    /// Returns `Stale` without error when the memory document can't be read.
    pub async fn ensure_fresh(&self, agent_id: &str) -> Result<IndexState> {
        let agent = self.agent(agent_id).await?;
        let guard = agent.rebuild_lock.lock().await;
        self.refresh(&agent, guard).await?;
        Ok(agent.state().await)
    }

    /// Rebuild the agent's index even if it looks current.
    pub async fn rebuild(&self, agent_id: &str) -> Result<IndexState> {
        self.agent(agent_id)
            .await?
            .dirty
            .store(true, Ordering::SeqCst);
        self.ensure_fresh(agent_id).await
    }

    /// Mark the agent's index stale after its memory document was saved.
    pub async fn invalidate(&self, agent_id: &str) -> Result<()> {
        let agent = self.agent(agent_id).await?;
        agent.dirty.store(true, Ordering::SeqCst);
        // Leave a running rebuild's state alone; it will see the flag next time.
        let mut state = agent.state.write().await;
        if *state == IndexState::Fresh {
            *state = IndexState::Stale;
        }
        debug!("Invalidated index for agent {}", agent_id);
        Ok(())
    }

    /// Everything known about the agent's index, without rebuilding it.
    pub async fn status(&self, agent_id: &str) -> Result<IndexStatus> {
        let agent = self.agent(agent_id).await?;
        let legacy_index_present = tokio::fs::try_exists(&agent.legacy_path)
            .await
            .unwrap_or(false);

        let metadata = match self.store_for(&agent).await {
            Ok(store) => store.load_metadata(agent_id).await.unwrap_or_else(|e| {
                warn!("Cannot read index metadata for agent {}: {}", agent_id, e);
                None
            }),
            Err(e) => {
                warn!("Cannot open index for agent {}: {}", agent_id, e);
                None
            }
        };

        let stale_reason = match self.documents.digest(agent_id).await {
            Ok(digest) => {
                let expected = self.fingerprint(digest);
                if agent.dirty.load(Ordering::SeqCst) {
                    Some("memory document saved")
                } else {
                    match &metadata {
                        Some(meta) => meta.staleness(&expected),
                        None => Some("no index built"),
                    }
                }
            }
            Err(_) => Some("memory document unavailable"),
        };

        let state = if agent.rebuild_lock.try_lock().is_err() {
            IndexState::Rebuilding
        } else if stale_reason.is_none() {
            IndexState::Fresh
        } else {
            IndexState::Stale
        };
        if state != IndexState::Rebuilding {
            agent.set_state(state).await;
        }

        Ok(IndexStatus {
            agent_id: agent_id.to_string(),
            state,
            engine: self.config.storage.engine.to_string(),
            stale_reason: stale_reason.map(str::to_string),
            metadata,
            legacy_index_present,
        })
    }

    /// Chunks of the agent's committed index, without refreshing it.
    pub async fn chunks(&self, agent_id: &str) -> Result<Vec<StoredChunk>> {
        let agent = self.agent(agent_id).await?;
        let store = self.store_for(&agent).await?;
        store.list_chunks(agent_id).await
    }

    /// Import the agent's legacy flat-file index into the SQLite store.
    ///
    /// Returns the number of imported chunks, `None` when there is no legacy
    /// file or the `flat_file` engine already serves it directly. Any index
    /// already stored for the agent is replaced.
    pub async fn migrate_legacy(&self, agent_id: &str) -> Result<Option<usize>> {
        let agent = self.agent(agent_id).await?;
        if self.config.storage.engine == StorageEngine::FlatFile {
            info!("The flat_file engine reads the legacy index directly; nothing to migrate");
            return Ok(None);
        }

        let _guard = agent.rebuild_lock.lock().await;
        let store = self.open_store(&agent).await?;
        let current_digest = self.documents.digest(agent_id).await.ok();
        let imported = legacy::import_into(
            store.as_ref(),
            agent_id,
            &agent.legacy_path,
            current_digest.as_deref(),
            self.window(),
        )
        .await?;
        agent.set_state(IndexState::Stale).await;
        Ok(imported)
    }

    /// Forget the agent: drop its rows, its index files and its registry entry.
    ///
    /// A database shared with other agents is kept; only this agent's rows
    /// are deleted from it.
    pub async fn remove_agent(&self, agent_id: &str) -> Result<()> {
        validate_agent_id(agent_id)?;
        let agent = match self.agents.write().await.remove(agent_id) {
            Some(agent) => agent,
            None => Arc::new(AgentIndex::new(agent_id, &self.workspace_root, &self.config)),
        };
        let _guard = agent.rebuild_lock.lock().await;

        if self.config.storage.engine == StorageEngine::Sqlite {
            match self.store_for(&agent).await {
                Ok(store) => store.delete_index(agent_id).await?,
                Err(e) => warn!("Cannot open index for agent {}: {}", agent_id, e),
            }
            if !self.config.storage.is_shared_db() {
                self.discard_database(&agent).await?;
            }
        }
        remove_if_exists(&agent.legacy_path).await?;

        info!("Removed index for agent {}", agent_id);
        Ok(())
    }

    /// Close every open store.
    pub async fn close(&self) {
        let stores: Vec<Arc<dyn IndexStore>> =
            self.stores.lock().await.drain().map(|(_, s)| s).collect();
        for store in stores {
            store.close().await;
        }
    }

    async fn agent(&self, agent_id: &str) -> Result<Arc<AgentIndex>> {
        validate_agent_id(agent_id)?;
        if let Some(agent) = self.agents.read().await.get(agent_id) {
            return Ok(agent.clone());
        }
        let mut agents = self.agents.write().await;
        let agent = agents
            .entry(agent_id.to_string())
            .or_insert_with(|| {
                Arc::new(AgentIndex::new(agent_id, &self.workspace_root, &self.config))
            })
            .clone();
        Ok(agent)
    }

    fn window(&self) -> (usize, usize) {
        (self.splitter.size(), self.splitter.overlap())
    }

    fn fingerprint(&self, content_digest: String) -> IndexFingerprint {
        IndexFingerprint {
            content_digest,
            chunk_size: self.splitter.size(),
            chunk_overlap: self.splitter.overlap(),
            embedding_provider: self.gateway.provider_name().to_string(),
            embedding_model: self.gateway.model_name().to_string(),
        }
    }

    async fn store_for(&self, agent: &AgentIndex) -> Result<Arc<dyn IndexStore>> {
        match self.config.storage.engine {
            StorageEngine::FlatFile => Ok(Arc::new(FlatFileStore::new(
                &agent.legacy_path,
                self.window(),
            ))),
            StorageEngine::Sqlite => {
                let mut stores = self.stores.lock().await;
                if let Some(store) = stores.get(&agent.db_path) {
                    return Ok(store.clone());
                }
                let store: Arc<dyn IndexStore> =
                    Arc::new(SqliteIndexStore::open(&agent.db_path).await?);
                stores.insert(agent.db_path.clone(), store.clone());
                Ok(store)
            }
        }
    }

    /// Open the agent's store, replacing a database file that can't be opened.
    async fn open_store(&self, agent: &AgentIndex) -> Result<Arc<dyn IndexStore>> {
        match self.store_for(agent).await {
            Ok(store) => Ok(store),
            Err(e) if self.config.storage.engine == StorageEngine::Sqlite => {
                warn!(
                    "{}; recreating {}",
                    RetrievalError::IndexCorrupt {
                        agent_id: agent.agent_id.clone(),
                        reason: e.to_string(),
                    },
                    agent.db_path.display()
                );
                self.discard_database(agent).await?;
                self.store_for(agent).await
            }
            Err(e) => Err(e),
        }
    }

    /// Close and delete the agent's database file with its WAL companions.
    async fn discard_database(&self, agent: &AgentIndex) -> Result<()> {
        if let Some(store) = self.stores.lock().await.remove(&agent.db_path) {
            store.close().await;
        }
        for suffix in ["", "-wal", "-shm"] {
            let mut path = OsString::from(agent.db_path.as_os_str());
            path.push(suffix);
            remove_if_exists(Path::new(&path)).await?;
        }
        Ok(())
    }

    /// Metadata of the agent's index, repairing the layout when it is
    /// damaged. Transient read failures are returned as they are.
    async fn load_or_repair(
        &self,
        agent: &AgentIndex,
        store: Arc<dyn IndexStore>,
    ) -> Result<(Arc<dyn IndexStore>, Option<IndexMetadata>)> {
        let reason = if agent.corrupt.swap(false, Ordering::SeqCst) {
            "reading the index failed".to_string()
        } else {
            match store.load_metadata(&agent.agent_id).await {
                Ok(metadata) => return Ok((store, metadata)),
                Err(e) if e.is_schema_damage() => e.to_string(),
                Err(e) => return Err(e),
            }
        };

        warn!(
            "{}; repairing the schema",
            RetrievalError::IndexCorrupt {
                agent_id: agent.agent_id.clone(),
                reason,
            }
        );
        let store = self.repair(agent, store).await?;
        Ok((store, None))
    }

    /// Drop the agent's index and restore missing tables. Escalates to a
    /// full schema reset, then to a new database file, only when the lighter
    /// step fails.
    async fn repair(
        &self,
        agent: &AgentIndex,
        store: Arc<dyn IndexStore>,
    ) -> Result<Arc<dyn IndexStore>> {
        match store.repair_schema(&agent.agent_id).await {
            Ok(()) => return Ok(store),
            Err(e) => warn!("Schema repair failed ({}), resetting the schema", e),
        }
        if let Err(e) = store.reset_schema().await {
            warn!("Schema reset failed ({}), recreating the database", e);
            self.discard_database(agent).await?;
            return self.store_for(agent).await;
        }
        Ok(store)
    }

    /// The store a query should read when no refresh is possible: the
    /// committed index if there is one, else the legacy file if present.
    async fn committed_store(&self, agent: &AgentIndex) -> Option<Arc<dyn IndexStore>> {
        if let Ok(store) = self.store_for(agent).await {
            if let Ok(Some(_)) = store.load_metadata(&agent.agent_id).await {
                return Some(store);
            }
        }
        if tokio::fs::try_exists(&agent.legacy_path).await.unwrap_or(false) {
            info!(
                "Serving legacy index {} for agent {}",
                agent.legacy_path.display(),
                agent.agent_id
            );
            return Some(Arc::new(FlatFileStore::new(&agent.legacy_path, self.window())));
        }
        None
    }

    /// Check the agent's index against its document and rebuild it when
    /// stale. Returns the store to read, `None` when there is nothing to
    /// serve.
    ///
    /// Takes the rebuild guard so callers decide whether to wait for it.
    async fn refresh(
        &self,
        agent: &AgentIndex,
        _guard: MutexGuard<'_, ()>,
    ) -> Result<Option<Arc<dyn IndexStore>>> {
        let dirty = agent.dirty.swap(false, Ordering::SeqCst);

        let digest = match self.documents.digest(&agent.agent_id).await {
            Ok(digest) => digest,
            Err(e) => {
                warn!("{}; serving the last known index", e);
                if dirty {
                    agent.dirty.store(true, Ordering::SeqCst);
                }
                agent.set_state(IndexState::Stale).await;
                return Ok(self.committed_store(agent).await);
            }
        };

        let store = self.open_store(agent).await?;
        let (store, mut metadata) = self.load_or_repair(agent, store).await?;

        if metadata.is_none() && self.config.storage.engine == StorageEngine::Sqlite {
            match legacy::import_into(
                store.as_ref(),
                &agent.agent_id,
                &agent.legacy_path,
                Some(&digest),
                self.window(),
            )
            .await
            {
                Ok(Some(_)) => metadata = store.load_metadata(&agent.agent_id).await?,
                Ok(None) => {}
                Err(e) => warn!(
                    "Ignoring unreadable legacy index {}: {}",
                    agent.legacy_path.display(),
                    e
                ),
            }
        }

        let expected = self.fingerprint(digest);
        let reason = if dirty {
            Some("memory document saved")
        } else {
            match &metadata {
                Some(meta) => meta.staleness(&expected),
                None => Some("no index built"),
            }
        };
        let Some(reason) = reason else {
            agent.set_state(IndexState::Fresh).await;
            return Ok(Some(store));
        };

        info!("Rebuilding index for agent {}: {}", agent.agent_id, reason);
        agent.set_state(IndexState::Rebuilding).await;
        let outcome = match self.prepare_build(agent, expected).await {
            Ok(build) => self.commit(agent, store, &build).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(store) => {
                agent.set_state(IndexState::Fresh).await;
                Ok(Some(store))
            }
            Err(e) => {
                agent.set_state(IndexState::Stale).await;
                if dirty {
                    agent.dirty.store(true, Ordering::SeqCst);
                }
                Err(RetrievalError::rebuild_failed(&agent.agent_id, e))
            }
        }
    }

    /// Split and embed the agent's current document.
    async fn prepare_build(
        &self,
        agent: &AgentIndex,
        fingerprint: IndexFingerprint,
    ) -> Result<IndexBuild> {
        let text = self.documents.text(&agent.agent_id).await?;
        let source = self.documents.source(&agent.agent_id);
        let chunks: Vec<StoredChunk> = self
            .splitter
            .split(&text)
            .into_iter()
            .map(|chunk| StoredChunk {
                chunk_id: chunk.sequence,
                source: source.clone(),
                start_offset: chunk.start_offset,
                end_offset: chunk.end_offset,
                text: chunk.text,
            })
            .collect();

        let embeddings = if chunks.is_empty() {
            Vec::new()
        } else {
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            self.gateway.embed_batch(&texts).await
        };

        Ok(IndexBuild {
            fingerprint,
            chunks,
            embeddings,
        })
    }

    /// Write `build`, repairing a damaged layout and retrying once.
    async fn commit(
        &self,
        agent: &AgentIndex,
        store: Arc<dyn IndexStore>,
        build: &IndexBuild,
    ) -> Result<Arc<dyn IndexStore>> {
        let store = match store.rebuild(&agent.agent_id, build).await {
            Ok(()) => store,
            Err(e) if e.is_schema_damage() => {
                warn!(
                    "{}; repairing the schema and retrying",
                    RetrievalError::IndexCorrupt {
                        agent_id: agent.agent_id.clone(),
                        reason: e.to_string(),
                    }
                );
                let store = self.repair(agent, store).await?;
                store.rebuild(&agent.agent_id, build).await?;
                store
            }
            Err(e) => return Err(e),
        };
        info!(
            "Indexed {} chunk(s) for agent {} ({} with vectors)",
            build.chunks.len(),
            agent.agent_id,
            build.embedded_count()
        );
        Ok(store)
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
