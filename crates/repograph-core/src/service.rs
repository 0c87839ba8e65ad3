//! The public entry points: build/update a storage, then query or plan against it
//!
//! `RepoGraph` owns the configuration, the collaborators and the per-storage
//! coordination state. A pass holds the storage lock for its whole run and the
//! write half of the storage's commit gate while committing; `query` and
//! `plan` hold the read half, so they always see the last committed snapshot.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::Config;
use crate::domain::extraction::SyntaxParser;
use crate::domain::graph::{GraphStore, StoreStats};
use crate::domain::locking::{LockError, StorageLockManager};
use crate::domain::pipeline::{PassReport, StoreSynchronizer, UpdateOrchestrator};
use crate::domain::retrieval::{Answer, AnswerMode, Retriever};
use crate::embedding::{Embedder, HttpEmbedder};
use crate::error::{Error, Result};
use crate::infrastructure::{SqliteGraphStore, TreeSitterParser};
use crate::llm::{LanguageModel, RateLimiter, language_model};

/// Storage used when the caller does not name one
pub const DEFAULT_STORAGE: &str = "storage";

/// Check a storage name before it becomes a directory name
pub fn validate_storage_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidStorageName(name.to_string()))
    }
}

pub struct RepoGraph {
    config: Config,
    storage_root: PathBuf,
    parser: Arc<dyn SyntaxParser>,
    /// Document extraction and code summaries
    model: Arc<dyn LanguageModel>,
    /// Query and plan answers
    analysis_model: Arc<dyn LanguageModel>,
    embedder: Arc<dyn Embedder>,
    limiter: Arc<RateLimiter>,
    locks: StorageLockManager,
    gates: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl RepoGraph {
    /// Build with explicit collaborators; `model` serves every role until
    /// [`RepoGraph::with_analysis_model`] replaces the analysis one
    pub fn new(
        config: Config,
        parser: Arc<dyn SyntaxParser>,
        model: Arc<dyn LanguageModel>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::ConfigError(format!("{:#}", e)))?;
        let storage_root = config
            .storage
            .resolved_root()
            .map_err(|e| Error::ConfigError(format!("{:#}", e)))?;
        let limiter = Arc::new(RateLimiter::from_config(&config));

        Ok(Self {
            config,
            storage_root,
            parser,
            analysis_model: model.clone(),
            model,
            embedder,
            limiter,
            locks: StorageLockManager::new(),
            gates: Mutex::new(HashMap::new()),
        })
    }

    /// Build with the tree-sitter parser and the HTTP collaborators
    pub fn from_config(config: Config) -> Result<Self> {
        let extraction = language_model(&config.llm.extraction, &config.llm)?;
        let analysis = language_model(&config.llm.analysis, &config.llm)?;
        let embedder = HttpEmbedder::from_config(&config.embedding, &config.llm)?;
        let parser = TreeSitterParser::new().with_max_depth(config.pipeline.max_depth);
        Ok(Self::new(config, Arc::new(parser), extraction, Arc::new(embedder))?
            .with_analysis_model(analysis))
    }

    /// Answer `query` and `plan` with a different model than extraction
    pub fn with_analysis_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.analysis_model = model;
        self
    }

    /// Replace the rate limiter shared by every outbound call
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Arc::new(limiter);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Directory holding the files of `storage`
    pub fn storage_dir(&self, storage: &str) -> Result<PathBuf> {
        validate_storage_name(storage)?;
        Ok(self.storage_root.join(storage))
    }

    /// Run one incremental pass of `directory` into `storage`
    pub async fn build_or_update(&self, directory: &Path, storage: &str) -> Result<PassReport> {
        let storage_dir = self.storage_dir(storage)?;
        let root = directory
            .canonicalize()
            .map_err(|_| Error::PathNotFound(directory.to_path_buf()))?;
        if !root.is_dir() {
            return Err(Error::PathNotFound(directory.to_path_buf()));
        }

        let guard = self
            .locks
            .try_acquire(storage, &storage_dir)
            .map_err(|e| match e {
                LockError::Contention { .. } => Error::StorageLocked(storage.to_string()),
                other => Error::Lock(other),
            })?;
        debug!(storage, lock_id = %guard.id(), root = %root.display(), "Starting pass");

        let store: Arc<dyn GraphStore> = Arc::new(SqliteGraphStore::open(&storage_dir).await?);
        let synchronizer = StoreSynchronizer::new(store.clone(), self.gate(storage)?);
        let orchestrator = UpdateOrchestrator::new(
            &self.config,
            self.parser.clone(),
            self.model.clone(),
            self.embedder.clone(),
            self.limiter.clone(),
        )?;

        let report = orchestrator
            .run(&root, storage, store.as_ref(), &synchronizer)
            .await;
        guard.release();
        report
    }

    /// Answer a question from the committed graph of `storage`
    pub async fn query(&self, question: &str, storage: &str) -> Result<Answer> {
        self.answer(AnswerMode::Query, question, storage).await
    }

    /// Draft an implementation plan for a change request
    pub async fn plan(&self, change_request: &str, storage: &str) -> Result<Answer> {
        self.answer(AnswerMode::Plan, change_request, storage).await
    }

    /// Counts of what `storage` currently holds
    pub async fn stats(&self, storage: &str) -> Result<StoreStats> {
        let store = self.open_existing(storage).await?;
        let gate = self.gate(storage)?;
        let _read = gate.read().await;
        store.stats().await
    }

    async fn answer(&self, mode: AnswerMode, request: &str, storage: &str) -> Result<Answer> {
        let store = self.open_existing(storage).await?;
        let retriever = Retriever::new(
            &self.config.search,
            self.embedder.clone(),
            self.analysis_model.clone(),
            self.limiter.clone(),
        );

        let gate = self.gate(storage)?;
        let _read = gate.read().await;
        info!(storage, mode = ?mode, "Answering from committed graph");
        retriever.answer(&store, mode, request).await
    }

    /// Open a storage that has at least one committed pass
    async fn open_existing(&self, storage: &str) -> Result<SqliteGraphStore> {
        let storage_dir = self.storage_dir(storage)?;
        if !SqliteGraphStore::exists(&storage_dir) {
            return Err(Error::StorageNotFound(storage.to_string()));
        }
        let store = SqliteGraphStore::open(&storage_dir).await?;
        if !store.is_initialized().await? {
            return Err(Error::StorageNotFound(storage.to_string()));
        }
        Ok(store)
    }

    fn gate(&self, storage: &str) -> Result<Arc<RwLock<()>>> {
        let mut gates = self
            .gates
            .lock()
            .map_err(|_| Error::StorageSetup("commit gate registry poisoned".to_string()))?;
        Ok(gates
            .entry(storage.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone())
    }
}
