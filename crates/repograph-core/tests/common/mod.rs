//! Shared fixtures: temporary repositories and scripted collaborators

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use repograph_core::config::Config;
use repograph_core::domain::graph::{Entity, GraphState, GraphStore};
use repograph_core::domain::prompts::EXTRACTION_SYSTEM_PROMPT;
use repograph_core::embedding::{Embedder, EmbeddingInput};
use repograph_core::infrastructure::{SqliteGraphStore, TreeSitterParser};
use repograph_core::llm::{
    CollaboratorError, CompletionRequest, LanguageModel, RateLimiter, TransientKind,
};
use repograph_core::RepoGraph;
use tempfile::TempDir;

pub const DIMENSIONS: usize = 64;
/// Axes 0..4 are reserved for hand-placed vectors
const RESERVED_AXES: usize = 4;

/// Unit vector on `axis`
pub fn unit(axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; DIMENSIONS];
    v[axis] = 1.0;
    v
}

/// Vector whose cosine similarity with `unit(axis)` is `cos`
pub fn near(axis: usize, cos: f32) -> Vec<f32> {
    let mut v = vec![0.0; DIMENSIONS];
    v[axis] = cos;
    v[axis + 1] = (1.0 - cos * cos).max(0.0).sqrt();
    v
}

/// Embeds by the first line of the text
///
/// Texts whose first line was registered with [`FixedEmbedder::with`] get
/// that vector. Any other first line gets a fresh one-hot axis, so unrelated
/// items are orthogonal.
pub struct FixedEmbedder {
    fixed: HashMap<String, Vec<f32>>,
    assigned: Mutex<HashMap<String, usize>>,
    calls: AtomicUsize,
    failing: Vec<String>,
    /// Calls left that fail with a transient error
    flaky: AtomicUsize,
}

impl FixedEmbedder {
    pub fn new() -> Self {
        Self {
            fixed: HashMap::new(),
            assigned: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            failing: Vec::new(),
            flaky: AtomicUsize::new(0),
        }
    }

    /// Fail permanently on any call containing a text whose first line is `first_line`
    pub fn failing_on(mut self, first_line: &str) -> Self {
        self.failing.push(first_line.to_string());
        self
    }

    /// Fail the next `times` calls with a transient error
    pub fn flaky(self, times: usize) -> Self {
        self.flaky.store(times, Ordering::SeqCst);
        self
    }

    /// Transient failures not yet served
    pub fn flaky_left(&self) -> usize {
        self.flaky.load(Ordering::SeqCst)
    }

    pub fn with(mut self, first_line: &str, vector: Vec<f32>) -> Self {
        self.fixed.insert(first_line.to_string(), vector);
        self
    }

    /// Number of inputs embedded so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn key(text: &str) -> String {
        text.lines().next().unwrap_or("").trim().to_string()
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let key = Self::key(text);
        if let Some(vector) = self.fixed.get(&key) {
            return vector.clone();
        }
        let mut assigned = self.assigned.lock().unwrap();
        let next = RESERVED_AXES + assigned.len() % (DIMENSIONS - RESERVED_AXES);
        let axis = *assigned.entry(key).or_insert(next);
        unit(axis)
    }
}

#[async_trait]
impl Embedder for FixedEmbedder {
    fn model_name(&self) -> &str {
        "fixed"
    }

    fn dimensions(&self) -> usize {
        DIMENSIONS
    }

    async fn embed(&self, inputs: &[EmbeddingInput]) -> Result<Vec<Vec<f32>>, CollaboratorError> {
        let flaky = self
            .flaky
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if flaky.is_ok() {
            return Err(CollaboratorError::transient(TransientKind::Unavailable, "scripted outage"));
        }
        if inputs.iter().any(|input| self.failing.contains(&Self::key(&input.text))) {
            return Err(CollaboratorError::permanent("scripted rejection"));
        }
        self.calls.fetch_add(inputs.len(), Ordering::SeqCst);
        Ok(inputs.iter().map(|input| self.vector_for(&input.text)).collect())
    }
}

/// Language model that answers extraction prompts from a script
///
/// An extraction prompt containing a registered needle gets the matching
/// JSON; other extraction prompts get an empty graph. Any other prompt is
/// answered with a fixed text.
pub struct ScriptedModel {
    documents: Vec<(String, String)>,
    failing: Vec<String>,
    delay: Option<Duration>,
    answers: AtomicUsize,
}

pub const SCRIPTED_ANSWER: &str = "UserRepository persists users.";

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            documents: Vec::new(),
            failing: Vec::new(),
            delay: None,
            answers: AtomicUsize::new(0),
        }
    }

    pub fn on(mut self, needle: &str, response: &str) -> Self {
        self.documents.push((needle.to_string(), response.to_string()));
        self
    }

    /// Answer a single entity for chunks containing `needle`
    pub fn entity(self, needle: &str, name: &str, category: &str, description: &str) -> Self {
        let response = serde_json::json!({
            "entities": [{"name": name, "type": category, "description": description}],
            "relationships": []
        });
        self.on(needle, &response.to_string())
    }

    /// Fail permanently on chunks containing `needle`
    pub fn failing_on(mut self, needle: &str) -> Self {
        self.failing.push(needle.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn answers(&self) -> usize {
        self.answers.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, CollaboratorError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if request.system.as_deref() != Some(EXTRACTION_SYSTEM_PROMPT) {
            self.answers.fetch_add(1, Ordering::SeqCst);
            return Ok(SCRIPTED_ANSWER.to_string());
        }
        if self.failing.iter().any(|n| request.prompt.contains(n.as_str())) {
            return Err(CollaboratorError::permanent("scripted failure"));
        }
        Ok(self
            .documents
            .iter()
            .find(|(needle, _)| request.prompt.contains(needle.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| r#"{"entities": [], "relationships": []}"#.to_string()))
    }
}

/// A temporary repository plus a temporary storage root
pub struct Harness {
    pub repo: TempDir,
    pub storage_root: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            repo: TempDir::new().unwrap(),
            storage_root: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> PathBuf {
        self.repo.path().canonicalize().unwrap()
    }

    /// Absolute path string as recorded in the graph
    pub fn abs(&self, relative: &str) -> String {
        self.root().join(relative).to_string_lossy().to_string()
    }

    pub fn write(&self, relative: &str, content: &str) {
        let path = self.repo.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    pub fn remove(&self, relative: &str) {
        std::fs::remove_file(self.repo.path().join(relative)).unwrap();
    }

    /// Default configuration pointed at this harness' storage root
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.storage.root_dir = Some(self.storage_root.path().to_path_buf());
        config
    }

    pub fn graph(
        &self,
        config: Config,
        model: Arc<dyn LanguageModel>,
        embedder: Arc<dyn Embedder>,
    ) -> RepoGraph {
        RepoGraph::new(config, Arc::new(TreeSitterParser::new()), model, embedder)
            .unwrap()
            .with_rate_limiter(RateLimiter::unpaced(4))
    }

    pub fn storage_dir(&self, storage: &str) -> PathBuf {
        self.storage_root.path().join(storage)
    }

    /// Committed graph of `storage`
    pub async fn state(&self, storage: &str) -> GraphState {
        let store = SqliteGraphStore::open(&self.storage_dir(storage)).await.unwrap();
        store.load_state().await.unwrap()
    }
}

pub fn entity_named<'a>(state: &'a GraphState, name: &str) -> Vec<&'a Entity> {
    state.entities.values().filter(|e| e.name == name).collect()
}

/// Entity content without commit bookkeeping, for cross-run comparison
pub fn snapshot(state: &GraphState) -> Vec<(String, String, String, Vec<String>)> {
    state
        .entities
        .values()
        .map(|e| {
            (
                e.id.clone(),
                e.name.clone(),
                e.description.clone(),
                e.source_paths.iter().cloned().collect(),
            )
        })
        .collect()
}
