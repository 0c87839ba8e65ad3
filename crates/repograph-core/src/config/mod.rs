//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

/// Repograph configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub merge: MergeConfig,
    pub rate_limit: RateLimitConfig,
    pub files: FilesConfig,
    pub extraction: ExtractionConfig,
    pub search: SearchConfig,
    pub storage: StorageConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum simultaneous outbound collaborator calls
    pub parallel_num: usize,
    pub chunk_max_tokens: usize,
    /// Maximum syntax-tree depth visited during code extraction
    pub max_depth: usize,
    pub embedding_batch_size: usize,
}

/// Which text of an entity is embedded for similarity search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityText {
    Name,
    NameAndDescription,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub enabled: bool,
    pub threshold: f32,
    /// Nearest neighbors retrieved per code entity
    pub neighbors: usize,
    pub min_name_length: usize,
    pub max_name_length: usize,
    pub exclude_private: bool,
    pub magic_methods: Vec<String>,
    pub generic_terms: Vec<String>,
    pub test_terms: Vec<String>,
    /// Wildcard patterns (`*`, `?`) or exact names
    pub custom_patterns: Vec<String>,
    pub embedding_input: EntityText,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub min_interval_secs: f64,
    /// Wait applied after a rate-limit response
    pub error_wait_secs: f64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    pub document_extensions: Vec<String>,
    pub special_file_names: Vec<String>,
    pub exclude: Vec<String>,
    pub max_file_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Categories the document extractor is asked to look for
    pub entity_categories: Vec<String>,
    /// Ask the LLM for a natural-language summary of each code entity
    pub summarize_code: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub top_k: usize,
    pub max_total_tokens: usize,
    pub max_entity_tokens: usize,
    pub max_relation_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one subdirectory per storage name
    pub root_dir: Option<PathBuf>,
}

/// Chat API a language model is reached through
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LlmProvider {
    /// OpenAI or any server speaking its chat completions API
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
        }
    }

    /// Environment variables holding the API key, in lookup order
    pub fn key_variables(&self) -> &'static [&'static str] {
        match self {
            Self::OpenAi => &["REPOGRAPH_API_KEY", "OPENAI_API_KEY"],
            Self::Anthropic => &["REPOGRAPH_ANTHROPIC_API_KEY", "ANTHROPIC_API_KEY"],
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(anyhow!(
                "Unknown LLM provider '{}'. Use 'openai' or 'anthropic'.",
                other
            )),
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One language model role: graph construction or analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: LlmProvider,
    /// Falls back to the provider's public endpoint
    pub base_url: Option<String>,
    pub model: String,
    /// Output token cap per completion
    pub max_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    #[serde(skip)]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub timeout_secs: u64,
    /// Document extraction and code summaries
    pub extraction: ModelConfig,
    /// Answers for query and plan
    pub analysis: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub dimensions: usize,
    pub timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parallel_num: 3,
            chunk_max_tokens: 2048,
            max_depth: 30,
            embedding_batch_size: 32,
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.95,
            neighbors: 10,
            min_name_length: 2,
            max_name_length: 50,
            exclude_private: true,
            magic_methods: to_strings(&[
                "__init__", "__new__", "__del__", "__repr__", "__str__", "__bytes__",
                "__format__", "__lt__", "__le__", "__eq__", "__ne__", "__gt__", "__ge__",
                "__hash__", "__bool__", "__getattr__", "__getattribute__", "__setattr__",
                "__delattr__", "__dir__", "__get__", "__set__", "__delete__", "__call__",
                "__len__", "__getitem__", "__setitem__", "__delitem__", "__iter__",
                "__next__", "__reversed__", "__contains__", "__enter__", "__exit__",
                "__await__", "__aiter__", "__anext__", "__aenter__", "__aexit__",
            ]),
            generic_terms: to_strings(&[
                "data", "result", "value", "item", "element", "object", "instance", "index",
                "key", "name", "text", "string", "number", "count", "size", "length",
                "width", "height", "temp", "tmp", "test", "example", "sample", "demo",
                "main", "app", "init", "config", "util", "helper", "manager", "handler",
                "controller", "service", "get", "set", "new", "default",
            ]),
            test_terms: to_strings(&[
                "foo", "bar", "baz", "qux", "spam", "eggs", "hello", "world", "mock",
                "stub", "fake", "dummy",
            ]),
            custom_patterns: Vec::new(),
            embedding_input: EntityText::NameAndDescription,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: 1.0,
            error_wait_secs: 3.0,
            max_retries: 3,
            backoff_base_ms: 1000,
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            document_extensions: to_strings(&["txt", "md", "rst"]),
            special_file_names: to_strings(&["readme", "changelog"]),
            exclude: to_strings(&[
                "__pycache__", ".git", ".github", ".venv", "node_modules", ".DS_Store",
                "Thumbs.db", "robots.txt", "bac", "backup", "temp", "tmp",
            ]),
            max_file_bytes: 4 * 1024 * 1024,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            entity_categories: to_strings(&[
                "organization", "person", "location", "event", "concept", "component",
                "class_name", "function_name", "method_name",
            ]),
            summarize_code: false,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 40,
            max_total_tokens: 30_000,
            max_entity_tokens: 6_000,
            max_relation_tokens: 8_000,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAi,
            base_url: None,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 4096,
        }
    }
}

impl ModelConfig {
    pub fn endpoint(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            temperature: 0.0,
            timeout_secs: 120,
            extraction: ModelConfig::default(),
            analysis: ModelConfig {
                max_tokens: 8192,
                ..ModelConfig::default()
            },
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            timeout_secs: 60,
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl LlmConfig {
    /// API key for `provider`, read from the environment only
    pub fn resolved_api_key(&self, provider: LlmProvider) -> anyhow::Result<Option<String>> {
        self.enforce_env_only()?;

        Ok(provider
            .key_variables()
            .iter()
            .find_map(|name| env::var(name).ok().filter(|v| !v.trim().is_empty())))
    }

    /// Resolved key, or a configuration error naming the variables to set
    pub fn require_api_key(&self, provider: LlmProvider) -> anyhow::Result<String> {
        self.resolved_api_key(provider)?.ok_or_else(|| {
            anyhow!(
                "No API key for provider '{}'. Set {}.",
                provider,
                provider.key_variables().join(" or ")
            )
        })
    }

    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.api_key.is_some() {
            return Err(anyhow!(
                "API keys must be provided via environment variables, not stored in configuration"
            ));
        }
        Ok(())
    }
}

impl StorageConfig {
    /// Resolve the storage root: explicit setting, then `REPOGRAPH_STORAGE_DIR`
    pub fn resolved_root(&self) -> anyhow::Result<PathBuf> {
        if let Some(dir) = &self.root_dir {
            return Ok(dir.clone());
        }
        if let Ok(dir) = env::var("REPOGRAPH_STORAGE_DIR") {
            return Ok(PathBuf::from(dir));
        }
        Ok(dirs::data_dir()
            .ok_or_else(|| anyhow!("Could not determine data directory"))?
            .join("repograph")
            .join("storages"))
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("REPOGRAPH_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("repograph")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or fall back to defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.llm.enforce_env_only()?;

        if !(self.merge.threshold > 0.0 && self.merge.threshold <= 1.0) {
            return Err(anyhow!(
                "merge.threshold must be in (0, 1], got {}",
                self.merge.threshold
            ));
        }
        if self.pipeline.parallel_num == 0 {
            return Err(anyhow!("pipeline.parallel_num must be at least 1"));
        }
        if self.pipeline.chunk_max_tokens == 0 {
            return Err(anyhow!("pipeline.chunk_max_tokens must be at least 1"));
        }
        if self.pipeline.max_depth == 0 {
            return Err(anyhow!("pipeline.max_depth must be at least 1"));
        }
        if self.pipeline.embedding_batch_size == 0 {
            return Err(anyhow!("pipeline.embedding_batch_size must be at least 1"));
        }
        for (role, model) in [("extraction", &self.llm.extraction), ("analysis", &self.llm.analysis)] {
            if model.max_tokens == 0 {
                return Err(anyhow!("llm.{}.max_tokens must be at least 1", role));
            }
            if model.model.trim().is_empty() {
                return Err(anyhow!("llm.{}.model must not be empty", role));
            }
        }
        if self.merge.min_name_length > self.merge.max_name_length {
            return Err(anyhow!(
                "merge.min_name_length ({}) exceeds merge.max_name_length ({})",
                self.merge.min_name_length,
                self.merge.max_name_length
            ));
        }
        for pattern in &self.merge.custom_patterns {
            globset::Glob::new(pattern)
                .with_context(|| format!("Invalid merge.custom_patterns entry: {}", pattern))?;
        }
        for pattern in &self.files.exclude {
            globset::Glob::new(pattern)
                .with_context(|| format!("Invalid files.exclude entry: {}", pattern))?;
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "pipeline.parallel_num" => Ok(self.pipeline.parallel_num.to_string()),
            "pipeline.chunk_max_tokens" => Ok(self.pipeline.chunk_max_tokens.to_string()),
            "pipeline.max_depth" => Ok(self.pipeline.max_depth.to_string()),
            "pipeline.embedding_batch_size" => Ok(self.pipeline.embedding_batch_size.to_string()),

            "merge.enabled" => Ok(self.merge.enabled.to_string()),
            "merge.threshold" => Ok(self.merge.threshold.to_string()),
            "merge.neighbors" => Ok(self.merge.neighbors.to_string()),
            "merge.min_name_length" => Ok(self.merge.min_name_length.to_string()),
            "merge.max_name_length" => Ok(self.merge.max_name_length.to_string()),
            "merge.exclude_private" => Ok(self.merge.exclude_private.to_string()),
            "merge.generic_terms" => Ok(self.merge.generic_terms.join(", ")),
            "merge.test_terms" => Ok(self.merge.test_terms.join(", ")),
            "merge.magic_methods" => Ok(self.merge.magic_methods.join(", ")),
            "merge.custom_patterns" => Ok(self.merge.custom_patterns.join(", ")),

            "rate_limit.min_interval_secs" => Ok(self.rate_limit.min_interval_secs.to_string()),
            "rate_limit.error_wait_secs" => Ok(self.rate_limit.error_wait_secs.to_string()),
            "rate_limit.max_retries" => Ok(self.rate_limit.max_retries.to_string()),

            "files.exclude" => Ok(self.files.exclude.join(", ")),
            "files.document_extensions" => Ok(self.files.document_extensions.join(", ")),

            "extraction.entity_categories" => Ok(self.extraction.entity_categories.join(", ")),
            "extraction.summarize_code" => Ok(self.extraction.summarize_code.to_string()),

            "search.top_k" => Ok(self.search.top_k.to_string()),

            "llm.extraction.provider" => Ok(self.llm.extraction.provider.to_string()),
            "llm.extraction.model" => Ok(self.llm.extraction.model.clone()),
            "llm.extraction.base_url" => Ok(self.llm.extraction.endpoint().to_string()),
            "llm.extraction.max_tokens" => Ok(self.llm.extraction.max_tokens.to_string()),
            "llm.analysis.provider" => Ok(self.llm.analysis.provider.to_string()),
            "llm.analysis.model" => Ok(self.llm.analysis.model.clone()),
            "llm.analysis.base_url" => Ok(self.llm.analysis.endpoint().to_string()),
            "llm.analysis.max_tokens" => Ok(self.llm.analysis.max_tokens.to_string()),
            "embedding.model" => Ok(self.embedding.model.clone()),
            "embedding.base_url" => Ok(self.embedding.base_url.clone()),

            _ => Err(anyhow!("Unknown configuration key: {}", key)),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "pipeline.parallel_num" => self.pipeline.parallel_num = parse_value(key, value)?,
            "pipeline.chunk_max_tokens" => {
                self.pipeline.chunk_max_tokens = parse_value(key, value)?
            }
            "pipeline.max_depth" => self.pipeline.max_depth = parse_value(key, value)?,
            "pipeline.embedding_batch_size" => {
                self.pipeline.embedding_batch_size = parse_value(key, value)?
            }

            "merge.enabled" => self.merge.enabled = parse_value(key, value)?,
            "merge.threshold" => self.merge.threshold = parse_value(key, value)?,
            "merge.neighbors" => self.merge.neighbors = parse_value(key, value)?,
            "merge.min_name_length" => self.merge.min_name_length = parse_value(key, value)?,
            "merge.max_name_length" => self.merge.max_name_length = parse_value(key, value)?,
            "merge.exclude_private" => self.merge.exclude_private = parse_value(key, value)?,
            "merge.generic_terms" => self.merge.generic_terms = parse_list(value),
            "merge.test_terms" => self.merge.test_terms = parse_list(value),
            "merge.magic_methods" => self.merge.magic_methods = parse_list(value),
            "merge.custom_patterns" => self.merge.custom_patterns = parse_list(value),

            "rate_limit.min_interval_secs" => {
                self.rate_limit.min_interval_secs = parse_value(key, value)?
            }
            "rate_limit.error_wait_secs" => {
                self.rate_limit.error_wait_secs = parse_value(key, value)?
            }
            "rate_limit.max_retries" => self.rate_limit.max_retries = parse_value(key, value)?,

            "files.exclude" => self.files.exclude = parse_list(value),
            "files.document_extensions" => self.files.document_extensions = parse_list(value),

            "extraction.entity_categories" => {
                self.extraction.entity_categories = parse_list(value)
            }
            "extraction.summarize_code" => {
                self.extraction.summarize_code = parse_value(key, value)?
            }

            "search.top_k" => self.search.top_k = parse_value(key, value)?,

            "llm.extraction.provider" => self.llm.extraction.provider = LlmProvider::parse(value)?,
            "llm.extraction.model" => self.llm.extraction.model = value.to_string(),
            "llm.extraction.base_url" => self.llm.extraction.base_url = Some(value.to_string()),
            "llm.extraction.max_tokens" => {
                self.llm.extraction.max_tokens = parse_value(key, value)?
            }
            "llm.analysis.provider" => self.llm.analysis.provider = LlmProvider::parse(value)?,
            "llm.analysis.model" => self.llm.analysis.model = value.to_string(),
            "llm.analysis.base_url" => self.llm.analysis.base_url = Some(value.to_string()),
            "llm.analysis.max_tokens" => self.llm.analysis.max_tokens = parse_value(key, value)?,
            "embedding.model" => self.embedding.model = value.to_string(),
            "embedding.base_url" => self.embedding.base_url = value.to_string(),

            "llm.api_key" | "api_key" => {
                return Err(anyhow!(
                    "API keys cannot be stored in config. Set REPOGRAPH_API_KEY, OPENAI_API_KEY or ANTHROPIC_API_KEY instead."
                ));
            }

            _ => return Err(anyhow!("Unknown configuration key: {}", key)),
        }

        self.validate()
    }

    /// List all configuration values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        const KEYS: &[&str] = &[
            "pipeline.parallel_num",
            "pipeline.chunk_max_tokens",
            "pipeline.max_depth",
            "pipeline.embedding_batch_size",
            "merge.enabled",
            "merge.threshold",
            "merge.neighbors",
            "merge.min_name_length",
            "merge.max_name_length",
            "merge.exclude_private",
            "merge.custom_patterns",
            "rate_limit.min_interval_secs",
            "rate_limit.error_wait_secs",
            "rate_limit.max_retries",
            "files.exclude",
            "files.document_extensions",
            "extraction.entity_categories",
            "extraction.summarize_code",
            "search.top_k",
            "llm.extraction.provider",
            "llm.extraction.model",
            "llm.extraction.base_url",
            "llm.extraction.max_tokens",
            "llm.analysis.provider",
            "llm.analysis.model",
            "llm.analysis.base_url",
            "llm.analysis.max_tokens",
            "embedding.model",
            "embedding.base_url",
        ];

        KEYS.iter()
            .map(|key| Ok((key.to_string(), self.get(key)?)))
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        Config::default().save()
    }
}

fn parse_value<T>(key: &str, value: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value for {}: {}", key, value))
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
