//! Configuration for the augmenter
//!
//! Loaded from YAML (`--config` or `$XDG_CONFIG_HOME/augmenter/config.yaml`),
//! falling back to defaults when no file exists. Credentials are read from
//! the environment, never from the file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use augmenter_kg::{ChainConfig, MergePolicy};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::adapters::{
    Adapters, BingSearch, CliCompletion, CompletionAdapter, CompletionOptions, LookupAdapter,
    Model, OpenAiCompletion, SearchAdapter, WikipediaLookup,
};
use crate::error::{AugmenterError, Result};
use crate::search::LocalSearch;

pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const BING_SEARCH_KEY: &str = "BING_SEARCH_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionProvider {
    #[default]
    Cli,
    OpenAi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub provider: CompletionProvider,
    /// Model for the CLI provider
    pub model: Model,
    /// Model for the OpenAI provider
    pub openai_model: String,
    /// Override for OpenAI-compatible endpoints
    pub base_url: Option<String>,
    /// Path to the CLI program
    pub program: Option<PathBuf>,
    pub options: CompletionOptions,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: CompletionProvider::default(),
            model: Model::default(),
            openai_model: "gpt-3.5-turbo".to_string(),
            base_url: None,
            program: None,
            options: CompletionOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchProvider {
    Bing,
    #[default]
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub provider: SearchProvider,
    /// Results kept per search query
    pub max_results: usize,
    pub endpoint: Option<String>,
    /// Local index directory; defaults under the user data dir
    pub index_path: Option<PathBuf>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: SearchProvider::default(),
            max_results: 5,
            endpoint: None,
            index_path: None,
        }
    }
}

impl SearchConfig {
    pub fn index_path(&self) -> PathBuf {
        self.index_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("augmenter")
                .join("index")
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// Override for the Wikipedia REST endpoint
    pub base_url: Option<String>,
}

/// How the chainer decides which nodes are relevant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceMode {
    AcceptAll,
    #[default]
    Keyword,
    Model,
}

/// Knobs for the consolidation pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// In-flight adapter calls per stage
    pub concurrency: usize,
    /// Per-call limit on every adapter call
    pub adapter_timeout_ms: u64,
    pub max_search_queries: usize,
    pub max_entities_per_unit: usize,
    pub merge_policy: MergePolicy,
    pub allow_self_loops: bool,
    pub relevance: RelevanceMode,
    /// Keep entities the query names and their direct successors without judging them
    pub keep_query_neighbors: bool,
    pub chain: ChainConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            adapter_timeout_ms: 30_000,
            max_search_queries: 5,
            max_entities_per_unit: 10,
            merge_policy: MergePolicy::default(),
            allow_self_loops: false,
            relevance: RelevanceMode::default(),
            keep_query_neighbors: true,
            chain: ChainConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(AugmenterError::Config("concurrency must be greater than 0".to_string()));
        }
        if self.adapter_timeout_ms == 0 {
            return Err(AugmenterError::Config(
                "adapter_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_search_queries == 0 {
            return Err(AugmenterError::Config(
                "max_search_queries must be greater than 0".to_string(),
            ));
        }
        if self.max_entities_per_unit == 0 {
            return Err(AugmenterError::Config(
                "max_entities_per_unit must be greater than 0".to_string(),
            ));
        }
        self.chain
            .validate()
            .map_err(|e| AugmenterError::Config(e.to_string()))
    }
}

/// Builder for [`PipelineConfig`] with validation
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    concurrency: Option<usize>,
    adapter_timeout: Option<Duration>,
    max_search_queries: Option<usize>,
    max_entities_per_unit: Option<usize>,
    merge_policy: Option<MergePolicy>,
    allow_self_loops: Option<bool>,
    relevance: Option<RelevanceMode>,
    keep_query_neighbors: Option<bool>,
    chain: Option<ChainConfig>,
}

impl PipelineConfigBuilder {
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Sub-millisecond parts are rounded up
    pub fn adapter_timeout(mut self, timeout: Duration) -> Self {
        self.adapter_timeout = Some(timeout);
        self
    }

    pub fn max_search_queries(mut self, max: usize) -> Self {
        self.max_search_queries = Some(max);
        self
    }

    pub fn max_entities_per_unit(mut self, max: usize) -> Self {
        self.max_entities_per_unit = Some(max);
        self
    }

    pub fn merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = Some(policy);
        self
    }

    pub fn allow_self_loops(mut self, allow: bool) -> Self {
        self.allow_self_loops = Some(allow);
        self
    }

    pub fn relevance(mut self, mode: RelevanceMode) -> Self {
        self.relevance = Some(mode);
        self
    }

    pub fn keep_query_neighbors(mut self, keep: bool) -> Self {
        self.keep_query_neighbors = Some(keep);
        self
    }

    pub fn chain(mut self, chain: ChainConfig) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn build(self) -> Result<PipelineConfig> {
        let default = PipelineConfig::default();
        let config = PipelineConfig {
            concurrency: self.concurrency.unwrap_or(default.concurrency),
            adapter_timeout_ms: self
                .adapter_timeout
                .map(|t| t.as_nanos().div_ceil(1_000_000) as u64)
                .unwrap_or(default.adapter_timeout_ms),
            max_search_queries: self.max_search_queries.unwrap_or(default.max_search_queries),
            max_entities_per_unit: self
                .max_entities_per_unit
                .unwrap_or(default.max_entities_per_unit),
            merge_policy: self.merge_policy.unwrap_or(default.merge_policy),
            allow_self_loops: self.allow_self_loops.unwrap_or(default.allow_self_loops),
            relevance: self.relevance.unwrap_or(default.relevance),
            keep_query_neighbors: self
                .keep_query_neighbors
                .unwrap_or(default.keep_query_neighbors),
            chain: self.chain.unwrap_or(default.chain),
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UtilityMode {
    #[default]
    Rule,
    Model,
}

/// Knobs for the respond loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentConfig {
    /// Consolidate evidence before the first generation
    pub acquire_evidence: bool,
    pub max_attempts: usize,
    /// Candidates scoring at least this are returned
    pub utility_threshold: f32,
    /// Hard bound on policy decisions per request, at least `max_attempts`
    /// plus one when evidence is acquired
    pub max_steps: usize,
    pub utility: UtilityMode,
    /// Content terms a sentence must share with the evidence to count as grounded
    pub min_shared_terms: usize,
    /// Overrides the default response instruction
    pub instruction: Option<String>,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            acquire_evidence: true,
            max_attempts: 3,
            utility_threshold: 0.6,
            max_steps: 10,
            utility: UtilityMode::default(),
            min_shared_terms: 2,
            instruction: None,
        }
    }
}

impl AugmentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(AugmenterError::Config("max_attempts must be greater than 0".to_string()));
        }
        // one step per generation, plus one for evidence acquisition
        let needed = self.max_attempts + usize::from(self.acquire_evidence);
        if self.max_steps < needed {
            return Err(AugmenterError::Config(format!(
                "max_steps must be at least {} to allow {} attempt(s)",
                needed, self.max_attempts
            )));
        }
        if !(0.0..=1.0).contains(&self.utility_threshold) {
            return Err(AugmenterError::Config(
                "utility_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Complete augmenter configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmenterConfig {
    pub completion: CompletionConfig,
    pub search: SearchConfig,
    pub lookup: LookupConfig,
    pub pipeline: PipelineConfig,
    pub augment: AugmentConfig,
}

impl AugmenterConfig {
    /// `$XDG_CONFIG_HOME/augmenter/config.yaml` (or the platform equivalent)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("augmenter").join("config.yaml"))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&content)?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Load `path`, or the default path; defaults when neither file exists.
    ///
    /// An explicitly given path that does not exist is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.search.max_results == 0 {
            return Err(AugmenterError::Config("search.max_results must be greater than 0".to_string()));
        }
        self.pipeline.validate()?;
        self.augment.validate()
    }

    /// Build the configured collaborators
    pub fn adapters(&self, credentials: &Credentials) -> Result<Adapters> {
        let completion: Arc<dyn CompletionAdapter> = match self.completion.provider {
            CompletionProvider::Cli => {
                let mut cli = CliCompletion::new(self.completion.model);
                if let Some(ref program) = self.completion.program {
                    cli = cli.with_program(program);
                }
                Arc::new(cli)
            }
            CompletionProvider::OpenAi => {
                let key = credentials.require(OPENAI_API_KEY, &credentials.openai_api_key)?;
                let mut client = OpenAiCompletion::new(key).with_model(&self.completion.openai_model);
                if let Some(ref url) = self.completion.base_url {
                    client = client.with_base_url(url);
                }
                Arc::new(client)
            }
        };

        let search: Arc<dyn SearchAdapter> = match self.search.provider {
            SearchProvider::Bing => {
                let key = credentials.require(BING_SEARCH_KEY, &credentials.bing_search_key)?;
                let mut bing = BingSearch::new(key).with_max_results(self.search.max_results);
                if let Some(ref endpoint) = self.search.endpoint {
                    bing = bing.with_endpoint(endpoint);
                }
                Arc::new(bing)
            }
            SearchProvider::Local => {
                let index = LocalSearch::open_reader_only(self.search.index_path())?;
                Arc::new(index.searcher().with_limit(self.search.max_results))
            }
        };

        let mut wikipedia = WikipediaLookup::new();
        if let Some(ref url) = self.lookup.base_url {
            wikipedia = wikipedia.with_base_url(url);
        }
        let lookup: Arc<dyn LookupAdapter> = Arc::new(wikipedia);

        Ok(Adapters::new(completion, search, lookup))
    }
}

/// API keys taken from the environment
#[derive(Clone, Default)]
pub struct Credentials {
    pub openai_api_key: Option<String>,
    pub bing_search_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("openai_api_key", &self.openai_api_key.is_some())
            .field("bing_search_key", &self.bing_search_key.is_some())
            .finish()
    }
}

impl Credentials {
    /// Load `.env` if present, then read the process environment
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self {
            openai_api_key: non_empty_var(OPENAI_API_KEY),
            bing_search_key: non_empty_var(BING_SEARCH_KEY),
        }
    }

    fn require(&self, name: &str, value: &Option<String>) -> Result<String> {
        value
            .clone()
            .ok_or_else(|| AugmenterError::Config(format!("{} is not set", name)))
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
