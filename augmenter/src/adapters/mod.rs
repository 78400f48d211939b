//! Collaborator boundaries: completion, search, and entity lookup.
//!
//! Every pipeline stage reaches the outside world through one of these
//! traits. Calls are wrapped by [`bounded`], which races the adapter future
//! against a timeout and a [`CancellationToken`].

pub mod bing;
pub mod cli;
pub mod memory;
pub mod openai;
pub mod wikipedia;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;

use crate::error::{AugmenterError, Result};

pub use bing::BingSearch;
pub use cli::{CliCompletion, Model};
pub use memory::{MemoryLookup, MemorySearch, ScriptedCompletion};
pub use openai::OpenAiCompletion;
pub use wikipedia::WikipediaLookup;

/// One unit of unstructured text returned by a search
pub type RawEvidence = String;

/// Sampling parameters for a completion call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub stop: Vec<String>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.9,
            max_tokens: 2048,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.6,
            stop: vec![],
        }
    }
}

impl CompletionOptions {
    /// Low-temperature options for extraction and judging prompts
    pub fn deterministic() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 512,
            presence_penalty: 0.0,
            ..Self::default()
        }
    }
}

/// An encyclopedic entry resolved for an entity name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityEntry {
    pub canonical_name: String,
    pub description: String,
    pub source_url: String,
}

impl EntityEntry {
    pub fn new(
        canonical_name: impl Into<String>,
        description: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            canonical_name: canonical_name.into(),
            description: description.into(),
            source_url: source_url.into(),
        }
    }
}

#[async_trait]
pub trait CompletionAdapter: Send + Sync {
    /// Adapter name used in logs and error messages
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String>;
}

#[async_trait]
pub trait SearchAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str) -> Result<Vec<RawEvidence>>;
}

#[async_trait]
pub trait LookupAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` when no entry exists for `name`
    async fn lookup(&self, name: &str) -> Result<Option<EntityEntry>>;
}

/// The three collaborators a consolidation needs
#[derive(Clone)]
pub struct Adapters {
    pub completion: Arc<dyn CompletionAdapter>,
    pub search: Arc<dyn SearchAdapter>,
    pub lookup: Arc<dyn LookupAdapter>,
}

impl Adapters {
    pub fn new(
        completion: Arc<dyn CompletionAdapter>,
        search: Arc<dyn SearchAdapter>,
        lookup: Arc<dyn LookupAdapter>,
    ) -> Self {
        Self {
            completion,
            search,
            lookup,
        }
    }
}

/// Wait for a free call slot, giving up if `cancel` fires
pub async fn acquire<'a>(
    slots: &'a Semaphore,
    cancel: &CancellationToken,
) -> Result<SemaphorePermit<'a>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AugmenterError::Cancelled),
        permit = slots.acquire() => permit.map_err(|_| AugmenterError::Cancelled),
    }
}

/// Run `fut` under a timeout, giving up early if `cancel` fires.
///
/// Cancellation wins over a result that becomes ready at the same time.
pub async fn bounded<T, F>(
    operation: &str,
    limit: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AugmenterError::Cancelled),
        outcome = tokio::time::timeout(limit, fut) => match outcome {
            Ok(result) => result,
            Err(_) => Err(AugmenterError::Timeout {
                operation: operation.to_string(),
                millis: limit.as_millis() as u64,
            }),
        },
    }
}
