//! Deterministic in-memory collaborators.
//!
//! Used by tests and offline runs. Each adapter counts its calls and can be
//! told to fail or stall on particular inputs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{CompletionAdapter, CompletionOptions, EntityEntry, LookupAdapter, RawEvidence, SearchAdapter};
use crate::error::{AugmenterError, Result};

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(String),
}

#[derive(Debug, Clone)]
struct Rule {
    needle: String,
    reply: Reply,
    delay: Option<Duration>,
}

/// Completion that answers by substring rules, first match wins
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    rules: Vec<Rule>,
    fallback: String,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply for prompts that match no rule (empty by default)
    pub fn with_default(mut self, response: impl Into<String>) -> Self {
        self.fallback = response.into();
        self
    }

    /// Reply `response` to any prompt containing `needle`
    pub fn on(mut self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules.push(Rule {
            needle: needle.into(),
            reply: Reply::Text(response.into()),
            delay: None,
        });
        self
    }

    /// Fail any prompt containing `needle`
    pub fn fail_on(mut self, needle: impl Into<String>, message: impl Into<String>) -> Self {
        self.rules.push(Rule {
            needle: needle.into(),
            reply: Reply::Fail(message.into()),
            delay: None,
        });
        self
    }

    /// Reply `response` to prompts containing `needle`, after sleeping `delay`
    pub fn slow_on(
        mut self,
        needle: impl Into<String>,
        delay: Duration,
        response: impl Into<String>,
    ) -> Self {
        self.rules.push(Rule {
            needle: needle.into(),
            reply: Reply::Text(response.into()),
            delay: Some(delay),
        });
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every prompt received, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Number of received prompts containing `needle`
    pub fn calls_matching(&self, needle: &str) -> usize {
        self.prompts().iter().filter(|p| p.contains(needle)).count()
    }
}

#[async_trait]
impl CompletionAdapter for ScriptedCompletion {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str, _options: &CompletionOptions) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        let Some(rule) = self.rules.iter().find(|r| prompt.contains(&r.needle)) else {
            return Ok(self.fallback.clone());
        };

        if let Some(delay) = rule.delay {
            tokio::time::sleep(delay).await;
        }

        match &rule.reply {
            Reply::Text(text) => Ok(text.clone()),
            Reply::Fail(message) => Err(AugmenterError::adapter(self.name(), message.clone())),
        }
    }
}

/// Search over a fixed query -> results table
#[derive(Debug, Default)]
pub struct MemorySearch {
    results: HashMap<String, Vec<RawEvidence>>,
    failures: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    calls: AtomicUsize,
}

fn key(text: &str) -> String {
    text.trim().to_lowercase()
}

impl MemorySearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_results<I, S>(mut self, query: &str, results: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.results
            .insert(key(query), results.into_iter().map(Into::into).collect());
        self
    }

    pub fn fail_on(mut self, query: &str, message: impl Into<String>) -> Self {
        self.failures.insert(key(query), message.into());
        self
    }

    pub fn delay_on(mut self, query: &str, delay: Duration) -> Self {
        self.delays.insert(key(query), delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchAdapter for MemorySearch {
    fn name(&self) -> &str {
        "memory-search"
    }

    async fn search(&self, query: &str) -> Result<Vec<RawEvidence>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let query = key(query);

        if let Some(delay) = self.delays.get(&query) {
            tokio::time::sleep(*delay).await;
        }
        if let Some(message) = self.failures.get(&query) {
            return Err(AugmenterError::adapter(self.name(), message.clone()));
        }

        Ok(self.results.get(&query).cloned().unwrap_or_default())
    }
}

/// Lookup over a fixed name -> entry table, case-insensitive
#[derive(Debug, Default)]
pub struct MemoryLookup {
    entries: HashMap<String, EntityEntry>,
    failures: HashMap<String, String>,
    calls: Mutex<HashMap<String, usize>>,
}

impl MemoryLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` as its own canonical entry
    pub fn with_entry(
        self,
        name: &str,
        description: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Self {
        let entry = EntityEntry::new(name.trim(), description, source_url);
        self.with_alias(name, entry)
    }

    /// Resolve `name` to an entry that may carry a different canonical name
    pub fn with_alias(mut self, name: &str, entry: EntityEntry) -> Self {
        self.entries.insert(key(name), entry);
        self
    }

    pub fn fail_on(mut self, name: &str, message: impl Into<String>) -> Self {
        self.failures.insert(key(name), message.into());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls
            .lock()
            .map(|c| c.values().sum())
            .unwrap_or_default()
    }

    /// Lookups made for `name` (case-insensitive)
    pub fn calls_for(&self, name: &str) -> usize {
        self.calls
            .lock()
            .ok()
            .and_then(|c| c.get(&key(name)).copied())
            .unwrap_or(0)
    }
}

#[async_trait]
impl LookupAdapter for MemoryLookup {
    fn name(&self) -> &str {
        "memory-lookup"
    }

    async fn lookup(&self, name: &str) -> Result<Option<EntityEntry>> {
        let name = key(name);
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(name.clone()).or_insert(0) += 1;
        }

        if let Some(message) = self.failures.get(&name) {
            return Err(AugmenterError::adapter(self.name(), message.clone()));
        }

        Ok(self.entries.get(&name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_first_rule_wins() {
        let completion = ScriptedCompletion::new()
            .with_default("nothing")
            .on("Eiffel", "Paris")
            .on("Tower", "Tokyo")
            .fail_on("broken", "model offline");
        let options = CompletionOptions::default();

        assert_eq!(completion.complete("Eiffel Tower", &options).await.unwrap(), "Paris");
        assert_eq!(completion.complete("Tokyo Tower", &options).await.unwrap(), "Tokyo");
        assert_eq!(completion.complete("hello", &options).await.unwrap(), "nothing");
        assert!(completion.complete("broken prompt", &options).await.is_err());
        assert_eq!(completion.calls(), 4);
        assert_eq!(completion.calls_matching("Tower"), 2);
    }

    #[tokio::test]
    async fn test_memory_search() {
        let search = MemorySearch::new()
            .with_results("Eiffel Tower", ["a", "b"])
            .fail_on("quota", "429");

        assert_eq!(search.search(" eiffel tower ").await.unwrap(), vec!["a", "b"]);
        assert!(search.search("unknown").await.unwrap().is_empty());
        assert!(search.search("quota").await.is_err());
        assert_eq!(search.calls(), 3);
    }

    #[tokio::test]
    async fn test_memory_lookup_counts_per_name() {
        let lookup = MemoryLookup::new()
            .with_entry("Paris", "Capital of France", "https://en.wikipedia.org/wiki/Paris")
            .with_alias(
                "Tour Eiffel",
                EntityEntry::new("Eiffel Tower", "Lattice tower", "https://en.wikipedia.org/wiki/Eiffel_Tower"),
            );

        let entry = lookup.lookup("paris").await.unwrap().unwrap();
        assert_eq!(entry.canonical_name, "Paris");
        let alias = lookup.lookup("Tour Eiffel").await.unwrap().unwrap();
        assert_eq!(alias.canonical_name, "Eiffel Tower");
        assert!(lookup.lookup("Atlantis").await.unwrap().is_none());

        assert_eq!(lookup.calls_for("Paris"), 1);
        assert_eq!(lookup.calls(), 3);
    }
}
