//! Raw evidence retrieval
//!
//! Turns a query into search queries with one completion call, then fans
//! those out to the search adapter.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::{bounded, CompletionAdapter, CompletionOptions, RawEvidence, SearchAdapter};
use crate::config::PipelineConfig;
use crate::consolidator::EvidenceQuery;
use crate::error::{excerpt, AugmenterError, Issue, Result, Stage};
use crate::prompts;
use crate::text::parse_lines;

/// Output of one retrieval
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    /// Search queries actually issued, in generation order
    pub search_queries: Vec<String>,
    /// Results in discovery order; duplicates kept
    pub evidence: Vec<RawEvidence>,
    pub issues: Vec<Issue>,
}

pub struct Retriever {
    completion: Arc<dyn CompletionAdapter>,
    search: Arc<dyn SearchAdapter>,
    config: PipelineConfig,
}

impl Retriever {
    pub fn new(
        completion: Arc<dyn CompletionAdapter>,
        search: Arc<dyn SearchAdapter>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            completion,
            search,
            config,
        }
    }

    /// Generate search queries for `query` and collect their results.
    ///
    /// Adapter failures become issues; only cancellation is an error.
    pub async fn retrieve(
        &self,
        query: &EvidenceQuery,
        cancel: &CancellationToken,
    ) -> Result<Retrieval> {
        let mut retrieval = Retrieval::default();
        let timeout = self.config.adapter_timeout();

        let prompt = prompts::search_queries(&query.text, &query.history);
        let options = CompletionOptions::default();
        let reply = match bounded(
            "query generation",
            timeout,
            cancel,
            self.completion.complete(&prompt, &options),
        )
        .await
        {
            Ok(reply) => reply,
            Err(AugmenterError::Cancelled) => return Err(AugmenterError::Cancelled),
            Err(e) => {
                warn!(error = %e, "Search query generation failed");
                retrieval.issues.push(Issue::adapter_failure(
                    Stage::QueryGeneration,
                    excerpt(&query.text),
                    &e,
                ));
                return Ok(retrieval);
            }
        };

        let mut search_queries = parse_lines(&reply);
        search_queries.truncate(self.config.max_search_queries);
        if search_queries.is_empty() {
            warn!("Completion produced no search queries");
            retrieval.issues.push(Issue::NoSearchQueries);
            return Ok(retrieval);
        }
        debug!(queries = ?search_queries, "Generated search queries");

        let search = &self.search;
        let results: Vec<(String, Result<Vec<RawEvidence>>)> = stream::iter(search_queries.iter().cloned())
            .map(|search_query| async move {
                let result = bounded("search", timeout, cancel, search.search(&search_query)).await;
                (search_query, result)
            })
            .buffered(self.config.concurrency)
            .collect()
            .await;

        for (search_query, result) in results {
            match result {
                Ok(units) => {
                    debug!(query = %search_query, results = units.len(), "Search complete");
                    retrieval.evidence.extend(units);
                }
                Err(AugmenterError::Cancelled) => return Err(AugmenterError::Cancelled),
                Err(e) => {
                    warn!(query = %search_query, error = %e, "Search failed, skipping");
                    retrieval
                        .issues
                        .push(Issue::adapter_failure(Stage::Search, search_query, &e));
                }
            }
        }

        retrieval.search_queries = search_queries;
        info!(
            queries = retrieval.search_queries.len(),
            evidence = retrieval.evidence.len(),
            issues = retrieval.issues.len(),
            "Retrieval complete"
        );
        Ok(retrieval)
    }
}
