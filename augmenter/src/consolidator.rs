//! Knowledge consolidation: retrieve, link, chain
//!
//! ```text
//!   query ──► Retriever ──► raw evidence ──► EntityLinker ──► GraphStore ──► Chainer ──► chains
//! ```
//!
//! Every call builds a fresh [`GraphStore`] and drops it when done.

use std::sync::Arc;

use augmenter_kg::{Evidence, EvidenceChain, GraphStore};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::adapters::Adapters;
use crate::chainer::{judge_for, Chainer, RelevanceJudge};
use crate::config::PipelineConfig;
use crate::error::{Issue, Result};
use crate::linker::EntityLinker;
use crate::retriever::Retriever;

/// A user query plus the dialog that led to it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceQuery {
    pub text: String,
    /// Earlier turns, oldest first
    #[serde(default)]
    pub history: Vec<String>,
}

impl EvidenceQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            history: vec![],
        }
    }

    pub fn with_history<I, S>(mut self, history: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.history = history.into_iter().map(Into::into).collect();
        self
    }
}

/// Counters describing one consolidation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationStats {
    pub search_queries: usize,
    pub raw_evidence: usize,
    pub nodes: usize,
    pub edges: usize,
    pub pruned: usize,
    pub chains: usize,
}

/// Chain-grouped evidence plus everything that went wrong producing it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Consolidation {
    pub chains: Vec<EvidenceChain>,
    pub issues: Vec<Issue>,
    pub stats: ConsolidationStats,
}

impl Consolidation {
    /// All chain evidence in chain order, without cross-chain dedup
    pub fn evidence(&self) -> Vec<Evidence> {
        self.chains
            .iter()
            .flat_map(|chain| chain.evidence.iter().cloned())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Issues that describe lost data rather than graph shape
    pub fn degradations(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|issue| !issue.is_informational())
    }
}

pub struct KnowledgeConsolidator {
    retriever: Retriever,
    linker: EntityLinker,
    chainer: Chainer,
    config: PipelineConfig,
}

impl KnowledgeConsolidator {
    /// The relevance judge is chosen by `config.relevance`
    pub fn new(adapters: Adapters, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let judge = judge_for(config.relevance, adapters.completion.clone());

        Ok(Self {
            retriever: Retriever::new(
                adapters.completion.clone(),
                adapters.search.clone(),
                config.clone(),
            ),
            linker: EntityLinker::new(adapters.completion, adapters.lookup, config.clone()),
            chainer: Chainer::new(judge, config.clone())?,
            config,
        })
    }

    pub fn with_judge(mut self, judge: Arc<dyn RelevanceJudge>) -> Self {
        self.chainer = self.chainer.with_judge(judge);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Consolidate evidence for `query`. Never fails; problems are issues.
    pub async fn consolidate(&self, query: &EvidenceQuery) -> Consolidation {
        match self
            .consolidate_with_cancel(query, &CancellationToken::new())
            .await
        {
            Ok(consolidation) => consolidation,
            Err(e) => {
                // a fresh token never fires, so this is unexpected
                warn!(error = %e, "Consolidation aborted");
                Consolidation::default()
            }
        }
    }

    /// Consolidate, abandoning the request if `cancel` fires.
    ///
    /// On cancellation the partial graph is discarded and
    /// [`AugmenterError::Cancelled`](crate::AugmenterError::Cancelled) is
    /// returned.
    pub async fn consolidate_with_cancel(
        &self,
        query: &EvidenceQuery,
        cancel: &CancellationToken,
    ) -> Result<Consolidation> {
        let span = tracing::info_span!("consolidate", request_id = %Uuid::new_v4());
        self.run(query, cancel).instrument(span).await
    }

    async fn run(&self, query: &EvidenceQuery, cancel: &CancellationToken) -> Result<Consolidation> {
        info!(query = %query.text, history = query.history.len(), "Consolidating evidence");
        let mut consolidation = Consolidation::default();

        let retrieval = self.retriever.retrieve(query, cancel).await?;
        consolidation.stats.search_queries = retrieval.search_queries.len();
        consolidation.stats.raw_evidence = retrieval.evidence.len();
        consolidation.issues.extend(retrieval.issues);
        if retrieval.evidence.is_empty() {
            info!("No raw evidence retrieved");
            return Ok(consolidation);
        }

        let mut graph = GraphStore::new().with_merge_policy(self.config.merge_policy);
        if self.config.allow_self_loops {
            graph = graph.allow_self_loops();
        }

        let linking = self.linker.link(&retrieval.evidence, &mut graph, cancel).await?;
        consolidation.issues.extend(linking.issues);
        consolidation.stats.nodes = graph.len();
        consolidation.stats.edges = graph.edge_count();
        if graph.is_empty() {
            consolidation.issues.push(Issue::EmptyGraph);
            return Ok(consolidation);
        }

        let chaining = self.chainer.chain(&graph, query, cancel).await?;
        consolidation.issues.extend(chaining.issues);
        consolidation.stats.pruned = chaining.pruned.len();
        consolidation.stats.chains = chaining.chains.len();
        consolidation.chains = chaining.chains;

        info!(
            chains = consolidation.stats.chains,
            evidence = consolidation.chains.iter().map(EvidenceChain::len).sum::<usize>(),
            issues = consolidation.issues.len(),
            "Consolidation complete"
        );
        Ok(consolidation)
    }
}
