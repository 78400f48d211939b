//! Relevance pruning and evidence chain extraction

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use augmenter_kg::{ChainExtractor, EvidenceChain, GraphStore, KnowledgeNode};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::{bounded, CompletionAdapter, CompletionOptions};
use crate::config::{PipelineConfig, RelevanceMode};
use crate::consolidator::EvidenceQuery;
use crate::error::{AugmenterError, Issue, Result, Stage};
use crate::prompts;
use crate::text::{mentions, overlap, terms};

/// Decides whether a graph node helps answer a query
#[async_trait]
pub trait RelevanceJudge: Send + Sync {
    fn name(&self) -> &str;

    async fn is_relevant(&self, node: &KnowledgeNode, query: &str) -> Result<bool>;
}

/// Keeps every node
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

#[async_trait]
impl RelevanceJudge for AcceptAll {
    fn name(&self) -> &str {
        "accept_all"
    }

    async fn is_relevant(&self, _node: &KnowledgeNode, _query: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Keeps nodes named in the query or sharing enough terms with it
#[derive(Debug, Clone, Copy)]
pub struct KeywordOverlap {
    min_overlap: usize,
}

impl KeywordOverlap {
    pub fn new(min_overlap: usize) -> Self {
        Self { min_overlap }
    }
}

impl Default for KeywordOverlap {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl RelevanceJudge for KeywordOverlap {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn is_relevant(&self, node: &KnowledgeNode, query: &str) -> Result<bool> {
        if mentions(query, &node.entity) {
            return Ok(true);
        }
        let shared = overlap(&terms(query), &format!("{} {}", node.entity, node.text));
        Ok(shared >= self.min_overlap)
    }
}

/// Asks the completion model for a yes/no verdict
pub struct CompletionJudge {
    completion: Arc<dyn CompletionAdapter>,
}

impl CompletionJudge {
    pub fn new(completion: Arc<dyn CompletionAdapter>) -> Self {
        Self { completion }
    }
}

#[async_trait]
impl RelevanceJudge for CompletionJudge {
    fn name(&self) -> &str {
        "completion"
    }

    async fn is_relevant(&self, node: &KnowledgeNode, query: &str) -> Result<bool> {
        let prompt = prompts::relevance(node, query);
        let reply = self
            .completion
            .complete(&prompt, &CompletionOptions::deterministic())
            .await?;

        let verdict = reply
            .trim()
            .trim_start_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if verdict.starts_with("yes") {
            Ok(true)
        } else if verdict.starts_with("no") {
            Ok(false)
        } else {
            Err(AugmenterError::adapter(
                self.completion.name(),
                format!("unrecognised relevance verdict: {}", reply.trim()),
            ))
        }
    }
}

/// Build the judge a [`RelevanceMode`] names
pub fn judge_for(mode: RelevanceMode, completion: Arc<dyn CompletionAdapter>) -> Arc<dyn RelevanceJudge> {
    match mode {
        RelevanceMode::AcceptAll => Arc::new(AcceptAll),
        RelevanceMode::Keyword => Arc::new(KeywordOverlap::default()),
        RelevanceMode::Model => Arc::new(CompletionJudge::new(completion)),
    }
}

/// Output of one `chain` call
#[derive(Debug, Clone, Default)]
pub struct Chaining {
    /// Ranked, non-duplicate chains
    pub chains: Vec<EvidenceChain>,
    /// Entities judged irrelevant, in insertion order
    pub pruned: Vec<String>,
    pub issues: Vec<Issue>,
}

pub struct Chainer {
    judge: Arc<dyn RelevanceJudge>,
    extractor: ChainExtractor,
    config: PipelineConfig,
}

impl Chainer {
    pub fn new(judge: Arc<dyn RelevanceJudge>, config: PipelineConfig) -> Result<Self> {
        let extractor = ChainExtractor::new(config.chain.clone())?;
        Ok(Self {
            judge,
            extractor,
            config,
        })
    }

    pub fn with_judge(mut self, judge: Arc<dyn RelevanceJudge>) -> Self {
        self.judge = judge;
        self
    }

    /// Prune `graph` to the nodes relevant to `query` and extract chains.
    ///
    /// Entities the query names and their direct successors are kept
    /// without asking the judge (unless `keep_query_neighbors` is off). A
    /// failing judge keeps the node and records an issue. Only
    /// cancellation is an error.
    pub async fn chain(
        &self,
        graph: &GraphStore,
        query: &EvidenceQuery,
        cancel: &CancellationToken,
    ) -> Result<Chaining> {
        let mut chaining = Chaining::default();
        if graph.is_empty() {
            return Ok(chaining);
        }

        let relevant = self.prune(graph, query, cancel, &mut chaining).await?;
        if relevant.is_empty() {
            info!(pruned = chaining.pruned.len(), "No relevant nodes");
            return Ok(chaining);
        }

        let roots = select_roots(graph, &relevant, &query.text);
        debug!(roots = ?roots, "Selected chain roots");

        let query_terms = terms(&query.text);
        let set = self.extractor.extract(graph, &roots, &relevant, |node| {
            overlap(&query_terms, &format!("{} {}", node.entity, node.text)) as f32
        });

        if set.exhausted {
            warn!(candidates = set.candidates, "Candidate budget reached, chains may be incomplete");
        }
        chaining.issues.extend(
            set.cycles
                .into_iter()
                .map(|cycle| Issue::CycleDetected {
                    from: cycle.from,
                    to: cycle.to,
                }),
        );
        chaining.chains = set.chains;

        info!(
            relevant = relevant.len(),
            pruned = chaining.pruned.len(),
            chains = chaining.chains.len(),
            "Chaining complete"
        );
        Ok(chaining)
    }

    async fn prune(
        &self,
        graph: &GraphStore,
        query: &EvidenceQuery,
        cancel: &CancellationToken,
        chaining: &mut Chaining,
    ) -> Result<HashSet<String>> {
        let timeout = self.config.adapter_timeout();
        let judge = &self.judge;
        let text = query.text.as_str();

        let mut relevant = if self.config.keep_query_neighbors {
            query_neighborhood(graph, text)
        } else {
            HashSet::new()
        };
        if !relevant.is_empty() {
            debug!(anchored = relevant.len(), "Query entities and their neighbours kept");
        }
        let anchored = &relevant;

        let verdicts: Vec<(&KnowledgeNode, Result<bool>)> = stream::iter(
            graph.nodes().filter(|node| !anchored.contains(&node.entity)),
        )
            .map(|node| async move {
                let verdict = bounded("relevance", timeout, cancel, judge.is_relevant(node, text)).await;
                (node, verdict)
            })
            .buffered(self.config.concurrency)
            .collect()
            .await;

        for (node, verdict) in verdicts {
            match verdict {
                Ok(true) => {
                    relevant.insert(node.entity.clone());
                }
                Ok(false) => chaining.pruned.push(node.entity.clone()),
                Err(AugmenterError::Cancelled) => return Err(AugmenterError::Cancelled),
                Err(e) => {
                    warn!(entity = %node.entity, judge = judge.name(), error = %e, "Relevance check failed, keeping node");
                    chaining
                        .issues
                        .push(Issue::adapter_failure(Stage::Relevance, node.entity.clone(), &e));
                    relevant.insert(node.entity.clone());
                }
            }
        }

        Ok(relevant)
    }
}

/// Nodes the query names plus their direct successors
fn query_neighborhood(graph: &GraphStore, query: &str) -> HashSet<String> {
    let mut kept = HashSet::new();
    for node in graph.nodes().filter(|node| mentions(query, &node.entity)) {
        kept.insert(node.entity.clone());
        kept.extend(graph.neighbors(&node.entity).into_iter().map(|n| n.entity.clone()));
    }
    kept
}

/// Relevant nodes the query names; else those without a relevant
/// predecessor; else (pure cycles) every relevant node
fn select_roots(graph: &GraphStore, relevant: &HashSet<String>, query: &str) -> Vec<String> {
    let named: Vec<String> = graph
        .nodes()
        .filter(|node| relevant.contains(&node.entity) && mentions(query, &node.entity))
        .map(|node| node.entity.clone())
        .collect();
    if !named.is_empty() {
        return named;
    }

    let sources: Vec<String> = graph
        .sources(relevant)
        .into_iter()
        .map(|node| node.entity.clone())
        .collect();
    if !sources.is_empty() {
        return sources;
    }

    graph
        .nodes()
        .filter(|node| relevant.contains(&node.entity))
        .map(|node| node.entity.clone())
        .collect()
}
