//! Entity linking
//!
//! Resolves the named entities in each unit of raw evidence to encyclopedic
//! entries and records them as nodes of the request's [`GraphStore`]. A
//! second pass links nodes whose descriptions mention each other.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use augmenter_kg::{GraphStore, KnowledgeNode, Upsert};
use futures::stream::{self, StreamExt};
use tokio::sync::{OnceCell, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::{
    acquire, bounded, CompletionAdapter, CompletionOptions, EntityEntry, LookupAdapter,
    RawEvidence,
};
use crate::config::PipelineConfig;
use crate::error::{excerpt, AugmenterError, Issue, Result, Stage};
use crate::prompts;
use crate::text::parse_lines;

/// Output of one `link` call
#[derive(Debug, Clone, Default)]
pub struct Linking {
    /// Nodes created, merged, or connected, in first-touched order
    pub nodes: Vec<KnowledgeNode>,
    pub issues: Vec<Issue>,
}

#[derive(Debug, Clone)]
enum Resolved {
    Found(EntityEntry),
    Missing,
    Failed(String),
    Cancelled,
}

/// One lookup per name per `link` call, shared by concurrent units
#[derive(Default)]
struct LookupMemo {
    cells: Mutex<HashMap<String, Arc<OnceCell<Resolved>>>>,
}

impl LookupMemo {
    fn cell(&self, name: &str) -> Arc<OnceCell<Resolved>> {
        let key = name.trim().to_lowercase();
        match self.cells.lock() {
            Ok(mut cells) => cells.entry(key).or_default().clone(),
            Err(poisoned) => poisoned.into_inner().entry(key).or_default().clone(),
        }
    }
}

#[derive(Default)]
struct UnitOutcome {
    nodes: Vec<KnowledgeNode>,
    issues: Vec<Issue>,
}

pub struct EntityLinker {
    completion: Arc<dyn CompletionAdapter>,
    lookup: Arc<dyn LookupAdapter>,
    config: PipelineConfig,
}

impl EntityLinker {
    pub fn new(
        completion: Arc<dyn CompletionAdapter>,
        lookup: Arc<dyn LookupAdapter>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            completion,
            lookup,
            config,
        }
    }

    /// Link every unit of `raw` into `graph`.
    ///
    /// Units are processed concurrently; the caller's `&mut GraphStore` is
    /// the single writer. At most `concurrency` adapter calls are in flight
    /// across the whole call. A unit that fails contributes an issue and
    /// nothing else. Only cancellation is an error.
    pub async fn link(
        &self,
        raw: &[RawEvidence],
        graph: &mut GraphStore,
        cancel: &CancellationToken,
    ) -> Result<Linking> {
        let mut linking = Linking::default();
        let mut touched: Vec<String> = vec![];
        let mut touched_set: HashSet<String> = HashSet::new();
        let mut discovered: Vec<String> = vec![];
        let mut discovered_set: HashSet<String> = HashSet::new();

        let memo = LookupMemo::default();
        let memo = &memo;
        let slots = Semaphore::new(self.config.concurrency);
        let slots = &slots;

        let mut units = stream::iter(raw.iter())
            .map(|unit| self.link_unit(unit, memo, slots, cancel))
            .buffered(self.config.concurrency);

        while let Some(outcome) = units.next().await {
            let outcome = outcome?;
            linking.issues.extend(outcome.issues);

            for node in outcome.nodes {
                let entity = node.entity.clone();
                let upsert = graph.insert(node);
                debug!(entity = %entity, ?upsert, "Stored node");

                if upsert != Upsert::Kept && touched_set.insert(entity.clone()) {
                    touched.push(entity.clone());
                }
                if discovered_set.insert(entity.clone()) {
                    discovered.push(entity);
                }
            }
        }
        drop(units);

        let connected = self
            .connect(&discovered, graph, slots, cancel, &mut linking.issues)
            .await?;
        for entity in connected {
            if touched_set.insert(entity.clone()) {
                touched.push(entity);
            }
        }

        linking.nodes = touched
            .iter()
            .filter_map(|entity| graph.get(entity).cloned())
            .collect();
        dedup_issues(&mut linking.issues);

        info!(
            units = raw.len(),
            nodes = linking.nodes.len(),
            edges = graph.edge_count(),
            issues = linking.issues.len(),
            "Linking complete"
        );
        Ok(linking)
    }

    async fn link_unit(
        &self,
        unit: &str,
        memo: &LookupMemo,
        slots: &Semaphore,
        cancel: &CancellationToken,
    ) -> Result<UnitOutcome> {
        let mut outcome = UnitOutcome::default();

        let names = match self.extract_names(unit, slots, cancel).await {
            Ok(names) => names,
            Err(AugmenterError::Cancelled) => return Err(AugmenterError::Cancelled),
            Err(e) => {
                warn!(unit = %excerpt(unit), error = %e, "Entity extraction failed, skipping unit");
                outcome
                    .issues
                    .push(Issue::adapter_failure(Stage::Extraction, excerpt(unit), &e));
                return Ok(outcome);
            }
        };

        if names.is_empty() {
            debug!(unit = %excerpt(unit), "No entities found");
            outcome.issues.push(Issue::NoEntitiesFound {
                unit: excerpt(unit),
            });
            return Ok(outcome);
        }

        let resolved: Vec<(String, Resolved)> = stream::iter(names)
            .map(|name| async move {
                let resolved = self.resolve(&name, memo, slots, cancel).await;
                (name, resolved)
            })
            .buffered(self.config.concurrency)
            .collect()
            .await;

        for (name, resolved) in resolved {
            match resolved {
                Resolved::Found(entry) => {
                    let entity = entry.canonical_name.trim();
                    if entity.is_empty() {
                        continue;
                    }
                    outcome.nodes.push(KnowledgeNode::new(
                        entity,
                        entry.description,
                        entry.source_url,
                    ));
                }
                Resolved::Missing => debug!(entity = %name, "No entry found"),
                Resolved::Failed(reason) => outcome.issues.push(Issue::AdapterFailure {
                    stage: Stage::Lookup,
                    unit: name,
                    reason,
                }),
                Resolved::Cancelled => return Err(AugmenterError::Cancelled),
            }
        }

        Ok(outcome)
    }

    async fn extract_names(
        &self,
        text: &str,
        slots: &Semaphore,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let prompt = prompts::extract_entities(text);
        let _slot = acquire(slots, cancel).await?;
        let options = CompletionOptions::deterministic();
        let reply = bounded(
            "entity extraction",
            self.config.adapter_timeout(),
            cancel,
            self.completion.complete(&prompt, &options),
        )
        .await?;

        let mut names = parse_lines(&reply);
        names.truncate(self.config.max_entities_per_unit);
        Ok(names)
    }

    async fn resolve(
        &self,
        name: &str,
        memo: &LookupMemo,
        slots: &Semaphore,
        cancel: &CancellationToken,
    ) -> Resolved {
        let cell = memo.cell(name);
        let resolved = cell
            .get_or_init(|| async {
                let _slot = match acquire(slots, cancel).await {
                    Ok(slot) => slot,
                    Err(_) => return Resolved::Cancelled,
                };
                let result = bounded(
                    "lookup",
                    self.config.adapter_timeout(),
                    cancel,
                    self.lookup.lookup(name),
                )
                .await;

                match result {
                    Ok(Some(entry)) => Resolved::Found(entry),
                    Ok(None) => Resolved::Missing,
                    Err(AugmenterError::Cancelled) => Resolved::Cancelled,
                    Err(e) => {
                        warn!(entity = %name, error = %e, "Lookup failed");
                        Resolved::Failed(e.to_string())
                    }
                }
            })
            .await;
        resolved.clone()
    }

    /// Add an edge from each node to every stored entity its text names.
    ///
    /// Returns the entities that gained an edge.
    async fn connect(
        &self,
        entities: &[String],
        graph: &mut GraphStore,
        slots: &Semaphore,
        cancel: &CancellationToken,
        issues: &mut Vec<Issue>,
    ) -> Result<Vec<String>> {
        let texts: Vec<(String, String)> = entities
            .iter()
            .filter_map(|entity| graph.get(entity).map(|node| (entity.clone(), node.text.clone())))
            .collect();

        let extractions: Vec<(String, String, Result<Vec<String>>)> = stream::iter(texts)
            .map(|(entity, text)| async move {
                let names = self.extract_names(&text, slots, cancel).await;
                (entity, text, names)
            })
            .buffered(self.config.concurrency)
            .collect()
            .await;

        let mut connected = vec![];
        for (entity, text, names) in extractions {
            let targets: Vec<String> = match names {
                Ok(names) => names
                    .iter()
                    .filter_map(|name| graph.resolve(name).map(|node| node.entity.clone()))
                    .collect(),
                Err(AugmenterError::Cancelled) => return Err(AugmenterError::Cancelled),
                Err(e) => {
                    warn!(entity = %entity, error = %e, "Extraction failed, falling back to mention scan");
                    issues.push(Issue::adapter_failure(Stage::Connect, entity.clone(), &e));
                    graph
                        .mentioned_in(&text)
                        .into_iter()
                        .map(|node| node.entity.clone())
                        .collect()
                }
            };

            let mut gained = false;
            for target in targets {
                match graph.connect(&entity, &target) {
                    Ok(true) => {
                        debug!(from = %entity, to = %target, "Connected");
                        gained = true;
                    }
                    Ok(false) => {}
                    Err(e) => warn!(from = %entity, to = %target, error = %e, "Connect failed"),
                }
            }
            if gained {
                connected.push(entity);
            }
        }

        Ok(connected)
    }
}

fn dedup_issues(issues: &mut Vec<Issue>) {
    let mut seen = HashSet::new();
    issues.retain(|issue| seen.insert(issue.to_string()));
}
