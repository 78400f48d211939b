use std::collections::{HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{KgError, Result};
use crate::node::KnowledgeNode;

/// What to do when a second description arrives for a known entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// The first description wins
    KeepFirst,
    /// The longer description wins; ties go to the smaller `(text, source)`
    #[default]
    KeepLongest,
    /// The most recent description wins
    KeepLatest,
}

impl MergePolicy {
    /// Whether `incoming` should replace `existing`
    fn prefers(&self, existing: &KnowledgeNode, incoming: &KnowledgeNode) -> bool {
        match self {
            MergePolicy::KeepFirst => false,
            MergePolicy::KeepLatest => {
                existing.text != incoming.text || existing.source != incoming.source
            }
            MergePolicy::KeepLongest => {
                let (old_len, new_len) = (existing.text.len(), incoming.text.len());
                new_len > old_len
                    || (new_len == old_len
                        && (&incoming.text, &incoming.source) < (&existing.text, &existing.source))
            }
        }
    }
}

/// Result of inserting a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// New entity
    Inserted,
    /// Existing entity, description replaced
    Merged,
    /// Existing entity, description kept
    Kept,
}

/// Evidence graph scoped to one consolidation request.
///
/// Nodes live in a petgraph arena keyed by entity name; edges mean "this
/// node's text mentions that entity".
pub struct GraphStore {
    graph: DiGraph<KnowledgeNode, ()>,
    indices: HashMap<String, NodeIndex>,
    // lowercase entity -> first node with that spelling
    folded: HashMap<String, NodeIndex>,
    merge_policy: MergePolicy,
    allow_self_loops: bool,
}

impl GraphStore {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            indices: HashMap::new(),
            folded: HashMap::new(),
            merge_policy: MergePolicy::default(),
            allow_self_loops: false,
        }
    }

    pub fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }

    /// Record `a -> a` edges instead of silently dropping them
    pub fn allow_self_loops(mut self) -> Self {
        self.allow_self_loops = true;
        self
    }

    pub fn merge_policy(&self) -> MergePolicy {
        self.merge_policy
    }

    /// Insert a node, merging into the existing node of the same entity
    pub fn insert(&mut self, node: KnowledgeNode) -> Upsert {
        if let Some(&idx) = self.indices.get(&node.entity) {
            let existing = &mut self.graph[idx];
            if self.merge_policy.prefers(existing, &node) {
                debug!(entity = %node.entity, "Merged new description into existing node");
                existing.text = node.text;
                existing.source = node.source;
                return Upsert::Merged;
            }
            return Upsert::Kept;
        }

        let entity = node.entity.clone();
        let idx = self.graph.add_node(node);
        self.folded.entry(entity.to_lowercase()).or_insert(idx);
        self.indices.insert(entity, idx);
        Upsert::Inserted
    }

    /// Exact lookup by entity name
    pub fn get(&self, entity: &str) -> Option<&KnowledgeNode> {
        self.indices.get(entity).map(|&idx| &self.graph[idx])
    }

    /// Lookup by exact name, then case-insensitively
    pub fn resolve(&self, name: &str) -> Option<&KnowledgeNode> {
        let name = name.trim();
        self.indices
            .get(name)
            .or_else(|| self.folded.get(&name.to_lowercase()))
            .map(|&idx| &self.graph[idx])
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.indices.contains_key(entity)
    }

    /// Add a directed edge `from -> to`.
    ///
    /// Returns `Ok(true)` when a new edge was recorded, `Ok(false)` when it
    /// already existed or was a rejected self-loop.
    pub fn connect(&mut self, from: &str, to: &str) -> Result<bool> {
        let from_idx = *self
            .indices
            .get(from)
            .ok_or_else(|| KgError::EntityNotFound(from.to_string()))?;
        let to_idx = *self
            .indices
            .get(to)
            .ok_or_else(|| KgError::EntityNotFound(to.to_string()))?;

        if from_idx == to_idx && !self.allow_self_loops {
            debug!(entity = %from, "Skipped self-reference");
            return Ok(false);
        }
        if self.graph.contains_edge(from_idx, to_idx) {
            return Ok(false);
        }

        self.graph.add_edge(from_idx, to_idx, ());
        Ok(true)
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        match (self.indices.get(from), self.indices.get(to)) {
            (Some(&a), Some(&b)) => self.graph.contains_edge(a, b),
            _ => false,
        }
    }

    /// Outbound neighbours of an entity, ordered by name
    pub fn neighbors(&self, entity: &str) -> Vec<&KnowledgeNode> {
        let Some(&idx) = self.indices.get(entity) else {
            return vec![];
        };

        self.successors(idx)
            .into_iter()
            .map(|next| &self.graph[next])
            .collect()
    }

    /// All nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &KnowledgeNode> {
        self.graph.node_indices().map(move |idx| &self.graph[idx])
    }

    /// All edges as `(from, to)` entity pairs
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.graph
            .edge_references()
            .map(|edge| {
                (
                    self.graph[edge.source()].entity.as_str(),
                    self.graph[edge.target()].entity.as_str(),
                )
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Nodes of `subset` with no incoming edge from another node of `subset`
    pub fn sources(&self, subset: &HashSet<String>) -> Vec<&KnowledgeNode> {
        self.graph
            .node_indices()
            .filter(|&idx| subset.contains(&self.graph[idx].entity))
            .filter(|&idx| {
                !self
                    .graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .any(|pred| pred != idx && subset.contains(&self.graph[pred].entity))
            })
            .map(|idx| &self.graph[idx])
            .collect()
    }

    /// Nodes whose entity name appears as a whole phrase in `text`
    pub fn mentioned_in(&self, text: &str) -> Vec<&KnowledgeNode> {
        let haystack = text.to_lowercase();
        self.nodes()
            .filter(|node| contains_phrase(&haystack, &node.entity.to_lowercase()))
            .collect()
    }

    pub fn stats(&self) -> GraphStats {
        let self_loops = self
            .graph
            .edge_references()
            .filter(|edge| edge.source() == edge.target())
            .count();
        let isolated = self
            .graph
            .node_indices()
            .filter(|&idx| self.graph.neighbors_undirected(idx).next().is_none())
            .count();

        GraphStats {
            nodes: self.graph.node_count(),
            edges: self.graph.edge_count(),
            self_loops,
            isolated,
        }
    }

    pub(crate) fn index_of(&self, entity: &str) -> Option<NodeIndex> {
        self.indices.get(entity).copied()
    }

    pub(crate) fn node_at(&self, idx: NodeIndex) -> &KnowledgeNode {
        &self.graph[idx]
    }

    /// Successor indices ordered by entity name, for deterministic walks
    pub(crate) fn successors(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut next: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .collect();
        next.sort_by(|a, b| self.graph[*a].entity.cmp(&self.graph[*b].entity));
        next.dedup();
        next
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub self_loops: usize,
    pub isolated: usize,
}

/// Phrase search with word boundaries on both sides; callers fold case
pub fn contains_phrase(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }

    let mut from = 0;
    while let Some(pos) = haystack[from..].find(needle) {
        let start = from + pos;
        let end = start + needle.len();
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        // advance one char past this match start
        from = start + haystack[start..].chars().next().map_or(1, char::len_utf8);
    }
    false
}
