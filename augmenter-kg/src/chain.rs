//! Evidence chain extraction
//!
//! Walks the evidence graph from root entities and collects non-duplicate
//! root-to-leaf paths. Walks are iterative and track visited nodes per
//! path, so cyclic graphs (entity descriptions that mention each other)
//! always terminate.

use std::collections::HashSet;

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{KgError, Result};
use crate::node::{EvidenceChain, KnowledgeNode};
use crate::store::GraphStore;

/// Limits for chain extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Maximum nodes per chain; longer walks are truncated
    pub max_depth: usize,
    /// Maximum chains returned
    pub max_chains: usize,
    /// Stop exploring after this many complete candidate paths
    pub max_candidates: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_depth: 4,
            max_chains: 8,
            max_candidates: 10_000,
        }
    }
}

impl ChainConfig {
    pub fn builder() -> ChainConfigBuilder {
        ChainConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_depth == 0 {
            return Err(KgError::InvalidConfig("max_depth must be at least 1".to_string()));
        }
        if self.max_chains == 0 {
            return Err(KgError::InvalidConfig("max_chains must be at least 1".to_string()));
        }
        if self.max_candidates < self.max_chains {
            return Err(KgError::InvalidConfig(
                "max_candidates must not be below max_chains".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`ChainConfig`]
#[derive(Debug, Default)]
pub struct ChainConfigBuilder {
    config: ChainConfig,
}

impl ChainConfigBuilder {
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.config.max_depth = depth;
        self
    }

    pub fn max_chains(mut self, chains: usize) -> Self {
        self.config.max_chains = chains;
        self
    }

    pub fn max_candidates(mut self, candidates: usize) -> Self {
        self.config.max_candidates = candidates;
        self
    }

    pub fn build(self) -> ChainConfig {
        self.config
    }
}

/// An edge skipped because its target was already on the path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CutCycle {
    pub from: String,
    pub to: String,
}

/// Output of one extraction run
#[derive(Debug, Clone, Default)]
pub struct ChainSet {
    /// Ranked, non-duplicate chains
    pub chains: Vec<EvidenceChain>,
    /// Distinct back-edges that were refused during the walk
    pub cycles: Vec<CutCycle>,
    /// Complete paths considered before deduplication
    pub candidates: usize,
    /// Whether `max_candidates` stopped the walk early
    pub exhausted: bool,
}

impl ChainSet {
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

pub struct ChainExtractor {
    config: ChainConfig,
}

impl ChainExtractor {
    pub fn new(config: ChainConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Extract chains starting at `roots`, walking only `relevant` entities.
    ///
    /// `weight` scores one node; a chain's score is the sum over its nodes.
    /// Roots that are missing from the store or not relevant are ignored.
    pub fn extract<F>(
        &self,
        store: &GraphStore,
        roots: &[String],
        relevant: &HashSet<String>,
        weight: F,
    ) -> ChainSet
    where
        F: Fn(&KnowledgeNode) -> f32,
    {
        let mut set = ChainSet::default();
        let mut cycles: HashSet<CutCycle> = HashSet::new();
        let mut paths: Vec<Vec<NodeIndex>> = Vec::new();

        let mut root_indices: Vec<NodeIndex> = Vec::new();
        for root in roots {
            if !relevant.contains(root) {
                continue;
            }
            if let Some(idx) = store.index_of(root) {
                if !root_indices.contains(&idx) {
                    root_indices.push(idx);
                }
            }
        }

        'roots: for root in root_indices {
            let mut stack: Vec<Vec<NodeIndex>> = vec![vec![root]];

            while let Some(path) = stack.pop() {
                let Some(&last) = path.last() else { continue };

                if path.len() >= self.config.max_depth {
                    paths.push(path);
                } else {
                    let mut extended = false;
                    let next: Vec<NodeIndex> = store
                        .successors(last)
                        .into_iter()
                        .filter(|&idx| relevant.contains(&store.node_at(idx).entity))
                        .collect();

                    // reversed so the alphabetically first successor is popped first
                    for idx in next.into_iter().rev() {
                        if path.contains(&idx) {
                            cycles.insert(CutCycle {
                                from: store.node_at(last).entity.clone(),
                                to: store.node_at(idx).entity.clone(),
                            });
                            continue;
                        }
                        let mut longer = path.clone();
                        longer.push(idx);
                        stack.push(longer);
                        extended = true;
                    }

                    if !extended {
                        paths.push(path);
                    }
                }

                if paths.len() >= self.config.max_candidates {
                    set.exhausted = true;
                    break 'roots;
                }
            }
        }

        set.candidates = paths.len();
        let kept = dedup_paths(paths);

        let mut chains: Vec<EvidenceChain> = kept
            .into_iter()
            .map(|path| {
                let nodes: Vec<&KnowledgeNode> =
                    path.iter().map(|&idx| store.node_at(idx)).collect();
                EvidenceChain {
                    entities: nodes.iter().map(|n| n.entity.clone()).collect(),
                    evidence: nodes.iter().map(|n| n.to_evidence()).collect(),
                    score: nodes.iter().map(|&n| weight(n)).sum(),
                }
            })
            .collect();

        chains.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.len().cmp(&a.len()))
                .then_with(|| a.entities.cmp(&b.entities))
        });
        chains.truncate(self.config.max_chains);

        let mut cycles: Vec<CutCycle> = cycles.into_iter().collect();
        cycles.sort_by(|a, b| (&a.from, &a.to).cmp(&(&b.from, &b.to)));

        debug!(
            candidates = set.candidates,
            chains = chains.len(),
            cycles = cycles.len(),
            "Extracted evidence chains"
        );

        set.chains = chains;
        set.cycles = cycles;
        set
    }
}

/// Drop exact repeats and paths that prefix a longer kept path
fn dedup_paths(mut paths: Vec<Vec<NodeIndex>>) -> Vec<Vec<NodeIndex>> {
    // longest first: any prefix is seen after the path that extends it
    paths.sort_by(|a, b| b.len().cmp(&a.len()));

    let mut kept: Vec<Vec<NodeIndex>> = Vec::with_capacity(paths.len());
    for path in paths {
        if kept.iter().any(|longer| longer.starts_with(&path)) {
            continue;
        }
        kept.push(path);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(names: &[&str], edges: &[(&str, &str)]) -> GraphStore {
        let mut store = GraphStore::new();
        for name in names {
            store.insert(KnowledgeNode::new(*name, format!("About {}", name), format!("src:{}", name)));
        }
        for (from, to) in edges {
            store.connect(from, to).unwrap();
        }
        store
    }

    fn all(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn roots(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn extractor() -> ChainExtractor {
        ChainExtractor::new(ChainConfig::default()).unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(ChainConfig::default().validate().is_ok());
        assert!(ChainConfig::builder().max_depth(0).build().validate().is_err());
        assert!(ChainConfig::builder().max_chains(0).build().validate().is_err());
        assert!(ChainConfig::builder()
            .max_chains(10)
            .max_candidates(5)
            .build()
            .validate()
            .is_err());
        assert!(ChainExtractor::new(ChainConfig::builder().max_depth(0).build()).is_err());
    }

    #[test]
    fn test_empty_store() {
        let store = GraphStore::new();
        let set = extractor().extract(&store, &roots(&["A"]), &all(&["A"]), |_| 1.0);
        assert!(set.is_empty());
        assert_eq!(set.candidates, 0);
    }

    #[test]
    fn test_fan_out_chains() {
        let store = store_with(
            &["Eiffel Tower", "Paris", "Gustave Eiffel"],
            &[("Eiffel Tower", "Paris"), ("Eiffel Tower", "Gustave Eiffel")],
        );
        let relevant = all(&["Eiffel Tower", "Paris", "Gustave Eiffel"]);
        let set = extractor().extract(&store, &roots(&["Eiffel Tower"]), &relevant, |_| 1.0);

        let entities: Vec<Vec<String>> = set.chains.iter().map(|c| c.entities.clone()).collect();
        assert_eq!(
            entities,
            vec![
                vec!["Eiffel Tower".to_string(), "Gustave Eiffel".to_string()],
                vec!["Eiffel Tower".to_string(), "Paris".to_string()],
            ]
        );
        assert_eq!(set.chains[0].evidence[1].source, "src:Gustave Eiffel");
        assert_eq!(set.chains[0].score, 2.0);
    }

    #[test]
    fn test_two_node_cycle_terminates() {
        let store = store_with(&["A", "B"], &[("A", "B"), ("B", "A")]);
        let set = extractor().extract(&store, &roots(&["A"]), &all(&["A", "B"]), |_| 1.0);

        assert_eq!(set.chains.len(), 1);
        assert_eq!(set.chains[0].entities, vec!["A", "B"]);
        assert_eq!(
            set.cycles,
            vec![CutCycle { from: "B".to_string(), to: "A".to_string() }]
        );
    }

    #[test]
    fn test_self_loop_terminates() {
        let mut store = GraphStore::new().allow_self_loops();
        store.insert(KnowledgeNode::new("A", "A mentions A", "s"));
        store.insert(KnowledgeNode::new("B", "", "s"));
        store.connect("A", "A").unwrap();
        store.connect("A", "B").unwrap();

        let set = extractor().extract(&store, &roots(&["A"]), &all(&["A", "B"]), |_| 1.0);
        assert_eq!(set.chains.len(), 1);
        assert_eq!(set.chains[0].entities, vec!["A", "B"]);
        assert!(set.cycles.iter().any(|c| c.from == "A" && c.to == "A"));
    }

    #[test]
    fn test_no_chain_revisits_a_node() {
        // Dense cyclic graph: every node mentions every other node
        let names = ["A", "B", "C", "D", "E"];
        let mut edges = vec![];
        for from in names {
            for to in names {
                if from != to {
                    edges.push((from, to));
                }
            }
        }
        let store = store_with(&names, &edges);
        let config = ChainConfig::builder().max_depth(5).max_chains(1000).build();
        let set = ChainExtractor::new(config)
            .unwrap()
            .extract(&store, &roots(&names), &all(&names), |_| 1.0);

        assert!(!set.chains.is_empty());
        for chain in &set.chains {
            let unique: HashSet<&String> = chain.entities.iter().collect();
            assert_eq!(unique.len(), chain.entities.len());
            assert!(chain.len() <= 5);
        }
    }

    #[test]
    fn test_no_prefix_or_duplicate_chains() {
        let names = ["A", "B", "C", "D"];
        let store = store_with(
            &names,
            &[("A", "B"), ("B", "C"), ("A", "C"), ("C", "D"), ("D", "B")],
        );
        let config = ChainConfig::builder().max_depth(3).max_chains(100).build();
        let set = ChainExtractor::new(config)
            .unwrap()
            .extract(&store, &roots(&["A", "B", "A"]), &all(&names), |_| 1.0);

        for (i, a) in set.chains.iter().enumerate() {
            for (j, b) in set.chains.iter().enumerate() {
                if i != j {
                    assert!(!a.is_prefix_of(b), "{:?} prefixes {:?}", a.entities, b.entities);
                }
            }
        }
    }

    #[test]
    fn test_depth_truncation() {
        let store = store_with(&["A", "B", "C", "D"], &[("A", "B"), ("B", "C"), ("C", "D")]);
        let config = ChainConfig::builder().max_depth(2).build();
        let set = ChainExtractor::new(config)
            .unwrap()
            .extract(&store, &roots(&["A"]), &all(&["A", "B", "C", "D"]), |_| 1.0);

        assert_eq!(set.chains.len(), 1);
        assert_eq!(set.chains[0].entities, vec!["A", "B"]);
    }

    #[test]
    fn test_irrelevant_nodes_are_skipped() {
        let store = store_with(&["A", "B", "C"], &[("A", "B"), ("B", "C")]);
        let set = extractor().extract(&store, &roots(&["A"]), &all(&["A", "C"]), |_| 1.0);

        assert_eq!(set.chains.len(), 1);
        assert_eq!(set.chains[0].entities, vec!["A"]);

        let set = extractor().extract(&store, &roots(&["B"]), &all(&["A", "C"]), |_| 1.0);
        assert!(set.is_empty());
    }

    #[test]
    fn test_ranking_and_truncation() {
        let store = store_with(
            &["Root", "Weak", "Strong", "Medium"],
            &[("Root", "Weak"), ("Root", "Strong"), ("Root", "Medium")],
        );
        let config = ChainConfig::builder().max_chains(2).build();
        let weight = |node: &KnowledgeNode| match node.entity.as_str() {
            "Strong" => 3.0,
            "Medium" => 2.0,
            _ => 0.0,
        };
        let set = ChainExtractor::new(config).unwrap().extract(
            &store,
            &roots(&["Root"]),
            &all(&["Root", "Weak", "Strong", "Medium"]),
            weight,
        );

        assert_eq!(set.candidates, 3);
        assert_eq!(set.chains.len(), 2);
        assert_eq!(set.chains[0].entities[1], "Strong");
        assert_eq!(set.chains[1].entities[1], "Medium");
    }

    #[test]
    fn test_candidate_budget_stops_walk() {
        let names = ["A", "B", "C", "D", "E", "F"];
        let mut edges = vec![];
        for from in names {
            for to in names {
                if from != to {
                    edges.push((from, to));
                }
            }
        }
        let store = store_with(&names, &edges);
        let config = ChainConfig::builder()
            .max_depth(6)
            .max_chains(5)
            .max_candidates(20)
            .build();
        let set = ChainExtractor::new(config)
            .unwrap()
            .extract(&store, &roots(&["A"]), &all(&names), |_| 1.0);

        assert!(set.exhausted);
        assert_eq!(set.candidates, 20);
        assert_eq!(set.chains.len(), 5);
    }
}
