//! # Augmenter Knowledge Graph (augmenter-kg)
//!
//! The evidence graph behind knowledge consolidation: a registry of
//! [`KnowledgeNode`]s keyed by entity name, the "mentions" edges between
//! them, and the chain extraction that turns the graph into a handful of
//! [`EvidenceChain`]s for a response generator.
//!
//! A [`GraphStore`] lives for exactly one consolidation request. It never
//! holds two nodes for the same entity: a second description is merged
//! according to its [`MergePolicy`].
//!
//! ```
//! use std::collections::HashSet;
//! use augmenter_kg::{ChainConfig, ChainExtractor, GraphStore, KnowledgeNode};
//!
//! let mut store = GraphStore::new();
//! store.insert(KnowledgeNode::new("Eiffel Tower", "Tower in Paris", "https://en.wikipedia.org/wiki/Eiffel_Tower"));
//! store.insert(KnowledgeNode::new("Paris", "Capital of France", "https://en.wikipedia.org/wiki/Paris"));
//! store.connect("Eiffel Tower", "Paris").unwrap();
//!
//! let relevant: HashSet<String> = store.nodes().map(|n| n.entity.clone()).collect();
//! let extractor = ChainExtractor::new(ChainConfig::default()).unwrap();
//! let set = extractor.extract(&store, &["Eiffel Tower".to_string()], &relevant, |_| 1.0);
//!
//! assert_eq!(set.chains.len(), 1);
//! assert_eq!(set.chains[0].entities, vec!["Eiffel Tower", "Paris"]);
//! ```

pub mod chain;
pub mod error;
pub mod node;
pub mod store;

// Re-export main types for convenience
pub use chain::{ChainConfig, ChainConfigBuilder, ChainExtractor, ChainSet, CutCycle};
pub use error::{KgError, Result};
pub use node::{Evidence, EvidenceChain, KnowledgeNode};
pub use store::{GraphStats, GraphStore, MergePolicy, Upsert};
