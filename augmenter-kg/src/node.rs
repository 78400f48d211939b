//! Node and evidence types of the evidence graph

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// One resolved entity in the evidence graph.
///
/// Identity is the `entity` name alone: two nodes with the same name are
/// equal (and hash the same) whatever their description or source. Outbound
/// links are held by [`GraphStore`](crate::GraphStore), not by the node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeNode {
    /// Canonical entity name, unique within a store
    pub entity: String,
    /// Descriptive content backing this entity
    pub text: String,
    /// Provenance of the description (usually a URL)
    pub source: String,
}

impl KnowledgeNode {
    pub fn new(
        entity: impl Into<String>,
        text: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            entity: entity.into(),
            text: text.into(),
            source: source.into(),
        }
    }

    /// Strip graph identity, keeping the fact and its provenance
    pub fn to_evidence(&self) -> Evidence {
        Evidence {
            text: self.text.clone(),
            source: self.source.clone(),
        }
    }
}

impl PartialEq for KnowledgeNode {
    fn eq(&self, other: &Self) -> bool {
        self.entity == other.entity
    }
}

impl Eq for KnowledgeNode {}

impl Hash for KnowledgeNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entity.hash(state);
    }
}

/// A `(text, source)` fact ready for prompt injection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub text: String,
    pub source: String,
}

impl Evidence {
    pub fn new(text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: source.into(),
        }
    }
}

/// One root-to-leaf line of reasoning through the evidence graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceChain {
    /// Entity names along the path, root first
    pub entities: Vec<String>,
    /// `evidence[i]` is drawn from the node named `entities[i]`
    pub evidence: Vec<Evidence>,
    /// Ranking score assigned at extraction
    pub score: f32,
}

impl EvidenceChain {
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn root(&self) -> Option<&str> {
        self.entities.first().map(String::as_str)
    }

    /// True when this chain's entity sequence starts `other`'s (or equals it)
    pub fn is_prefix_of(&self, other: &EvidenceChain) -> bool {
        other.entities.starts_with(&self.entities)
    }

    pub fn into_evidence(self) -> Vec<Evidence> {
        self.evidence
    }
}
