//! # Augmenter
//!
//! An LLM-augmentation loop built around knowledge consolidation:
//! retrieve evidence for a query, link the entities it mentions into a
//! per-request graph, and cut the graph into ranked evidence chains. The
//! [`LlmAugmenter`] then generates, scores and refines a response grounded
//! in those chains.
//!
//! Completion, web search and entity lookup are reached through the traits
//! in [`adapters`], so the whole pipeline runs offline against the
//! in-memory adapters.

pub mod adapters;
pub mod augment;
pub mod chainer;
pub mod config;
pub mod consolidator;
pub mod error;
pub mod linker;
pub mod prompts;
pub mod retriever;
pub mod search;
pub mod text;

pub use adapters::{
    Adapters, CompletionAdapter, CompletionOptions, EntityEntry, LookupAdapter, RawEvidence,
    SearchAdapter,
};
pub use augment::{AugmentedResponse, LlmAugmenter, Policy, RulePolicy, UtilityScorer};
pub use chainer::{Chainer, RelevanceJudge};
pub use config::{AugmenterConfig, Credentials, PipelineConfig};
pub use consolidator::{Consolidation, EvidenceQuery, KnowledgeConsolidator};
pub use error::{AugmenterError, Issue, Result, Stage};
pub use linker::EntityLinker;
pub use retriever::Retriever;
pub use search::{EvidenceDocument, LocalSearch};

pub use augmenter_kg::{Evidence, EvidenceChain, GraphStore, KnowledgeNode};
