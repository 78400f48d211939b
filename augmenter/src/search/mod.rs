//! Local evidence search
//!
//! A Tantivy BM25 index that can stand in for a web search adapter when
//! running offline.

pub mod local;
pub mod types;

pub use local::{LocalSearch, LocalSearcher};
pub use types::{EvidenceDocument, SearchHit};
