//! Error and issue types for the augmentation pipeline
//!
//! [`AugmenterError`] is what a call returns when it cannot produce a
//! result. [`Issue`] is a non-fatal degradation recorded inside a result:
//! one failed search query, one entity that would not resolve, a cycle cut
//! during chain extraction.

use std::fmt;

use augmenter_kg::KgError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AugmenterError {
    /// Collaborator (completion, search, lookup) call failed
    #[error("{adapter} adapter failed: {message}")]
    Adapter { adapter: String, message: String },

    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: String, millis: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    /// Every generation attempt failed
    #[error("No response could be generated: {0}")]
    NoResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Search index error: {0}")]
    Index(#[from] tantivy::TantivyError),

    #[error("Graph error: {0}")]
    Graph(#[from] KgError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AugmenterError>;

impl AugmenterError {
    pub fn adapter(adapter: impl Into<String>, message: impl Into<String>) -> Self {
        AugmenterError::Adapter {
            adapter: adapter.into(),
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AugmenterError::Cancelled)
    }
}

/// Pipeline stage an issue was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    QueryGeneration,
    Search,
    Extraction,
    Lookup,
    Connect,
    Relevance,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::QueryGeneration => "query_generation",
            Stage::Search => "search",
            Stage::Extraction => "extraction",
            Stage::Lookup => "lookup",
            Stage::Connect => "connect",
            Stage::Relevance => "relevance",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-fatal degradation reported alongside a consolidation result
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Issue {
    /// One unit's adapter call failed or timed out; the unit was skipped
    #[error("{stage} failed for '{unit}': {reason}")]
    AdapterFailure {
        stage: Stage,
        unit: String,
        reason: String,
    },

    /// Query generation produced no usable search queries
    #[error("no search queries generated")]
    NoSearchQueries,

    /// Entity extraction yielded zero usable names
    #[error("no entities found in '{unit}'")]
    NoEntitiesFound { unit: String },

    /// Linking produced no nodes
    #[error("evidence graph is empty")]
    EmptyGraph,

    /// A back-edge was refused during chain extraction
    #[error("cycle cut at {from} -> {to}")]
    CycleDetected { from: String, to: String },
}

impl Issue {
    pub fn adapter_failure(stage: Stage, unit: impl Into<String>, error: &AugmenterError) -> Self {
        Issue::AdapterFailure {
            stage,
            unit: unit.into(),
            reason: error.to_string(),
        }
    }

    /// Informational issues describe graph shape, not lost data
    pub fn is_informational(&self) -> bool {
        matches!(self, Issue::CycleDetected { .. })
    }
}

/// Shorten a unit of text for issue and log messages
pub(crate) fn excerpt(text: &str) -> String {
    const MAX_CHARS: usize = 60;
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(MAX_CHARS).collect();
    format!("{}...", cut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = AugmenterError::adapter("wikipedia", "status 503");
        assert_eq!(error.to_string(), "wikipedia adapter failed: status 503");

        let timeout = AugmenterError::Timeout {
            operation: "search".to_string(),
            millis: 30_000,
        };
        assert!(timeout.to_string().contains("timed out after 30000ms"));
        assert!(AugmenterError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_error_conversion() {
        let error: AugmenterError = KgError::EntityNotFound("Paris".to_string()).into();
        assert!(matches!(error, AugmenterError::Graph(_)));
    }

    #[test]
    fn test_issue_display() {
        let error = AugmenterError::adapter("bing", "quota exceeded");
        let issue = Issue::adapter_failure(Stage::Search, "eiffel tower location", &error);
        assert_eq!(
            issue.to_string(),
            "search failed for 'eiffel tower location': bing adapter failed: quota exceeded"
        );
        assert!(!issue.is_informational());

        let cycle = Issue::CycleDetected {
            from: "A".to_string(),
            to: "B".to_string(),
        };
        assert!(cycle.is_informational());
    }

    #[test]
    fn test_issue_serialization() {
        let issue = Issue::NoEntitiesFound {
            unit: "some text".to_string(),
        };
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["kind"], "no_entities_found");
        assert_eq!(json["unit"], "some text");
    }

    #[test]
    fn test_excerpt() {
        assert_eq!(excerpt("  short  "), "short");
        let long = "x".repeat(100);
        let cut = excerpt(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), 63);
    }
}
