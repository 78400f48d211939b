//! Document and hit types for the local index

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A passage to be indexed as searchable evidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceDocument {
    /// Unique document ID; re-indexing the same ID replaces the document
    pub id: String,
    pub title: String,
    pub content: String,
    /// Provenance, usually a path or URL
    pub source: String,
    pub indexed_at: DateTime<Utc>,
}

impl EvidenceDocument {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            source: source.into(),
            indexed_at: Utc::now(),
        }
    }

    /// Read a text file; the file stem becomes the title
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().replace(['_', '-'], " "))
            .unwrap_or_default();
        let id = path.display().to_string();
        Ok(Self::new(id.clone(), title, content, id))
    }
}

/// Search result with relevance score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    /// Relevance score (0.0 - 1.0)
    pub score: f32,
    pub title: String,
    pub content: String,
    pub source: String,
}

impl SearchHit {
    /// Render as one unit of raw evidence
    pub fn to_raw_evidence(&self) -> String {
        if self.title.is_empty() {
            self.content.trim().to_string()
        } else {
            format!("{}: {}", self.title, self.content.trim())
        }
    }
}
