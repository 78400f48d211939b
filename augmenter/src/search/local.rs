//! Offline evidence search using Tantivy (BM25)

use std::path::Path;

use async_trait::async_trait;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Schema, Value, INDEXED, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::{debug, info, warn};

use super::types::{EvidenceDocument, SearchHit};
use crate::adapters::{RawEvidence, SearchAdapter};
use crate::error::{AugmenterError, Result};

const WRITER_HEAP_BYTES: usize = 50_000_000;

#[derive(Clone, Copy)]
struct Fields {
    id: Field,
    title: Field,
    content: Field,
    source: Field,
    indexed_at: Field,
}

impl Fields {
    fn schema() -> (Schema, Self) {
        let mut builder = Schema::builder();
        let id = builder.add_text_field("id", STRING | STORED);
        let source = builder.add_text_field("source", STORED);
        let indexed_at = builder.add_date_field("indexed_at", INDEXED | STORED);
        let title = builder.add_text_field("title", TEXT | STORED);
        let content = builder.add_text_field("content", TEXT | STORED);
        (
            builder.build(),
            Self {
                id,
                title,
                content,
                source,
                indexed_at,
            },
        )
    }
}

/// Read side of the index; cheap to clone and shareable across tasks
#[derive(Clone)]
pub struct LocalSearcher {
    index: Index,
    reader: IndexReader,
    fields: Fields,
    limit: usize,
}

impl LocalSearcher {
    /// Results returned per [`SearchAdapter::search`] call
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Search title and content; malformed query syntax is tolerated
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let searcher = self.reader.searcher();
        let parser =
            QueryParser::for_index(&self.index, vec![self.fields.title, self.fields.content]);
        let (parsed, errors) = parser.parse_query_lenient(query);
        if !errors.is_empty() {
            debug!(query = %query, errors = errors.len(), "Lenient query parse");
        }

        let top_docs = searcher.search(&parsed, &TopDocs::with_limit(limit))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let retrieved: TantivyDocument = searcher.doc(address)?;

            // BM25 is unbounded; squash into 0-1
            let normalized = 1.0 / (1.0 + (-score).exp());

            hits.push(SearchHit {
                id: text_field(&retrieved, self.fields.id),
                score: normalized,
                title: text_field(&retrieved, self.fields.title),
                content: text_field(&retrieved, self.fields.content),
                source: text_field(&retrieved, self.fields.source),
            });
        }

        Ok(hits)
    }

    pub fn count(&self) -> usize {
        self.reader.searcher().num_docs() as usize
    }
}

#[async_trait]
impl SearchAdapter for LocalSearcher {
    fn name(&self) -> &str {
        "local"
    }

    async fn search(&self, query: &str) -> Result<Vec<RawEvidence>> {
        let hits = LocalSearcher::search(self, query, self.limit)?;
        Ok(hits.iter().map(SearchHit::to_raw_evidence).collect())
    }
}

/// Local BM25 index over evidence documents
pub struct LocalSearch {
    searcher: LocalSearcher,
    writer: Option<IndexWriter>,
}

impl LocalSearch {
    /// Open or create an index (read-write)
    pub fn open(index_path: impl AsRef<Path>) -> Result<Self> {
        Self::open_internal(index_path, true)
    }

    /// Open without taking the writer lock
    pub fn open_reader_only(index_path: impl AsRef<Path>) -> Result<Self> {
        Self::open_internal(index_path, false)
    }

    fn open_internal(index_path: impl AsRef<Path>, with_writer: bool) -> Result<Self> {
        let index_path = index_path.as_ref();
        info!(
            "Opening evidence index at {:?} (write_mode: {})",
            index_path, with_writer
        );

        let (schema, fields) = Fields::schema();

        std::fs::create_dir_all(index_path)?;
        let directory = tantivy::directory::MmapDirectory::open(index_path)
            .map_err(|e| AugmenterError::Index(e.into()))?;
        let index = Index::open_or_create(directory, schema)?;

        let writer = if with_writer {
            Some(index.writer(WRITER_HEAP_BYTES)?)
        } else {
            None
        };

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;

        Ok(Self {
            searcher: LocalSearcher {
                index,
                reader,
                fields,
                limit: 5,
            },
            writer,
        })
    }

    /// Add or replace a document (requires write mode)
    pub fn index_document(&mut self, document: &EvidenceDocument) -> Result<()> {
        let fields = self.searcher.fields;
        let Some(writer) = self.writer.as_mut() else {
            return Err(AugmenterError::Config(
                "cannot index: opened in read-only mode".to_string(),
            ));
        };

        writer.delete_term(Term::from_field_text(fields.id, &document.id));
        writer.add_document(doc!(
            fields.id => document.id.as_str(),
            fields.title => document.title.as_str(),
            fields.content => document.content.as_str(),
            fields.source => document.source.as_str(),
            fields.indexed_at => tantivy::DateTime::from_timestamp_secs(document.indexed_at.timestamp())
        ))?;

        debug!("Indexed document: {}", document.id);
        Ok(())
    }

    /// Commit pending changes and refresh the reader
    pub fn commit(&mut self) -> Result<()> {
        match self.writer {
            Some(ref mut writer) => {
                writer.commit()?;
                self.searcher.reader.reload()?;
            }
            None => warn!("Commit on a read-only index ignored"),
        }
        Ok(())
    }

    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        self.searcher.search(query, limit)
    }

    pub fn count(&self) -> usize {
        self.searcher.count()
    }

    /// Shareable read handle for use as a [`SearchAdapter`]
    pub fn searcher(&self) -> LocalSearcher {
        self.searcher.clone()
    }
}

fn text_field(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}
