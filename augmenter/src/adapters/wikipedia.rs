use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{EntityEntry, LookupAdapter};
use crate::error::{AugmenterError, Result};

const WIKIPEDIA_BASE_URL: &str = "https://en.wikipedia.org/api/rest_v1";

#[derive(Debug, Deserialize)]
struct PageSummary {
    #[serde(rename = "type", default)]
    kind: String,
    title: String,
    #[serde(default)]
    extract: String,
    #[serde(default)]
    content_urls: Option<ContentUrls>,
}

#[derive(Debug, Deserialize)]
struct ContentUrls {
    desktop: PageUrl,
}

#[derive(Debug, Deserialize)]
struct PageUrl {
    page: String,
}

/// Entity lookup via the Wikipedia REST page-summary endpoint
#[derive(Debug, Clone)]
pub struct WikipediaLookup {
    http_client: HttpClient,
    base_url: String,
}

impl WikipediaLookup {
    pub fn new() -> Self {
        Self {
            http_client: HttpClient::new(),
            base_url: WIKIPEDIA_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn summary_url(&self, name: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| AugmenterError::Config(format!("invalid lookup base url: {}", e)))?;
        let title = name.trim().replace(' ', "_");
        url.path_segments_mut()
            .map_err(|_| AugmenterError::Config("lookup base url cannot have a path".to_string()))?
            .extend(["page", "summary", title.as_str()]);
        Ok(url)
    }
}

impl Default for WikipediaLookup {
    fn default() -> Self {
        Self::new()
    }
}

/// Disambiguation pages and empty extracts are not entries
fn into_entry(summary: PageSummary) -> Option<EntityEntry> {
    if summary.kind == "disambiguation" || summary.extract.trim().is_empty() {
        return None;
    }

    let source_url = summary
        .content_urls
        .map(|urls| urls.desktop.page)
        .unwrap_or_else(|| {
            format!("https://en.wikipedia.org/wiki/{}", summary.title.replace(' ', "_"))
        });

    Some(EntityEntry::new(summary.title, summary.extract.trim(), source_url))
}

#[async_trait]
impl LookupAdapter for WikipediaLookup {
    fn name(&self) -> &str {
        "wikipedia"
    }

    async fn lookup(&self, name: &str) -> Result<Option<EntityEntry>> {
        let url = self.summary_url(name)?;
        debug!(entity = %name, "Wikipedia lookup");

        let response = self.http_client.get(url).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(AugmenterError::adapter(self.name(), format!("status {}", status)));
        }

        let summary: PageSummary = response.json().await?;
        Ok(into_entry(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_url_escapes_title() {
        let lookup = WikipediaLookup::new();
        let url = lookup.summary_url("Gustave Eiffel").unwrap();
        assert_eq!(
            url.as_str(),
            "https://en.wikipedia.org/api/rest_v1/page/summary/Gustave_Eiffel"
        );

        let url = lookup.summary_url("AC/DC").unwrap();
        assert!(url.as_str().ends_with("/page/summary/AC%2FDC"));
    }

    #[test]
    fn test_into_entry() {
        let json = r#"{
            "type": "standard",
            "title": "Eiffel Tower",
            "extract": "The Eiffel Tower is a wrought-iron lattice tower in Paris.",
            "content_urls": {"desktop": {"page": "https://en.wikipedia.org/wiki/Eiffel_Tower"}}
        }"#;
        let entry = into_entry(serde_json::from_str(json).unwrap()).unwrap();

        assert_eq!(entry.canonical_name, "Eiffel Tower");
        assert_eq!(entry.source_url, "https://en.wikipedia.org/wiki/Eiffel_Tower");
    }

    #[test]
    fn test_disambiguation_is_none() {
        let json = r#"{"type": "disambiguation", "title": "Mercury", "extract": "Mercury may refer to:"}"#;
        assert!(into_entry(serde_json::from_str(json).unwrap()).is_none());

        let empty = r#"{"type": "standard", "title": "Stub", "extract": ""}"#;
        assert!(into_entry(serde_json::from_str(empty).unwrap()).is_none());
    }
}
