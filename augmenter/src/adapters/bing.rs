use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use tracing::debug;

use super::{RawEvidence, SearchAdapter};
use crate::error::{AugmenterError, Result};

const BING_ENDPOINT: &str = "https://api.bing.microsoft.com/v7.0/search";

#[derive(Debug, Deserialize)]
struct BingResponse {
    #[serde(rename = "webPages", default)]
    web_pages: Option<WebPages>,
}

#[derive(Debug, Deserialize)]
struct WebPages {
    #[serde(default)]
    value: Vec<WebPage>,
}

#[derive(Debug, Deserialize)]
struct WebPage {
    name: String,
    #[serde(default)]
    snippet: String,
}

/// Web search through the Bing v7 API
#[derive(Clone)]
pub struct BingSearch {
    http_client: HttpClient,
    subscription_key: String,
    endpoint: String,
    max_results: usize,
}

impl std::fmt::Debug for BingSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BingSearch")
            .field("endpoint", &self.endpoint)
            .field("max_results", &self.max_results)
            .finish()
    }
}

impl BingSearch {
    pub fn new(subscription_key: impl Into<String>) -> Self {
        Self {
            http_client: HttpClient::new(),
            subscription_key: subscription_key.into(),
            endpoint: BING_ENDPOINT.to_string(),
            max_results: 5,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }
}

/// `"{name}: {snippet}"` per page, blank snippets dropped
fn snippets(response: BingResponse, limit: usize) -> Vec<RawEvidence> {
    response
        .web_pages
        .map(|pages| pages.value)
        .unwrap_or_default()
        .into_iter()
        .filter(|page| !page.snippet.trim().is_empty())
        .take(limit)
        .map(|page| format!("{}: {}", page.name.trim(), page.snippet.trim()))
        .collect()
}

#[async_trait]
impl SearchAdapter for BingSearch {
    fn name(&self) -> &str {
        "bing"
    }

    async fn search(&self, query: &str) -> Result<Vec<RawEvidence>> {
        debug!(query = %query, "Bing search");

        let response = self
            .http_client
            .get(&self.endpoint)
            .header("Ocp-Apim-Subscription-Key", &self.subscription_key)
            .query(&[("q", query), ("count", &self.max_results.to_string())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AugmenterError::adapter(self.name(), format!("status {}", status)));
        }

        let body: BingResponse = response.json().await?;
        Ok(snippets(body, self.max_results))
    }
}
