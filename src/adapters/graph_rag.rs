//! Graph-RAG adapter: flattens the upstream's `answer`, `contexts`, and
//! `entities` fields into `SearchResult`s.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::AdapterError;
use crate::model::SearchResult;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphRagMode {
    Naive,
    Local,
    Global,
    Hybrid,
    Mix,
}

impl GraphRagMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Naive => "naive",
            Self::Local => "local",
            Self::Global => "global",
            Self::Hybrid => "hybrid",
            Self::Mix => "mix",
        }
    }
}

impl Default for GraphRagMode {
    fn default() -> Self {
        // `lightrag_default_mode` env var overrides this at construction.
        Self::Hybrid
    }
}

#[async_trait]
pub trait GraphRagAdapter: Send + Sync {
    async fn search(&self, query: &str, mode: GraphRagMode) -> Result<Vec<SearchResult>, AdapterError>;
}

#[derive(Deserialize, Default)]
struct GraphRagResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    contexts: Vec<GraphRagContext>,
    #[serde(default)]
    entities: Vec<GraphRagEntity>,
}

#[derive(Deserialize)]
struct GraphRagContext {
    #[serde(default)]
    title: Option<String>,
    content: String,
}

#[derive(Deserialize)]
struct GraphRagEntity {
    name: String,
    #[serde(default)]
    description: String,
}

pub struct HttpGraphRagAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpGraphRagAdapter {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl GraphRagAdapter for HttpGraphRagAdapter {
    async fn search(&self, query: &str, mode: GraphRagMode) -> Result<Vec<SearchResult>, AdapterError> {
        let mut req = self.client.post(format!("{}/query", self.base_url));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let response = req
            .json(&serde_json::json!({ "query": query, "mode": mode.as_str() }))
            .timeout(DEFAULT_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::HttpStatus(status, body));
        }

        let parsed: GraphRagResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::Decode(e.to_string()))?;

        let mut results = Vec::new();
        if let Some(answer) = parsed.answer.filter(|a| !a.is_empty()) {
            results.push(SearchResult {
                title: "Graph-RAG answer".to_string(),
                content: answer,
                url: None,
                score: None,
                source: "lightrag_answer".to_string(),
                metadata: HashMap::new(),
            });
        }
        for ctx in parsed.contexts {
            results.push(SearchResult {
                title: ctx.title.unwrap_or_else(|| "context".to_string()),
                content: ctx.content,
                url: None,
                score: None,
                source: "lightrag_context".to_string(),
                metadata: HashMap::new(),
            });
        }
        for entity in parsed.entities {
            results.push(SearchResult {
                title: entity.name,
                content: entity.description,
                url: None,
                score: None,
                source: "lightrag_entity".to_string(),
                metadata: HashMap::new(),
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn search_flattens_answer_contexts_and_entities() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "answer": "the synthesized graph answer",
                "contexts": [{"title": "ctx title", "content": "ctx body"}],
                "entities": [{"name": "Entity A", "description": "an entity"}],
            })))
            .mount(&server)
            .await;

        let adapter = HttpGraphRagAdapter::new(server.uri(), None);
        let results = adapter.search("who is involved", GraphRagMode::Hybrid).await.unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].source, "lightrag_answer");
        assert_eq!(results[0].content, "the synthesized graph answer");
        assert_eq!(results[1].source, "lightrag_context");
        assert_eq!(results[1].title, "ctx title");
        assert_eq!(results[2].source, "lightrag_entity");
        assert_eq!(results[2].title, "Entity A");
    }
}
