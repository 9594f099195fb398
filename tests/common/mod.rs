//! Shared fixtures for the HTTP integration tests: an in-process router
//! over fake adapters, so a turn can be driven end to end without a
//! network call.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use conduit::adapters::{
    Adapters, ChatAdapter, DocQueryResult, DocRetrievalAdapter, GraphRagAdapter, GraphRagMode,
    TokenChunk, WebSearchAdapter,
};
use conduit::api::api_router;
use conduit::config::Config;
use conduit::error::AdapterError;
use conduit::model::{Message, SearchResult};
use conduit::state::AppState;
use futures::stream::BoxStream;

pub struct FakeChat;

#[async_trait]
impl ChatAdapter for FakeChat {
    async fn complete(
        &self,
        _prompt: &str,
        _temperature: f32,
        _max_tokens: u32,
        _system: Option<&str>,
        _history_tail: &[Message],
    ) -> Result<String, AdapterError> {
        Ok("a synthesized answer".to_string())
    }

    async fn stream(
        &self,
        _prompt: &str,
        _temperature: f32,
        _max_tokens: u32,
        _system: Option<&str>,
        _history_tail: &[Message],
    ) -> Result<BoxStream<'static, TokenChunk>, AdapterError> {
        let chunks = vec![
            TokenChunk { text: "hello ".into() },
            TokenChunk { text: "world".into() },
        ];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn complete_json(
        &self,
        _prompt: &str,
        _temperature: f32,
        _max_tokens: u32,
        _system: Option<&str>,
    ) -> Result<serde_json::Value, AdapterError> {
        Ok(serde_json::json!({
            "expanded_question": "what is the fixture question",
            "expert_analysis": "a brief expert read",
            "tasks": [
                {"type": "online_search", "query": "fixture query"},
                {"type": "knowledge_search", "query": "fixture query"},
            ],
        }))
    }
}

pub struct FakeWebSearch;

#[async_trait]
impl WebSearchAdapter for FakeWebSearch {
    async fn search(
        &self,
        query: &str,
        _n_results: usize,
        _lang: &str,
        _safe: bool,
    ) -> Result<Vec<SearchResult>, AdapterError> {
        Ok(vec![SearchResult {
            title: "web result".into(),
            content: format!("web content for {query}"),
            url: Some("https://example.test/result".into()),
            score: Some(0.9),
            source: "web_search".into(),
            metadata: HashMap::new(),
        }])
    }
}

pub struct FakeDocRetrieval;

#[async_trait]
impl DocRetrievalAdapter for FakeDocRetrieval {
    async fn query_doc(
        &self,
        _token: Option<&str>,
        _collection_id: &str,
        _query: &str,
        _k: usize,
    ) -> Result<DocQueryResult, AdapterError> {
        Ok(DocQueryResult {
            ids: vec![vec!["doc-1".into()]],
            documents: vec![vec!["fixture document text".into()]],
            metadatas: vec![vec![HashMap::new()]],
            distances: vec![vec![0.05]],
        })
    }

    async fn query_doc_by_name(
        &self,
        token: Option<&str>,
        name: &str,
        query: &str,
        k: usize,
    ) -> Result<(DocQueryResult, String), AdapterError> {
        let result = self.query_doc(token, name, query, k).await?;
        Ok((result, name.to_string()))
    }
}

/// A chat adapter whose `stream` call blocks until `release()` is called,
/// signalling entry via `entered()` — used to pin a driver mid-turn so a
/// second concurrent request can observe lock contention deterministically.
pub struct SlowChat {
    entered: tokio::sync::Notify,
    release: tokio::sync::Notify,
}

impl SlowChat {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        })
    }

    pub async fn wait_until_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl ChatAdapter for SlowChat {
    async fn complete(
        &self,
        _prompt: &str,
        _temperature: f32,
        _max_tokens: u32,
        _system: Option<&str>,
        _history_tail: &[Message],
    ) -> Result<String, AdapterError> {
        Ok("a synthesized answer".to_string())
    }

    async fn stream(
        &self,
        _prompt: &str,
        _temperature: f32,
        _max_tokens: u32,
        _system: Option<&str>,
        _history_tail: &[Message],
    ) -> Result<BoxStream<'static, TokenChunk>, AdapterError> {
        self.entered.notify_one();
        self.release.notified().await;
        let chunks = vec![TokenChunk { text: "done".into() }];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn complete_json(
        &self,
        _prompt: &str,
        _temperature: f32,
        _max_tokens: u32,
        _system: Option<&str>,
    ) -> Result<serde_json::Value, AdapterError> {
        Ok(serde_json::json!({
            "expanded_question": "q",
            "analysis": "a",
            "tasks": [{"type": "online_search", "query": "q"}],
        }))
    }
}

pub struct FakeGraphRag;

#[async_trait]
impl GraphRagAdapter for FakeGraphRag {
    async fn search(&self, query: &str, _mode: GraphRagMode) -> Result<Vec<SearchResult>, AdapterError> {
        Ok(vec![SearchResult {
            title: "graph answer".into(),
            content: format!("graph content for {query}"),
            url: None,
            score: None,
            source: "lightrag_answer".into(),
            metadata: HashMap::new(),
        }])
    }
}

/// Builds a router backed entirely by fake adapters and an in-memory
/// checkpoint store — no outbound network call is possible.
pub fn test_app() -> Router {
    test_app_with_chat(Arc::new(FakeChat))
}

pub fn test_app_with_chat(chat: Arc<dyn ChatAdapter>) -> Router {
    let config = Config::from_env();
    let adapters = Adapters {
        chat,
        web_search: Arc::new(FakeWebSearch),
        doc_retrieval: Arc::new(FakeDocRetrieval),
        graph_rag: Arc::new(FakeGraphRag),
    };

    let state = Arc::new(AppState {
        config,
        store: conduit::store::ConversationStore::new(),
        adapters,
        breakers: conduit::isolation::CircuitBreakers::default(),
        rate_limiter: conduit::isolation::RateLimiter::new(),
        checkpoint_store: Some(Arc::new(conduit::agent::MemoryCheckpointStore::new())),
    });

    api_router(state)
}
