//! Process-wide application state threaded through the HTTP boundary via
//! `Arc<AppState>`, built once at startup the way `mira-chat/src/server.rs`'s
//! `AppState` is constructed in `run()` and handed to `create_router`.

use std::sync::Arc;

use crate::adapters::{
    Adapters, HttpDocRetrievalAdapter, HttpGraphRagAdapter, HttpWebSearchAdapter, OpenAiChatAdapter,
};
use crate::agent::{CheckpointStore, MemoryCheckpointStore, RemoteKvCheckpointStore};
use crate::config::Config;
use crate::isolation::{CircuitBreakers, RateLimiter};
use crate::store::ConversationStore;

/// Everything a request handler needs: the conversation store (C3), the
/// shared adapters (C1), the process-wide isolation primitives (C4), and
/// the optional agent-mode checkpoint store (C7).
pub struct AppState {
    pub config: Config,
    pub store: ConversationStore,
    pub adapters: Adapters,
    pub breakers: CircuitBreakers,
    pub rate_limiter: RateLimiter,
    pub checkpoint_store: Option<Arc<dyn CheckpointStore>>,
}

impl AppState {
    /// Builds the real HTTP-backed adapters from `config`; the checkpoint
    /// store is always constructed (agent mode is opt-in per request, not
    /// per deployment) — in-memory unless a Redis host was configured, in
    /// which case the remote-KV-shaped store is used, kept in-process.
    pub fn from_config(config: Config) -> Self {
        let adapters = Adapters {
            chat: Arc::new(OpenAiChatAdapter::new(
                config.openai_base_url.clone(),
                config.openai_api_key.clone(),
                config.openai_model.clone(),
            )),
            web_search: Arc::new(HttpWebSearchAdapter::new(
                config.search_engine_url.clone(),
                config.search_engine_api_key.clone(),
            )),
            doc_retrieval: Arc::new(HttpDocRetrievalAdapter::new(
                config.knowledge_api_url.clone(),
                config.knowledge_api_key.clone(),
            )),
            graph_rag: Arc::new(HttpGraphRagAdapter::new(
                config.lightrag_api_url.clone(),
                config.lightrag_api_key.clone(),
            )),
        };

        let checkpoint_store: Arc<dyn CheckpointStore> = if config.redis_password.is_some() {
            Arc::new(RemoteKvCheckpointStore::new(std::time::Duration::from_secs(
                config.redis_timeout * 60 * 60,
            )))
        } else {
            Arc::new(MemoryCheckpointStore::new())
        };

        Self {
            config,
            store: ConversationStore::new(),
            adapters,
            breakers: CircuitBreakers::default(),
            rate_limiter: RateLimiter::new(),
            checkpoint_store: Some(checkpoint_store),
        }
    }
}
