//! External-service adapters (C1): typed wrappers over the chat,
//! web-search, document-retrieval, and graph-RAG backends. Each adapter
//! enforces its own per-call timeout and returns `AdapterError` rather
//! than retrying — retries belong to operators.

mod chat;
pub mod doc_retrieval;
mod graph_rag;
mod web_search;

pub use chat::{parse_json_lenient as chat_parse_json_lenient, ChatAdapter, OpenAiChatAdapter, TokenChunk};
pub use doc_retrieval::{DocRetrievalAdapter, DocQueryResult, HttpDocRetrievalAdapter, DEFAULT_COLLECTION};
pub use graph_rag::{GraphRagAdapter, GraphRagMode, HttpGraphRagAdapter};
pub use web_search::{HttpWebSearchAdapter, WebSearchAdapter};

use std::sync::Arc;

/// Bundles the four adapters a request's retrieval stages need. Threaded
/// through `Arc<AppState>` so HTTP clients are shared and pool-backed.
#[derive(Clone)]
pub struct Adapters {
    pub chat: Arc<dyn ChatAdapter>,
    pub web_search: Arc<dyn WebSearchAdapter>,
    pub doc_retrieval: Arc<dyn DocRetrievalAdapter>,
    pub graph_rag: Arc<dyn GraphRagAdapter>,
}
