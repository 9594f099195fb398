//! HTTP surface: route table over the nine endpoints, wired to
//! `Arc<AppState>`. Access logging is a `TraceLayer`, the way
//! `mira-chat/src/server.rs` composes its router's middleware stack.

mod handlers;
pub mod types;
mod validation;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/v1/conversations",
            post(handlers::create_conversation).get(handlers::list_conversations),
        )
        .route("/api/v1/conversations/{id}/messages", post(handlers::send_message))
        .route("/api/v1/conversations/{id}/stream", post(handlers::stream_conversation))
        .route("/api/v1/conversations/{id}/history", get(handlers::history))
        .route("/api/v1/conversations/{id}/summary", get(handlers::summary))
        .route("/api/v1/conversations/{id}", delete(handlers::delete_conversation))
        .route("/api/v1/statistics", get(handlers::statistics))
        .route("/api/v1/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
