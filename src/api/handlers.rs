//! Request handlers for the HTTP surface. Each handler follows the
//! boundary shape from `src/error.rs`'s `ApiError`: fallible handlers
//! return `ApiResult<Json<...>>`, the streaming handler returns a raw
//! `axum::response::Response` so the SSE body can be built without axum's
//! `Sse<Event>` wrapper re-prefixing frames that `StreamEvent::to_sse_frame`
//! already formats in full.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::agent;
use crate::error::{ApiError, ApiResult, ErrorCode, StageError, StoreError};
use crate::model::{ConversationTask, Mode, Role, TaskStatus};
use crate::state::AppState;
use crate::stream::{multiplex, StreamEvent, SENTINEL_FRAME};
use crate::workflow;

use super::types::{
    ApiResponse, ChatMessageData, ChatRequest, ChatResponseItem, ConversationSummaryItem,
    CreateConversationData, CreateConversationRequest, DeleteConversationData, HealthResponse,
    HistoryData, ListConversationsData, ListConversationsQuery, MessageDto, SummaryData,
};
use super::validation::{extract_token, validate_message};

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

fn status_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Running => "running",
        TaskStatus::Completed => "completed",
        TaskStatus::Error => "error",
        TaskStatus::Cancelled => "cancelled",
    }
}

pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateConversationRequest>,
) -> ApiResult<Json<ApiResponse<CreateConversationData>>> {
    let mode = match req.mode.as_deref() {
        Some(raw) => Mode::parse(raw)
            .ok_or_else(|| ApiError::unsupported_mode(format!("unsupported mode: {raw}")))?,
        None => Mode::Workflow,
    };

    let token = extract_token(&headers, req.user.as_ref().and_then(|u| u.token.as_deref()));

    let (conversation_id, is_custom_id) = state
        .store
        .create(
            req.user_id.clone(),
            mode,
            req.conversation_id.clone(),
            req.knowledge_bases.clone(),
            req.knowledge_api_url.clone(),
            token,
        )
        .await;

    let handle = state.store.get(&conversation_id).await?;
    let created_at = handle.lock().await.created_at;

    Ok(Json(ApiResponse::ok(CreateConversationData {
        conversation_id,
        user_id: req.user_id,
        mode: mode.as_str().to_string(),
        created_at,
        is_custom_id,
    })))
}

/// Spawns the mode-appropriate driver over an owned conversation-lock
/// guard, syncing the store's registry mirror once the driver finishes so
/// `list`/`statistics` observe the terminal state without contending the
/// per-conversation lock themselves. Returns the task's `AbortHandle`
/// alongside its `JoinHandle` so a caller can cancel it after handing the
/// `JoinHandle` itself off to the multiplexer.
fn spawn_driver(
    state: Arc<AppState>,
    mut guard: OwnedMutexGuard<ConversationTask>,
    mode: Mode,
    user_message: String,
    tx: mpsc::Sender<StreamEvent>,
) -> (JoinHandle<Result<(), StageError>>, AbortHandle) {
    let handle = tokio::spawn(async move {
        let result = match mode {
            Mode::Workflow => {
                workflow::drive(&mut guard, &state.adapters, &state.breakers, user_message, tx).await
            }
            Mode::Agent => {
                agent::drive(
                    &mut guard,
                    &state.adapters,
                    &state.breakers,
                    user_message,
                    tx,
                    state.checkpoint_store.as_deref(),
                )
                .await
            }
        };
        if let Err(err) = &result {
            guard.record_error(err.to_string());
        }
        state.store.sync_registry(&guard.conversation_id.clone(), &guard).await;
        result
    });
    let abort_handle = handle.abort_handle();
    (handle, abort_handle)
}

/// Prepares a conversation for one driven turn: validates the message,
/// checks the rate limiter, and acquires the per-conversation lock (I3).
async fn acquire_turn(
    state: &Arc<AppState>,
    conversation_id: &str,
    req: &ChatRequest,
    headers: &HeaderMap,
) -> Result<(OwnedMutexGuard<ConversationTask>, Mode, String), ApiError> {
    let message = validate_message(&req.message)?;
    state.rate_limiter.check(&req.user_id)?;

    let mut guard = state.store.try_acquire(conversation_id).await?;
    let token = extract_token(headers, req.user.as_ref().and_then(|u| u.token.as_deref()));
    if let Some(token) = token {
        guard.user_token = Some(token);
    }
    if !req.knowledge_bases.is_empty() {
        guard.knowledge_bases = req.knowledge_bases.clone();
    }
    if req.knowledge_api_url.is_some() {
        guard.knowledge_api_url = req.knowledge_api_url.clone();
    }
    let mode = guard.mode;
    Ok((guard, mode, message))
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> ApiResult<Json<ApiResponse<ChatMessageData>>> {
    let (guard, mode, message) = acquire_turn(&state, &conversation_id, &req, &headers).await?;

    let (tx, mut rx) = mpsc::channel::<StreamEvent>(256);
    let (driver, _abort_handle) = spawn_driver(state.clone(), guard, mode, message, tx);

    let mut responses = Vec::new();
    let mut message_text = String::new();
    while let Some(event) = rx.recv().await {
        match &event {
            StreamEvent::Content { text, stage, .. } => {
                message_text.push_str(text);
                responses.push(ChatResponseItem {
                    event_type: "content".to_string(),
                    content: Some(text.clone()),
                    stage: stage.clone(),
                });
            }
            StreamEvent::Status { stage, description, .. } => {
                responses.push(ChatResponseItem {
                    event_type: "status".to_string(),
                    content: Some(description.clone()),
                    stage: Some(stage.clone()),
                });
            }
            StreamEvent::Progress { stage, progress, .. } => {
                responses.push(ChatResponseItem {
                    event_type: "progress".to_string(),
                    content: Some(progress.to_string()),
                    stage: stage.clone(),
                });
            }
            StreamEvent::Error { message, code, .. } => {
                responses.push(ChatResponseItem {
                    event_type: "error".to_string(),
                    content: Some(format!("{code}: {message}")),
                    stage: None,
                });
            }
        }
    }

    driver
        .await
        .map_err(|e| ApiError::internal(format!("driver task failed: {e}")))??;

    Ok(Json(ApiResponse::ok(ChatMessageData {
        message: message_text,
        responses,
        timestamp: Utc::now(),
    })))
}

fn sse_response(stream: impl futures::Stream<Item = String> + Send + 'static) -> Response {
    let body = axum::body::Body::from_stream(stream.map(Ok::<String, std::io::Error>));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(body)
        .unwrap_or_else(|_| ApiError::internal("failed to build stream response").into_response())
}

/// A single `error` frame followed by the sentinel — used when a request
/// is already committed to an SSE response (the conversation is known to
/// exist) but can't actually be driven, e.g. a concurrent stream collision
/// already in progress.
fn error_only_stream(
    conversation_id: String,
    code: ErrorCode,
    message: impl Into<String>,
) -> impl futures::Stream<Item = String> {
    let message = message.into();
    async_stream::stream! {
        yield StreamEvent::error(&conversation_id, code, message).to_sse_frame();
        yield SENTINEL_FRAME.to_string();
    }
}

pub async fn stream_conversation(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Response {
    if let Err(e) = state.store.get(&conversation_id).await {
        return ApiError::from(e).into_response();
    }

    let message = match validate_message(&req.message) {
        Ok(m) => m,
        Err(e) => return e.into_response(),
    };
    if let Err(e) = state.rate_limiter.check(&req.user_id) {
        return ApiError::from(e).into_response();
    }

    let mut guard = match state.store.try_acquire(&conversation_id).await {
        Ok(guard) => guard,
        Err(StoreError::LockContention(id)) => {
            return sse_response(error_only_stream(
                id,
                ErrorCode::StreamError,
                "a stream is already in progress for this conversation",
            ));
        }
        Err(e) => return ApiError::from(e).into_response(),
    };

    let token = extract_token(&headers, req.user.as_ref().and_then(|u| u.token.as_deref()));
    if let Some(token) = token {
        guard.user_token = Some(token);
    }
    if !req.knowledge_bases.is_empty() {
        guard.knowledge_bases = req.knowledge_bases.clone();
    }
    if req.knowledge_api_url.is_some() {
        guard.knowledge_api_url = req.knowledge_api_url.clone();
    }
    let mode = guard.mode;

    let (tx, rx) = mpsc::channel::<StreamEvent>(256);
    let (driver, _abort_handle) = spawn_driver(state.clone(), guard, mode, message, tx);
    let cancel = CancellationToken::new();
    sse_response(multiplex(conversation_id, rx, driver, cancel))
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<ApiResponse<HistoryData>>> {
    let handle = state.store.get(&conversation_id).await?;
    let task = handle.lock().await;
    let messages = task
        .history
        .messages
        .iter()
        .map(|m| MessageDto {
            role: role_str(m.role).to_string(),
            content: m.content.clone(),
            timestamp: m.timestamp,
        })
        .collect();

    Ok(Json(ApiResponse::ok(HistoryData {
        conversation_id,
        user_id: task.user_id.clone(),
        messages,
    })))
}

pub async fn summary(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<ApiResponse<SummaryData>>> {
    let handle = state.store.get(&conversation_id).await?;
    let task = handle.lock().await;

    Ok(Json(ApiResponse::ok(SummaryData {
        conversation_id,
        user_id: task.user_id.clone(),
        mode: task.mode.as_str().to_string(),
        status: status_str(task.status).to_string(),
        current_stage: task.current_stage.clone(),
        progress: task.progress,
        message_count: task.history.messages.len(),
        error_count: task.error_count,
    })))
}

pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListConversationsQuery>,
) -> Json<ApiResponse<ListConversationsData>> {
    let entries = state.store.list(query.user_id.as_deref()).await;
    let conversations: Vec<ConversationSummaryItem> = entries
        .into_iter()
        .map(|e| ConversationSummaryItem {
            conversation_id: e.conversation_id,
            user_id: e.user_id,
            mode: e.mode.as_str().to_string(),
            status: status_str(e.status).to_string(),
            created_at: e.created_at,
            updated_at: e.updated_at,
        })
        .collect();
    let total = conversations.len();

    Json(ApiResponse::ok(ListConversationsData { conversations, total }))
}

pub async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<ApiResponse<DeleteConversationData>>> {
    state.store.close(&conversation_id).await?;
    Ok(Json(ApiResponse::ok(DeleteConversationData {
        conversation_id,
        deleted: true,
    })))
}

pub async fn statistics(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<crate::store::Statistics>> {
    Json(ApiResponse::ok(state.store.statistics().await))
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let mut services = HashMap::new();
    services.insert(
        "chat".to_string(),
        svc_status(state.config.chat_configured()),
    );
    services.insert(
        "web_search".to_string(),
        svc_status(state.config.web_search_configured()),
    );
    services.insert(
        "doc_retrieval".to_string(),
        svc_status(state.config.doc_retrieval_configured()),
    );
    services.insert(
        "graph_rag".to_string(),
        svc_status(state.config.graph_rag_configured()),
    );

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        services,
    })
}

fn svc_status(configured: bool) -> String {
    if configured { "ok" } else { "unconfigured" }.to_string()
}
