//! Request/response DTOs for the HTTP surface. `ApiResponse<T>` is the
//! envelope every success response shares: a `{success, data}` wrapper
//! carrying a typed payload instead of a free-form one.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::KnowledgeBase;

#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data }
    }
}

/// The bearer credential nested under `user.token`, the body-level fallback
/// per the bearer-token discovery priority.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserToken {
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateConversationRequest {
    pub user_id: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub knowledge_bases: Vec<KnowledgeBase>,
    #[serde(default)]
    pub knowledge_api_url: Option<String>,
    #[serde(default)]
    pub user: Option<UserToken>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateConversationData {
    pub conversation_id: String,
    pub user_id: String,
    pub mode: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub is_custom_id: bool,
}

/// `ChatRequest`: the body shared by `/messages` and `/stream`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub conversation_id: String,
    pub message: String,
    pub user_id: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<Value>>,
    #[serde(default)]
    pub knowledge_bases: Vec<KnowledgeBase>,
    #[serde(default)]
    pub knowledge_api_url: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub user: Option<UserToken>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponseItem {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessageData {
    pub message: String,
    pub responses: Vec<ChatResponseItem>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageDto {
    pub role: String,
    pub content: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryData {
    pub conversation_id: String,
    pub user_id: String,
    pub messages: Vec<MessageDto>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryData {
    pub conversation_id: String,
    pub user_id: String,
    pub mode: String,
    pub status: String,
    pub current_stage: String,
    pub progress: f32,
    pub message_count: usize,
    pub error_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummaryItem {
    pub conversation_id: String,
    pub user_id: String,
    pub mode: String,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListConversationsData {
    pub conversations: Vec<ConversationSummaryItem>,
    pub total: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListConversationsQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteConversationData {
    pub conversation_id: String,
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub services: std::collections::HashMap<String, String>,
}
