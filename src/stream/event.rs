//! `StreamEvent` — the four legal event shapes (I4) and their canonical
//! `data: <json>\n\n` serialization.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::ErrorCode;

/// Renders the fixed stage-description table. Unknown stages fall
/// back to `"current stage: <stage>"`.
pub fn stage_description(stage: &str) -> String {
    match stage {
        "initialization" => "initializing conversation".to_string(),
        "expanding_question" => "expanding/optimising question".to_string(),
        "analyzing_question" => "analysing question".to_string(),
        "task_scheduling" => "scheduling tasks".to_string(),
        "executing_tasks" => "executing tasks".to_string(),
        "online_search" => "online search running".to_string(),
        "knowledge_search" => "knowledge base search running".to_string(),
        "lightrag_query" => "graph-RAG query running".to_string(),
        "response_generation" => "generating response".to_string(),
        "generating_answer" => "generating answer".to_string(),
        "completed" => "processing complete".to_string(),
        "error" => "an error occurred".to_string(),
        other => format!("current stage: {other}"),
    }
}

fn clamp_progress(p: f32) -> f32 {
    p.clamp(0.0, 1.0)
}

/// One of the four legal event shapes. Every event carries a
/// `conversation_id` and timestamp.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Status {
        conversation_id: String,
        description: String,
        stage: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
        timestamp: DateTime<Utc>,
    },
    Content {
        conversation_id: String,
        #[serde(rename = "content")]
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stage: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<f32>,
        timestamp: DateTime<Utc>,
    },
    Progress {
        conversation_id: String,
        progress: f32,
        #[serde(skip_serializing_if = "Option::is_none")]
        stage: Option<String>,
        timestamp: DateTime<Utc>,
    },
    Error {
        conversation_id: String,
        #[serde(rename = "error")]
        message: String,
        code: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
        timestamp: DateTime<Utc>,
    },
}

impl StreamEvent {
    pub fn status(conversation_id: impl Into<String>, stage: impl Into<String>) -> Self {
        let stage = stage.into();
        let description = stage_description(&stage);
        Self::Status {
            conversation_id: conversation_id.into(),
            description,
            stage,
            status: None,
            progress: None,
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    pub fn status_with(
        conversation_id: impl Into<String>,
        stage: impl Into<String>,
        status: Option<String>,
        progress: Option<f32>,
        metadata: Option<Value>,
    ) -> Self {
        let stage = stage.into();
        let description = stage_description(&stage);
        Self::Status {
            conversation_id: conversation_id.into(),
            description,
            stage,
            status,
            progress: progress.map(clamp_progress),
            metadata,
            timestamp: Utc::now(),
        }
    }

    pub fn completed(conversation_id: impl Into<String>, metadata: Option<Value>) -> Self {
        Self::status_with(
            conversation_id,
            "completed",
            Some("completed".to_string()),
            Some(1.0),
            metadata,
        )
    }

    /// The multiplexer's own terminal frame — authoritative over whatever
    /// completion wording the stage engine itself used.
    pub fn multiplexer_completed(
        conversation_id: impl Into<String>,
        total_responses: u64,
        content_received: u64,
    ) -> Self {
        Self::Status {
            conversation_id: conversation_id.into(),
            description: "all tasks done".to_string(),
            stage: "completed".to_string(),
            status: Some("completed".to_string()),
            progress: Some(1.0),
            metadata: Some(serde_json::json!({
                "total_responses": total_responses,
                "content_received": content_received,
            })),
            timestamp: Utc::now(),
        }
    }

    pub fn content(conversation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Content {
            conversation_id: conversation_id.into(),
            text: text.into(),
            stage: None,
            status: None,
            progress: None,
            timestamp: Utc::now(),
        }
    }

    pub fn content_in_stage(
        conversation_id: impl Into<String>,
        text: impl Into<String>,
        stage: impl Into<String>,
    ) -> Self {
        Self::Content {
            conversation_id: conversation_id.into(),
            text: text.into(),
            stage: Some(stage.into()),
            status: None,
            progress: None,
            timestamp: Utc::now(),
        }
    }

    pub fn progress(
        conversation_id: impl Into<String>,
        fraction: f32,
        stage: Option<String>,
    ) -> Self {
        Self::Progress {
            conversation_id: conversation_id.into(),
            progress: clamp_progress(fraction),
            stage,
            timestamp: Utc::now(),
        }
    }

    pub fn error(
        conversation_id: impl Into<String>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self::Error {
            conversation_id: conversation_id.into(),
            message: message.into(),
            code: code.as_str().to_string(),
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        match self {
            Self::Status { conversation_id, .. }
            | Self::Content { conversation_id, .. }
            | Self::Progress { conversation_id, .. }
            | Self::Error { conversation_id, .. } => conversation_id,
        }
    }

    /// Serializes to the canonical `data: <json>\n\n` SSE frame. JSON is
    /// compact UTF-8 with no whitespace between key/value pairs.
    pub fn to_sse_frame(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","code":"UNKNOWN_ERROR","error":"serialization failure"}"#
                .to_string()
        });
        format!("data: {json}\n\n")
    }
}

/// The literal terminator line ending every stream (I5, the Sentinel).
pub const SENTINEL_FRAME: &str = "data: [DONE]\n\n";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_stage_falls_back_to_generic_description() {
        assert_eq!(stage_description("mystery_stage"), "current stage: mystery_stage");
    }

    #[test]
    fn known_stage_uses_table() {
        assert_eq!(stage_description("completed"), "processing complete");
    }

    #[test]
    fn progress_is_clamped() {
        let e = StreamEvent::progress("c1", 1.5, None);
        if let StreamEvent::Progress { progress, .. } = e {
            assert_eq!(progress, 1.0);
        } else {
            panic!("wrong variant");
        }
    }

    #[test]
    fn content_frame_has_no_inter_field_whitespace() {
        let e = StreamEvent::content("c1", "hello");
        let frame = e.to_sse_frame();
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("}\n\n"));
        assert!(!frame.contains("\": "));
        assert!(!frame.contains(", \""));
    }

    #[test]
    fn error_frame_carries_code_and_message() {
        let e = StreamEvent::error("c1", ErrorCode::TimeoutError, "boom");
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"code\":\"TIMEOUT_ERROR\""));
        assert!(json.contains("\"error\":\"boom\""));
        assert!(json.contains("\"type\":\"error\""));
    }
}
