//! End-to-end HTTP surface tests, driven in-process over a router backed
//! entirely by fake adapters (see `common::test_app`) — no network call is
//! ever made. Covers the concrete scenarios that are reachable through the
//! HTTP boundary alone.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::test_app;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn post_json(app: &axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn post_raw(app: &axum::Router, uri: &str, body: Value) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn create_conversation(app: &axum::Router, mode: &str) -> String {
    let (status, body) = post_json(
        app,
        "/api/v1/conversations",
        json!({"user_id": "u1", "mode": mode}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["data"]["conversation_id"].as_str().unwrap().to_string()
}

/// Scenario 1 (create + stream, workflow, all adapters healthy): expects an
/// ordered sequence of stage-status frames, content for each stage, and a
/// terminal `status{stage=completed, progress=1.0}` before `[DONE]`.
#[tokio::test]
async fn create_then_stream_emits_expected_frame_sequence() {
    let app = test_app();
    let conv_id = create_conversation(&app, "workflow").await;

    let response = post_raw(
        &app,
        &format!("/api/v1/conversations/{conv_id}/stream"),
        json!({"conversation_id": conv_id, "message": "how does X work?", "user_id": "u1"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream; charset=utf-8"
    );

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = String::from_utf8(bytes.to_vec()).unwrap();

    let stage_order = [
        "expanding_question",
        "analyzing_question",
        "task_scheduling",
        "executing_tasks",
    ];
    let mut last_index = 0usize;
    for stage in stage_order {
        let marker = format!("\"stage\":\"{stage}\"");
        let pos = body.find(&marker).unwrap_or_else(|| panic!("missing stage frame: {stage}"));
        assert!(pos >= last_index, "stage {stage} appeared out of order");
        last_index = pos;
    }

    assert!(body.contains("\"type\":\"content\""));
    assert!(body.contains("\"status\":\"completed\""));
    assert!(body.contains("\"progress\":1.0"));
    assert!(body.trim_end().ends_with("data: [DONE]"));
    assert!(!body.contains("\"type\":\"error\""));
}

/// Scenario 4 (concurrent stream on the same conversation): the second
/// call is refused outright with a two-frame `error` + `[DONE]` stream,
/// while the first — pinned mid-turn by a chat adapter that blocks until
/// released — completes normally once unblocked.
#[tokio::test]
async fn concurrent_stream_on_same_conversation_is_refused() {
    let chat = common::SlowChat::new();
    let app = common::test_app_with_chat(chat.clone());
    let conv_id = create_conversation(&app, "workflow").await;

    let first_app = app.clone();
    let first_conv = conv_id.clone();
    let first = tokio::spawn(async move {
        post_raw(
            &first_app,
            &format!("/api/v1/conversations/{first_conv}/stream"),
            json!({"conversation_id": first_conv, "message": "first turn", "user_id": "u1"}),
        )
        .await
    });

    chat.wait_until_entered().await;

    let second = post_raw(
        &app,
        &format!("/api/v1/conversations/{conv_id}/stream"),
        json!({"conversation_id": conv_id, "message": "second turn", "user_id": "u1"}),
    )
    .await;
    assert_eq!(second.status(), StatusCode::OK);
    let second_bytes = second.into_body().collect().await.unwrap().to_bytes();
    let second_body = String::from_utf8(second_bytes.to_vec()).unwrap();
    assert!(second_body.contains("\"type\":\"error\""));
    assert!(second_body.contains("STREAM_ERROR"));
    assert!(second_body.trim_end().ends_with("data: [DONE]"));

    chat.release();
    let first_response = first.await.unwrap();
    assert_eq!(first_response.status(), StatusCode::OK);
    let first_bytes = first_response.into_body().collect().await.unwrap().to_bytes();
    let first_body = String::from_utf8(first_bytes.to_vec()).unwrap();
    assert!(first_body.contains("\"status\":\"completed\""));
}

/// Boundary: an empty message is rejected with `VALIDATION_ERROR` before a
/// turn is ever acquired.
#[tokio::test]
async fn empty_message_is_validation_error() {
    let app = test_app();
    let conv_id = create_conversation(&app, "workflow").await;

    let (status, body) = post_json(
        &app,
        &format!("/api/v1/conversations/{conv_id}/messages"),
        json!({"conversation_id": conv_id, "message": "   ", "user_id": "u1"}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "VALIDATION_ERROR");
    assert_eq!(body["success"], false);
}

/// Boundary: streaming against an unknown conversation id returns a
/// 404-equivalent `CONVERSATION_NOT_FOUND`, as a plain JSON error rather
/// than an SSE body, since the server never commits to opening the stream.
#[tokio::test]
async fn unknown_conversation_on_stream_is_not_found() {
    let app = test_app();

    let response = post_raw(
        &app,
        "/api/v1/conversations/does-not-exist/stream",
        json!({"conversation_id": "does-not-exist", "message": "hi", "user_id": "u1"}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error_code"], "CONVERSATION_NOT_FOUND");
}

/// Non-streaming `/messages` accumulates the full token stream into one
/// `message` string and records every intermediate frame in `responses`.
#[tokio::test]
async fn send_message_accumulates_full_text_and_responses() {
    let app = test_app();
    let conv_id = create_conversation(&app, "workflow").await;

    let (status, body) = post_json(
        &app,
        &format!("/api/v1/conversations/{conv_id}/messages"),
        json!({"conversation_id": conv_id, "message": "what's the weather model?", "user_id": "u1"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let message = body["data"]["message"].as_str().unwrap();
    assert!(!message.is_empty());
    let responses = body["data"]["responses"].as_array().unwrap();
    assert!(!responses.is_empty());
}

/// History and summary reflect a completed non-streaming turn: one user
/// message and one assistant message, status `completed`, progress 1.0.
#[tokio::test]
async fn history_and_summary_reflect_a_completed_turn() {
    let app = test_app();
    let conv_id = create_conversation(&app, "workflow").await;

    let (status, _) = post_json(
        &app,
        &format!("/api/v1/conversations/{conv_id}/messages"),
        json!({"conversation_id": conv_id, "message": "summarize topic Y", "user_id": "u1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, history) = post_json_get(&app, &format!("/api/v1/conversations/{conv_id}/history")).await;
    assert_eq!(status, StatusCode::OK);
    let messages = history["data"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["role"], "assistant");

    let (status, summary) = post_json_get(&app, &format!("/api/v1/conversations/{conv_id}/summary")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["data"]["status"], "completed");
    assert_eq!(summary["data"]["progress"], 1.0);
}

async fn post_json_get(app: &axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

/// Deleting a conversation is idempotent at the HTTP boundary: the second
/// delete call reports `CONVERSATION_NOT_FOUND`, and a subsequent history
/// lookup also 404s.
#[tokio::test]
async fn delete_conversation_is_idempotent() {
    let app = test_app();
    let conv_id = create_conversation(&app, "workflow").await;

    let delete = |app: axum::Router, uri: String| async move {
        app.oneshot(Request::builder().method("DELETE").uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    };

    let first = delete(app.clone(), format!("/api/v1/conversations/{conv_id}")).await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = delete(app.clone(), format!("/api/v1/conversations/{conv_id}")).await;
    assert_eq!(second.status(), StatusCode::NOT_FOUND);

    let (status, _) = post_json_get(&app, &format!("/api/v1/conversations/{conv_id}/history")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// `list_conversations` filters by `user_id` and `statistics` reports
/// aggregate counts across both modes.
#[tokio::test]
async fn list_and_statistics_reflect_created_conversations() {
    let app = test_app();
    let _w = create_conversation(&app, "workflow").await;
    let _a = create_conversation(&app, "agent").await;

    let (status, body) = post_json_get(&app, "/api/v1/conversations?user_id=u1").await;
    assert_eq!(status, StatusCode::OK);
    let total = body["data"]["total"].as_u64().unwrap();
    assert_eq!(total, 2);

    let (status, stats) = post_json_get(&app, "/api/v1/statistics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["data"]["total_tasks"], 2);
    assert_eq!(stats["data"]["workflow_tasks"], 1);
    assert_eq!(stats["data"]["agent_tasks"], 1);
}

/// `/health` reports each adapter as unconfigured when no credential was
/// supplied to `Config`, since the fixture never sets API keys.
#[tokio::test]
async fn health_reports_unconfigured_services_without_credentials() {
    let app = test_app();
    let (status, body) = post_json_get(&app, "/api/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["services"]["chat"], "unconfigured");
}
