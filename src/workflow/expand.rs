//! Stage 0 — Expand. Rewrites the question in dialog context.

use tokio::sync::mpsc;

use crate::adapters::Adapters;
use crate::isolation::CircuitBreaker;
use crate::model::Message;
use crate::stream::StreamEvent;

const TEMPERATURE: f32 = 0.4;

fn build_prompt(current_question: &str, history_tail: &[Message]) -> String {
    let history_json: Vec<_> = history_tail
        .iter()
        .map(|m| serde_json::json!({"role": m.role, "content": m.content}))
        .collect();
    let previous_user_turns: Vec<_> = history_tail
        .iter()
        .filter(|m| matches!(m.role, crate::model::Role::User))
        .map(|m| m.content.clone())
        .collect();

    format!(
        "You expand a user's latest question into a fully self-contained \
         question, resolving pronouns and implicit references against the \
         conversation history. Respond with a single JSON object with keys \
         `expanded_question`, `expansion_reasoning`, `context_relevance`, \
         `original_intent`. No prose outside the JSON object.\n\n\
         current_question: {current_question:?}\n\
         history: {history_json:?}\n\
         previous_user_turns: {previous_user_turns:?}"
    )
}

/// Returns the expanded question. On any decode failure, falls back to
/// the original question and emits an advisory content line.
pub async fn run(
    adapters: &Adapters,
    breaker: &CircuitBreaker,
    conversation_id: &str,
    current_question: &str,
    history_tail: &[Message],
    tx: &mpsc::Sender<StreamEvent>,
) -> String {
    let _ = tx
        .send(StreamEvent::status(conversation_id, "expanding_question"))
        .await;

    let prompt = build_prompt(current_question, history_tail);
    let expanded = if breaker.check().is_err() {
        None
    } else {
        match adapters.chat.complete_json(&prompt, TEMPERATURE, 512, None).await {
            Ok(json) => {
                breaker.record_success();
                json.get("expanded_question")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
            }
            Err(_) => {
                breaker.record_failure();
                None
            }
        }
    };

    match expanded {
        Some(q) if !q.trim().is_empty() => {
            let _ = tx
                .send(StreamEvent::content_in_stage(
                    conversation_id,
                    format!("Expanded question: {q}"),
                    "expanding_question",
                ))
                .await;
            q
        }
        _ => {
            let _ = tx
                .send(StreamEvent::content_in_stage(
                    conversation_id,
                    "Using the original question as-is (expansion unavailable).",
                    "expanding_question",
                ))
                .await;
            current_question.to_string()
        }
    }
}
