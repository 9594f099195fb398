//! Stage 1 — Analyse. Produces an expert analysis feeding the plan.

use tokio::sync::mpsc;

use crate::adapters::Adapters;
use crate::isolation::CircuitBreaker;
use crate::model::Message;
use crate::stream::StreamEvent;

const TEMPERATURE: f32 = 0.3;

fn build_prompt(user_question: &str, history_tail: &[Message]) -> String {
    let history_json: Vec<_> = history_tail
        .iter()
        .map(|m| serde_json::json!({"role": m.role, "content": m.content}))
        .collect();
    format!(
        "You are a research analyst. Given the user's question and the \
         conversation history, produce a short expert analysis describing \
         what information would be needed to answer it well. Respond with \
         a single JSON object `{{\"expert_analysis\": \"...\"}}`. No prose \
         outside the JSON object.\n\n\
         user_question: {user_question:?}\n\
         history: {history_json:?}"
    )
}

fn generic_analysis(user_question: &str) -> String {
    format!(
        "This question asks about: {user_question}. A thorough answer should \
         draw on current web sources, any relevant internal documents, and \
         known entity relationships."
    )
}

/// Returns the expert analysis. On failure, synthesises a short generic
/// analysis so later stages still have input.
pub async fn run(
    adapters: &Adapters,
    breaker: &CircuitBreaker,
    conversation_id: &str,
    user_question: &str,
    history_tail: &[Message],
    tx: &mpsc::Sender<StreamEvent>,
) -> String {
    let _ = tx
        .send(StreamEvent::status(conversation_id, "analyzing_question"))
        .await;

    let prompt = build_prompt(user_question, history_tail);
    let analysis = if breaker.check().is_err() {
        None
    } else {
        match adapters.chat.complete_json(&prompt, TEMPERATURE, 512, None).await {
            Ok(json) => {
                breaker.record_success();
                json.get("expert_analysis")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
            }
            Err(_) => {
                breaker.record_failure();
                None
            }
        }
    };

    let analysis = analysis
        .filter(|a| !a.trim().is_empty())
        .unwrap_or_else(|| generic_analysis(user_question));

    let _ = tx
        .send(StreamEvent::content_in_stage(
            conversation_id,
            analysis.clone(),
            "analyzing_question",
        ))
        .await;

    analysis
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_analysis_mentions_question() {
        let a = generic_analysis("who founded rust?");
        assert!(a.contains("who founded rust?"));
    }
}
