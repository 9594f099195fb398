//! Knowledge-base selection sub-stage (inside Stage 3 for
//! `knowledge_search` tasks).

use crate::adapters::{Adapters, DEFAULT_COLLECTION};
use crate::isolation::CircuitBreaker;
use crate::model::KnowledgeBase;

const TEMPERATURE: f32 = 0.1;

/// - 0 candidates → `"test"`.
/// - 1 candidate → use it.
/// - ≥2 candidates → ask the model; validate against the candidate set;
///   on invalid output, fall back to the first candidate. `"test"` is the
///   ultimate fallback if even that validation step can't run.
pub async fn select_knowledge_base(
    adapters: &Adapters,
    breaker: &CircuitBreaker,
    candidates: &[KnowledgeBase],
    query: &str,
) -> String {
    match candidates.len() {
        0 => DEFAULT_COLLECTION.to_string(),
        1 => candidates[0].name.clone(),
        _ => select_among_many(adapters, breaker, candidates, query).await,
    }
}

async fn select_among_many(
    adapters: &Adapters,
    breaker: &CircuitBreaker,
    candidates: &[KnowledgeBase],
    query: &str,
) -> String {
    let fallback = candidates
        .first()
        .map(|c| c.name.clone())
        .unwrap_or_else(|| DEFAULT_COLLECTION.to_string());

    if breaker.check().is_err() {
        return fallback;
    }

    let listing = candidates
        .iter()
        .map(|c| format!("- {} : {}", c.name, c.description))
        .collect::<Vec<_>>()
        .join("\n");
    let prompt = format!(
        "Pick the single best knowledge base for this query. Respond with a \
         JSON object `{{\"collection_name\": \"...\", \"reason\": \"...\"}}` \
         where `collection_name` is exactly one of the candidate names. No \
         prose outside the JSON object.\n\n\
         query: {query:?}\n\
         candidates:\n{listing}"
    );

    let outcome = adapters.chat.complete_json(&prompt, TEMPERATURE, 256, None).await;
    let chosen = match outcome {
        Ok(json) => {
            breaker.record_success();
            json.get("collection_name")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        }
        Err(_) => {
            breaker.record_failure();
            None
        }
    };

    match chosen {
        Some(name) if candidates.iter().any(|c| c.name == name) => name,
        _ => fallback,
    }
}
