//! Stage 2 — Plan. Decomposes the question into a `TaskPlan`.

use tokio::sync::mpsc;

use crate::adapters::Adapters;
use crate::isolation::CircuitBreaker;
use crate::model::{Message, PlannedTask, RetrievalTaskType, TaskPlan};
use crate::stream::StreamEvent;

const TEMPERATURE: f32 = 0.2;
const MAX_CONCURRENCY: usize = 3;
const TIMEOUT_SECONDS: u64 = 60;

fn build_prompt(expanded_question: &str, expert_analysis: &str, history_tail: &[Message]) -> String {
    let history_json: Vec<_> = history_tail
        .iter()
        .map(|m| serde_json::json!({"role": m.role, "content": m.content}))
        .collect();
    format!(
        "Decompose this question into parallel retrieval sub-tasks. Valid \
         types are `online_search`, `knowledge_search`, `lightrag_search`. \
         Respond with a single JSON object \
         `{{\"tasks\": [{{\"type\": \"...\", \"query\": \"...\"}}]}}`. No \
         prose outside the JSON object.\n\n\
         expanded_question: {expanded_question:?}\n\
         expert_analysis: {expert_analysis:?}\n\
         history: {history_json:?}"
    )
}

/// Builds the Stage-2 plan. Unknown task-type entries are dropped; if no
/// valid tasks remain, falls back to the default plan (one of each type,
/// verbatim expanded question).
pub async fn run(
    adapters: &Adapters,
    breaker: &CircuitBreaker,
    conversation_id: &str,
    expanded_question: &str,
    expert_analysis: &str,
    history_tail: &[Message],
    tx: &mpsc::Sender<StreamEvent>,
) -> TaskPlan {
    let _ = tx
        .send(StreamEvent::status(conversation_id, "task_scheduling"))
        .await;

    let prompt = build_prompt(expanded_question, expert_analysis, history_tail);
    let tasks = if breaker.check().is_err() {
        Vec::new()
    } else {
        match adapters.chat.complete_json(&prompt, TEMPERATURE, 512, None).await {
            Ok(json) => {
                breaker.record_success();
                parse_tasks(&json)
            }
            Err(_) => {
                breaker.record_failure();
                Vec::new()
            }
        }
    };

    let plan = if tasks.is_empty() {
        TaskPlan::default_plan(expanded_question)
    } else {
        TaskPlan {
            tasks,
            max_concurrency: MAX_CONCURRENCY,
            timeout_seconds: TIMEOUT_SECONDS,
        }
    };

    let summary = plan
        .tasks
        .iter()
        .map(|t| format!("{} ({})", t.task_type.as_str(), t.query))
        .collect::<Vec<_>>()
        .join(", ");
    let _ = tx
        .send(StreamEvent::content_in_stage(
            conversation_id,
            format!("Scheduled {} task(s): {summary}", plan.tasks.len()),
            "task_scheduling",
        ))
        .await;

    plan
}

fn parse_tasks(json: &serde_json::Value) -> Vec<PlannedTask> {
    let Some(array) = json.get("tasks").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    array
        .iter()
        .filter_map(|entry| {
            let task_type = entry.get("type")?.as_str()?;
            let task_type = RetrievalTaskType::parse(task_type)?;
            let query = entry.get("query")?.as_str()?.to_string();
            Some(PlannedTask { task_type, query })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_types_are_dropped() {
        let json = serde_json::json!({
            "tasks": [
                {"type": "bogus", "query": "x"},
                {"type": "online_search", "query": "y"},
            ]
        });
        let tasks = parse_tasks(&json);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_type, RetrievalTaskType::OnlineSearch);
    }

    #[test]
    fn missing_tasks_field_yields_empty() {
        let json = serde_json::json!({"oops": true});
        assert!(parse_tasks(&json).is_empty());
    }
}
