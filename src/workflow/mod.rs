//! Stage engine (C5, workflow mode): the five-stage pipeline
//! (expand/analyse/plan/execute/synthesize). Each stage runs to
//! completion before the next begins; all emit through the
//! conversation's internal event channel.

mod analyse;
mod execute;
mod expand;
mod kb_select;
mod plan;
mod synthesize;

pub use execute::run_fan_out;
pub use kb_select::select_knowledge_base;

use tokio::sync::mpsc;

use crate::adapters::Adapters;
use crate::error::StageError;
use crate::isolation::CircuitBreakers;
use crate::model::{ConversationTask, Message, TaskStatus};
use crate::stream::StreamEvent;

/// Runs the full five-stage pipeline for one `send_message`/`stream` call.
/// The caller holds the per-conversation lock for the task's whole
/// lifetime here (I3); `task.history` is mutated only by this driver.
pub async fn drive(
    task: &mut ConversationTask,
    adapters: &Adapters,
    breakers: &CircuitBreakers,
    user_message: String,
    tx: mpsc::Sender<StreamEvent>,
) -> Result<(), StageError> {
    let conv_id = task.conversation_id.clone();
    task.status = TaskStatus::Running;
    task.history.append(Message::user(user_message.clone()));

    let _ = tx.send(StreamEvent::status(&conv_id, "initialization")).await;

    // Stage 0 — Expand.
    task.current_stage = "expanding_question".to_string();
    let history_tail = task.history.tail(11); // last N turns, excluding the just-appended one is fine to include
    let expanded = expand::run(adapters, &breakers.chat, &conv_id, &user_message, history_tail, &tx).await;
    task.expanded_question = Some(expanded.clone());
    task.progress = 0.2;

    // Stage 1 — Analyse.
    task.current_stage = "analyzing_question".to_string();
    let analysis = analyse::run(adapters, &breakers.chat, &conv_id, &user_message, history_tail, &tx).await;
    task.expert_analysis = Some(analysis.clone());
    task.progress = 0.4;

    // Stage 2 — Plan.
    task.current_stage = "task_scheduling".to_string();
    let task_plan = plan::run(adapters, &breakers.chat, &conv_id, &expanded, &analysis, history_tail, &tx).await;
    task.progress = 0.5;

    // Stage 3 — Execute (fan-out).
    task.current_stage = "executing_tasks".to_string();
    let sub_results = execute::run_fan_out(
        adapters,
        breakers,
        &conv_id,
        &task_plan,
        &task.knowledge_bases,
        task.knowledge_api_url.as_deref(),
        task.user_token.as_deref(),
        &tx,
    )
    .await;
    task.progress = 0.8;

    // Stage 4 — Synthesize.
    task.current_stage = "response_generation".to_string();
    let answer = synthesize::run(adapters, &breakers.chat, &conv_id, &expanded, &sub_results, &tx).await;
    task.history.append(Message::assistant(answer));
    task.progress = 1.0;
    task.status = TaskStatus::Completed;
    task.current_stage = "completed".to_string();
    task.touch();

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Mode;
    use test_support::fake_adapters_with_json;

    #[tokio::test]
    async fn full_pipeline_emits_events_and_completes() {
        let adapters = fake_adapters_with_json(
            r#"{"expanded_question":"how does x work?","expansion_reasoning":"r","context_relevance":"c","original_intent":"i"}"#,
        );
        let breakers = CircuitBreakers::default();
        let mut task = ConversationTask::new("c1".into(), "u1".into(), Mode::Workflow);
        let (tx, mut rx) = mpsc::channel(64);

        let result = drive(&mut task, &adapters, &breakers, "how does x work?".into(), tx).await;
        assert!(result.is_ok());
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 1.0);
        assert_eq!(task.history.messages.len(), 2);

        let mut saw_content = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, StreamEvent::Content { .. }) {
                saw_content = true;
            }
        }
        assert!(saw_content);
    }
}
