//! Stage 3 / Fan-out executor (C6): runs the plan's sub-tasks
//! concurrently with bounded concurrency, a total deadline, and full
//! per-task isolation (I6). Sub-tasks are futures polled concurrently
//! within the conversation's own driving task via `buffer_unordered` —
//! each is already isolated from its siblings by `SubTaskOutcome`, and the
//! conversation as a whole is isolated from other conversations by the
//! per-conversation lock (C4), so no additional OS-level task spawn is
//! needed to honour "a sub-task's failure never cancels its siblings".
//! Dropping this future (stream cancellation) cooperatively stops polling
//! any outstanding sub-task, satisfying the fan-out's cancellation propagation.

use futures::stream::{self, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::adapters::Adapters;
use crate::error::ErrorCode;
use crate::isolation::CircuitBreakers;
use crate::model::{
    KnowledgeBase, PlannedTask, RetrievalTaskType, SearchResult, SubTaskOutcome, SubTaskResult,
    TaskPlan,
};
use crate::stream::StreamEvent;

use super::kb_select::select_knowledge_base;

/// Runs `plan` to completion. The returned vector preserves plan order
/// (for Stage 4's aggregation); per-task `content` events are emitted in
/// completion order as each sub-task finishes.
pub async fn run_fan_out(
    adapters: &Adapters,
    breakers: &CircuitBreakers,
    conversation_id: &str,
    plan: &TaskPlan,
    knowledge_bases: &[KnowledgeBase],
    knowledge_api_url: Option<&str>,
    user_token: Option<&str>,
    tx: &mpsc::Sender<StreamEvent>,
) -> Vec<SubTaskResult> {
    let _ = tx
        .send(StreamEvent::status(conversation_id, "executing_tasks"))
        .await;

    let max_concurrency = plan.max_concurrency.max(1);
    let deadline = Duration::from_secs(plan.timeout_seconds);

    let futures = plan.tasks.iter().enumerate().map(|(index, planned)| {
        run_one(
            adapters,
            breakers,
            conversation_id,
            index,
            planned,
            knowledge_bases,
            knowledge_api_url,
            user_token,
            tx,
        )
    });

    let collected = tokio::time::timeout(
        deadline,
        stream::iter(futures)
            .buffer_unordered(max_concurrency)
            .collect::<Vec<(usize, SubTaskResult)>>(),
    )
    .await;

    let mut slots: Vec<Option<SubTaskResult>> = (0..plan.tasks.len()).map(|_| None).collect();

    match collected {
        Ok(results) => {
            for (index, result) in results {
                slots[index] = Some(result);
            }
        }
        Err(_) => {
            // Deadline hit: whatever wasn't collected is recorded as a
            // timeout below; partially-finished sub-tasks are dropped
            // cooperatively along with the timed-out stream.
        }
    }

    plan.tasks
        .iter()
        .zip(slots.into_iter())
        .map(|(planned, slot)| {
            slot.unwrap_or_else(|| SubTaskResult {
                task_type: planned.task_type,
                query: planned.query.clone(),
                outcome: SubTaskOutcome::Error {
                    message: "sub-task timed out".to_string(),
                },
            })
        })
        .collect()
}

async fn run_one(
    adapters: &Adapters,
    breakers: &CircuitBreakers,
    conversation_id: &str,
    index: usize,
    planned: &PlannedTask,
    knowledge_bases: &[KnowledgeBase],
    knowledge_api_url: Option<&str>,
    user_token: Option<&str>,
    tx: &mpsc::Sender<StreamEvent>,
) -> (usize, SubTaskResult) {
    let _ = knowledge_api_url; // reserved: a future by-id lookup could use this directly
    let _ = tx
        .send(StreamEvent::status(
            conversation_id,
            planned.task_type.status_stage(),
        ))
        .await;

    let outcome = match planned.task_type {
        RetrievalTaskType::OnlineSearch => {
            run_online_search(adapters, &breakers.web_search, &planned.query).await
        }
        RetrievalTaskType::KnowledgeSearch => {
            run_knowledge_search(
                adapters,
                &breakers.doc_retrieval,
                &breakers.chat,
                &planned.query,
                knowledge_bases,
                user_token,
            )
            .await
        }
        RetrievalTaskType::LightragSearch => {
            run_graph_rag(adapters, &breakers.graph_rag, &planned.query).await
        }
    };

    let result = SubTaskResult {
        task_type: planned.task_type,
        query: planned.query.clone(),
        outcome,
    };

    let description = match &result.outcome {
        SubTaskOutcome::Results { results, .. } if results.is_empty() => format!(
            "{} task completed with no results for \"{}\".",
            planned.task_type.as_str(),
            planned.query
        ),
        SubTaskOutcome::Results { results, .. } => format!(
            "{} task completed with {} result(s) for \"{}\".",
            planned.task_type.as_str(),
            results.len(),
            planned.query
        ),
        SubTaskOutcome::Error { message } => format!(
            "{} task failed for \"{}\": {message}",
            planned.task_type.as_str(),
            planned.query
        ),
    };
    let _ = tx
        .send(StreamEvent::content_in_stage(
            conversation_id,
            description,
            "executing_tasks",
        ))
        .await;

    (index, result)
}

async fn run_online_search(
    adapters: &Adapters,
    breaker: &crate::isolation::CircuitBreaker,
    query: &str,
) -> SubTaskOutcome {
    if let Err(e) = breaker.check() {
        return SubTaskOutcome::Error { message: e.to_string() };
    }
    match adapters.web_search.search(query, 5, "en", true).await {
        Ok(results) => {
            breaker.record_success();
            SubTaskOutcome::Results {
                results,
                collection_name: None,
            }
        }
        Err(e) => {
            breaker.record_failure();
            let (_, message) = crate::isolation::classify_adapter_error(&e);
            SubTaskOutcome::Error { message }
        }
    }
}

async fn run_graph_rag(
    adapters: &Adapters,
    breaker: &crate::isolation::CircuitBreaker,
    query: &str,
) -> SubTaskOutcome {
    if let Err(e) = breaker.check() {
        return SubTaskOutcome::Error { message: e.to_string() };
    }
    match adapters
        .graph_rag
        .search(query, crate::adapters::GraphRagMode::Hybrid)
        .await
    {
        Ok(results) => {
            breaker.record_success();
            SubTaskOutcome::Results {
                results,
                collection_name: None,
            }
        }
        Err(e) => {
            breaker.record_failure();
            let (_, message) = crate::isolation::classify_adapter_error(&e);
            SubTaskOutcome::Error { message }
        }
    }
}

async fn run_knowledge_search(
    adapters: &Adapters,
    doc_breaker: &crate::isolation::CircuitBreaker,
    chat_breaker: &crate::isolation::CircuitBreaker,
    query: &str,
    knowledge_bases: &[KnowledgeBase],
    user_token: Option<&str>,
) -> SubTaskOutcome {
    let collection_name = select_knowledge_base(adapters, chat_breaker, knowledge_bases, query).await;

    if let Err(e) = doc_breaker.check() {
        return SubTaskOutcome::Error { message: e.to_string() };
    }

    match adapters
        .doc_retrieval
        .query_doc_by_name(user_token, &collection_name, query, 5)
        .await
    {
        Ok((doc_result, used_collection)) => {
            doc_breaker.record_success();
            SubTaskOutcome::Results {
                results: normalize_doc_result(doc_result),
                collection_name: Some(used_collection),
            }
        }
        Err(e) => {
            doc_breaker.record_failure();
            let code = e.classify();
            let message = if code == ErrorCode::TimeoutError {
                "knowledge search timed out".to_string()
            } else {
                e.to_string()
            };
            SubTaskOutcome::Error { message }
        }
    }
}

fn normalize_doc_result(doc: crate::adapters::DocQueryResult) -> Vec<SearchResult> {
    let Some(documents) = doc.documents.first() else {
        return Vec::new();
    };
    let metadatas = doc.metadatas.first();
    let distances = doc.distances.first();

    documents
        .iter()
        .enumerate()
        .map(|(i, content)| {
            let metadata = metadatas.and_then(|m| m.get(i)).cloned().unwrap_or_default();
            let title = metadata
                .get("filename")
                .and_then(|v| v.as_str())
                .unwrap_or("document")
                .to_string();
            let score = distances.and_then(|d| d.get(i)).copied();
            SearchResult {
                title,
                content: content.clone(),
                url: None,
                score,
                source: "knowledge_search".to_string(),
                metadata,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::test_support::fake_adapters_with_json;

    #[tokio::test]
    async fn fan_out_preserves_plan_order_and_completion_events() {
        let adapters = fake_adapters_with_json("{}");
        let breakers = CircuitBreakers::default();
        let plan = TaskPlan::default_plan("x");
        let (tx, mut rx) = mpsc::channel(64);

        let results = run_fan_out(&adapters, &breakers, "c1", &plan, &[], None, None, &tx).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].task_type, RetrievalTaskType::OnlineSearch);
        assert_eq!(results[1].task_type, RetrievalTaskType::KnowledgeSearch);
        assert_eq!(results[2].task_type, RetrievalTaskType::LightragSearch);
        assert!(results.iter().all(|r| !r.is_error()));

        let mut content_events = 0;
        while let Ok(_event) = rx.try_recv() {
            content_events += 1;
        }
        assert!(content_events >= 3); // 1 status + 1 content per task minimum
    }

    #[tokio::test]
    async fn one_failing_sub_task_does_not_abort_siblings() {
        struct FailingWebSearch;
        #[async_trait::async_trait]
        impl crate::adapters::WebSearchAdapter for FailingWebSearch {
            async fn search(
                &self,
                _q: &str,
                _n: usize,
                _l: &str,
                _s: bool,
            ) -> Result<Vec<SearchResult>, crate::error::AdapterError> {
                Err(crate::error::AdapterError::Connection("down".into()))
            }
        }

        let mut adapters = fake_adapters_with_json("{}");
        adapters.web_search = std::sync::Arc::new(FailingWebSearch);
        let breakers = CircuitBreakers::default();
        let plan = TaskPlan::default_plan("x");
        let (tx, _rx) = mpsc::channel(64);

        let results = run_fan_out(&adapters, &breakers, "c1", &plan, &[], None, None, &tx).await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_error());
        assert!(!results[1].is_error());
        assert!(!results[2].is_error());
    }
}
