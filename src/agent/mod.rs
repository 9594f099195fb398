//! Agent-mode engine (C7): a directed graph over five nodes — `master`,
//! `query_optimizer`, `parallel_search`, `summary`, `final_output` — driven
//! as an explicit loop rather than a general graph-execution library,
//! since the five nodes and their edges are fixed and a loop over
//! an enum is the simplest thing that is still honestly a state machine.

pub mod checkpoint;
mod state;

pub use checkpoint::{CheckpointStatistics, CheckpointStore, MemoryCheckpointStore, RemoteKvCheckpointStore};
pub use state::{AgentState, Lane};

use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;

use crate::adapters::Adapters;
use crate::error::StageError;
use crate::isolation::CircuitBreakers;
use crate::model::{ConversationTask, Message, SearchResult, TaskStatus};
use crate::stream::StreamEvent;
use state::{route_after_master, route_after_parallel_search, route_after_summary, AfterMaster, AfterParallelSearch, AfterSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Master,
    QueryOptimizer,
    ParallelSearch,
    Summary,
    FinalOutput,
}

impl Node {
    fn name(&self) -> &'static str {
        match self {
            Node::Master => "master",
            Node::QueryOptimizer => "query_optimizer",
            Node::ParallelSearch => "parallel_search",
            Node::Summary => "summary",
            Node::FinalOutput => "final_output",
        }
    }
}

/// Runs the agent-mode graph for one `send_message`/`stream` call,
/// checkpointing after every node when `checkpoint_store` is set.
pub async fn drive(
    task: &mut ConversationTask,
    adapters: &Adapters,
    breakers: &CircuitBreakers,
    user_message: String,
    tx: mpsc::Sender<StreamEvent>,
    checkpoint_store: Option<&dyn CheckpointStore>,
) -> Result<(), StageError> {
    let conv_id = task.conversation_id.clone();
    task.status = TaskStatus::Running;
    task.history.append(Message::user(user_message.clone()));

    let _ = tx.send(StreamEvent::status(&conv_id, "initialization")).await;

    let mut state = AgentState::new(user_message, task.history.tail(11).to_vec());
    let mut node = Node::Master;

    loop {
        state.enter(node.name());
        task.current_stage = node.name().to_string();
        let _ = tx.send(StreamEvent::status(&conv_id, node.name())).await;

        node = match node {
            Node::Master => {
                run_master(adapters, &breakers.chat, &conv_id, &mut state, &tx).await;
                checkpoint(checkpoint_store, &conv_id, &state).await;
                match route_after_master(&state) {
                    AfterMaster::QueryOptimizer => Node::QueryOptimizer,
                    AfterMaster::FinalOutput => Node::FinalOutput,
                }
            }
            Node::QueryOptimizer => {
                run_query_optimizer(adapters, &breakers.chat, &conv_id, &mut state, &tx).await;
                checkpoint(checkpoint_store, &conv_id, &state).await;
                Node::ParallelSearch
            }
            Node::ParallelSearch => {
                run_parallel_search(adapters, breakers, &conv_id, &mut state, &tx).await;
                checkpoint(checkpoint_store, &conv_id, &state).await;
                match route_after_parallel_search(&state) {
                    AfterParallelSearch::Summary => Node::Summary,
                    AfterParallelSearch::Master => Node::Master,
                }
            }
            Node::Summary => {
                run_summary(adapters, &breakers.chat, &conv_id, &mut state, &tx).await;
                checkpoint(checkpoint_store, &conv_id, &state).await;
                match route_after_summary(&state) {
                    AfterSummary::FinalOutput => Node::FinalOutput,
                    AfterSummary::Master => Node::Master,
                }
            }
            Node::FinalOutput => {
                let answer = run_final_output(adapters, &breakers.chat, &conv_id, &mut state, &tx).await;
                checkpoint(checkpoint_store, &conv_id, &state).await;
                task.history.append(Message::assistant(answer));
                task.progress = 1.0;
                task.status = TaskStatus::Completed;
                task.current_stage = "completed".to_string();
                task.touch();
                return Ok(());
            }
        };
    }
}

async fn checkpoint(store: Option<&dyn CheckpointStore>, conv_id: &str, state: &AgentState) {
    let Some(store) = store else { return };
    let checkpoint_id = format!("{}-{}", state.current_stage, state.execution_path.len());
    let snapshot = serde_json::json!({
        "stage": state.current_stage,
        "execution_path": state.execution_path,
        "master_decision": state.master_decision,
        "need_more_info": state.need_more_info,
        "has_final_answer": state.final_answer.is_some(),
    });
    store.save(conv_id, &checkpoint_id, snapshot, serde_json::json!({})).await;
}

async fn run_master(
    adapters: &Adapters,
    breaker: &crate::isolation::CircuitBreaker,
    conv_id: &str,
    state: &mut AgentState,
    tx: &mpsc::Sender<StreamEvent>,
) {
    let _ = tx
        .send(StreamEvent::content_in_stage(
            conv_id,
            "Evaluating whether the current evidence answers the question.".to_string(),
            "master",
        ))
        .await;

    if state.max_iterations_reached() {
        state.master_decision = "finish".to_string();
        state.need_more_info = false;
        return;
    }

    if breaker.check().is_err() {
        // No model available to ask: fall back to the simple heuristic —
        // keep searching until something has been found.
        state.need_more_info = !state.has_sufficient_info();
        state.master_decision = if state.need_more_info { "continue" } else { "finish" }.to_string();
        return;
    }

    let prompt = format!(
        "Decide whether enough evidence has been gathered to answer the \
         question, or whether another retrieval round is needed. Respond \
         with a single JSON object `{{\"decision\": \"continue\"|\"finish\", \
         \"need_more_info\": true|false}}`. No prose outside the JSON \
         object.\n\n\
         question: {:?}\n\
         has_online_results: {}\n\
         has_knowledge_results: {}\n\
         has_lightrag_results: {}\n\
         has_sufficient_info: {}",
        state.user_question,
        !state.online_results.is_empty(),
        !state.knowledge_results.is_empty(),
        !state.lightrag_results.is_empty(),
        state.has_sufficient_info(),
    );

    match adapters.chat.complete_json(&prompt, 0.2, 256, None).await {
        Ok(json) => {
            breaker.record_success();
            state.master_decision = json
                .get("decision")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            state.need_more_info = json
                .get("need_more_info")
                .and_then(|v| v.as_bool())
                .unwrap_or(!state.has_sufficient_info());
        }
        Err(_) => {
            breaker.record_failure();
            state.need_more_info = !state.has_sufficient_info();
            state.master_decision = if state.need_more_info { "continue" } else { "finish" }.to_string();
        }
    }
}

async fn run_query_optimizer(
    adapters: &Adapters,
    breaker: &crate::isolation::CircuitBreaker,
    conv_id: &str,
    state: &mut AgentState,
    tx: &mpsc::Sender<StreamEvent>,
) {
    if breaker.check().is_err() {
        for lane in Lane::ALL {
            state.optimized_queries.entry(lane).or_insert_with(|| state.user_question.clone());
        }
        return;
    }

    let prompt = format!(
        "Produce one optimised search query per retrieval lane for this \
         question. Respond with a single JSON object \
         `{{\"online\": \"...\", \"knowledge\": \"...\", \"lightrag\": \"...\"}}`. \
         No prose outside the JSON object.\n\nquestion: {:?}",
        state.user_question
    );

    match adapters.chat.complete_json(&prompt, 0.3, 256, None).await {
        Ok(json) => {
            breaker.record_success();
            for lane in Lane::ALL {
                let query = json
                    .get(lane.as_str())
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.trim().is_empty())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| state.user_question.clone());
                state.optimized_queries.insert(lane, query);
            }
        }
        Err(_) => {
            breaker.record_failure();
            for lane in Lane::ALL {
                state.optimized_queries.entry(lane).or_insert_with(|| state.user_question.clone());
            }
        }
    }

    let _ = tx
        .send(StreamEvent::content_in_stage(
            conv_id,
            "Optimised the retrieval queries for this round.".to_string(),
            "query_optimizer",
        ))
        .await;
}

async fn run_parallel_search(
    adapters: &Adapters,
    breakers: &CircuitBreakers,
    conv_id: &str,
    state: &mut AgentState,
    tx: &mpsc::Sender<StreamEvent>,
) {
    let _ = tx.send(StreamEvent::status(conv_id, "executing_tasks")).await;

    let online_query = state.optimized_queries.get(&Lane::Online).cloned().unwrap_or_else(|| state.user_question.clone());
    let knowledge_query = state.optimized_queries.get(&Lane::Knowledge).cloned().unwrap_or_else(|| state.user_question.clone());
    let lightrag_query = state.optimized_queries.get(&Lane::Lightrag).cloned().unwrap_or_else(|| state.user_question.clone());

    let lanes = vec![
        (Lane::Online, online_query),
        (Lane::Knowledge, knowledge_query),
        (Lane::Lightrag, lightrag_query),
    ];

    let results: Vec<(Lane, Vec<SearchResult>)> = stream::iter(lanes.into_iter().map(|(lane, query)| {
        search_one_lane(adapters, breakers, lane, query)
    }))
    .buffer_unordered(3)
    .collect()
    .await;

    for (lane, found) in results {
        let count = found.len();
        state.results_for_mut(lane).extend(found);
        let _ = tx
            .send(StreamEvent::content_in_stage(
                conv_id,
                format!("{} search added {count} result(s).", lane.as_str()),
                "executing_tasks",
            ))
            .await;
    }
}

async fn search_one_lane(
    adapters: &Adapters,
    breakers: &CircuitBreakers,
    lane: Lane,
    query: String,
) -> (Lane, Vec<SearchResult>) {
    let found = match lane {
        Lane::Online => {
            if breakers.web_search.check().is_err() {
                Vec::new()
            } else {
                match adapters.web_search.search(&query, 5, "en", true).await {
                    Ok(r) => {
                        breakers.web_search.record_success();
                        r
                    }
                    Err(_) => {
                        breakers.web_search.record_failure();
                        Vec::new()
                    }
                }
            }
        }
        Lane::Knowledge => {
            if breakers.doc_retrieval.check().is_err() {
                Vec::new()
            } else {
                match adapters
                    .doc_retrieval
                    .query_doc_by_name(None, crate::adapters::DEFAULT_COLLECTION, &query, 5)
                    .await
                {
                    Ok((doc, _)) => {
                        breakers.doc_retrieval.record_success();
                        doc.documents
                            .first()
                            .into_iter()
                            .flatten()
                            .map(|content| SearchResult {
                                title: "document".to_string(),
                                content: content.clone(),
                                url: None,
                                score: None,
                                source: "knowledge_search".to_string(),
                                metadata: Default::default(),
                            })
                            .collect()
                    }
                    Err(_) => {
                        breakers.doc_retrieval.record_failure();
                        Vec::new()
                    }
                }
            }
        }
        Lane::Lightrag => {
            if breakers.graph_rag.check().is_err() {
                Vec::new()
            } else {
                match adapters.graph_rag.search(&query, crate::adapters::GraphRagMode::Hybrid).await {
                    Ok(r) => {
                        breakers.graph_rag.record_success();
                        r
                    }
                    Err(_) => {
                        breakers.graph_rag.record_failure();
                        Vec::new()
                    }
                }
            }
        }
    };
    (lane, found)
}

async fn run_summary(
    adapters: &Adapters,
    breaker: &crate::isolation::CircuitBreaker,
    conv_id: &str,
    state: &mut AgentState,
    tx: &mpsc::Sender<StreamEvent>,
) {
    let _ = tx.send(StreamEvent::status(conv_id, "response_generation")).await;

    for lane in Lane::ALL {
        let results = state.results_for(lane);
        if results.is_empty() || !state.summary_for(lane).is_empty() {
            continue;
        }
        let joined = results
            .iter()
            .map(|r| format!("- {}: {}", r.title, r.content))
            .collect::<Vec<_>>()
            .join("\n");

        if breaker.check().is_err() {
            state.set_summary(lane, format!("{} result(s) retrieved but not yet summarised.", results.len()));
            continue;
        }

        let prompt = format!(
            "Summarise these {} search results in two or three sentences, \
             focused on the question {:?}.\n\n{joined}",
            lane.as_str(),
            state.user_question
        );
        match adapters.chat.complete(&prompt, 0.3, 300, None, &[]).await {
            Ok(summary) => {
                breaker.record_success();
                state.set_summary(lane, summary);
            }
            Err(_) => {
                breaker.record_failure();
                state.set_summary(lane, format!("{} result(s) retrieved but summarisation failed.", results.len()));
            }
        }
    }

    let _ = tx
        .send(StreamEvent::content_in_stage(
            conv_id,
            "Summarised this round's retrieval results.".to_string(),
            "response_generation",
        ))
        .await;
}

async fn run_final_output(
    adapters: &Adapters,
    breaker: &crate::isolation::CircuitBreaker,
    conv_id: &str,
    state: &mut AgentState,
    tx: &mpsc::Sender<StreamEvent>,
) -> String {
    let _ = tx.send(StreamEvent::status(conv_id, "generating_answer")).await;

    let summaries = Lane::ALL
        .iter()
        .map(|lane| format!("{}: {}", lane.as_str(), state.summary_for(*lane)))
        .collect::<Vec<_>>()
        .join("\n");

    let answer = if breaker.check().is_err() {
        fallback_answer(state)
    } else {
        let prompt = format!(
            "Using the summaries below, write a direct final answer to the \
             question. If the summaries are empty, say so plainly.\n\n\
             question: {:?}\n\nsummaries:\n{summaries}",
            state.user_question
        );
        match adapters.chat.complete(&prompt, 0.5, 1024, None, &[]).await {
            Ok(text) => {
                breaker.record_success();
                text
            }
            Err(_) => {
                breaker.record_failure();
                fallback_answer(state)
            }
        }
    };

    state.final_answer = Some(answer.clone());
    let _ = tx
        .send(StreamEvent::content_in_stage(conv_id, answer.clone(), "generating_answer"))
        .await;
    answer
}

fn fallback_answer(state: &AgentState) -> String {
    if state.has_any_summary() {
        Lane::ALL
            .iter()
            .map(|lane| state.summary_for(*lane))
            .filter(|s| !s.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        format!(
            "I wasn't able to gather enough information to answer \"{}\" confidently.",
            state.user_question
        )
    }
}
