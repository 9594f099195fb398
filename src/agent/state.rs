//! Agent-mode shared state and its routing predicates. The five
//! nodes in `agent/mod.rs` each take `&mut AgentState`; predicates here
//! decide which node runs next.

use serde_json::Value;
use std::collections::HashMap;

use crate::model::{Message, SearchResult};

const MAX_ITERATIONS: usize = 5;

/// One named retrieval lane tracked independently through the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    Online,
    Knowledge,
    Lightrag,
}

impl Lane {
    pub const ALL: [Lane; 3] = [Lane::Online, Lane::Knowledge, Lane::Lightrag];

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Online => "online",
            Lane::Knowledge => "knowledge",
            Lane::Lightrag => "lightrag",
        }
    }
}

/// Mutable state threaded through the agent-mode node graph.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub user_question: String,
    pub history: Vec<Message>,
    pub current_stage: String,

    pub online_results: Vec<SearchResult>,
    pub knowledge_results: Vec<SearchResult>,
    pub lightrag_results: Vec<SearchResult>,

    pub master_decision: String,
    pub need_more_info: bool,
    pub optimized_queries: HashMap<Lane, String>,

    pub online_summary: String,
    pub knowledge_summary: String,
    pub lightrag_summary: String,

    pub execution_path: Vec<String>,
    pub agent_outputs: HashMap<String, Value>,
    pub final_answer: Option<String>,
}

impl AgentState {
    pub fn new(user_question: impl Into<String>, history: Vec<Message>) -> Self {
        Self {
            user_question: user_question.into(),
            history,
            current_stage: "master".to_string(),
            online_results: Vec::new(),
            knowledge_results: Vec::new(),
            lightrag_results: Vec::new(),
            master_decision: String::new(),
            need_more_info: true,
            optimized_queries: HashMap::new(),
            online_summary: String::new(),
            knowledge_summary: String::new(),
            lightrag_summary: String::new(),
            execution_path: Vec::new(),
            agent_outputs: HashMap::new(),
            final_answer: None,
        }
    }

    pub fn enter(&mut self, node: &str) {
        self.current_stage = node.to_string();
        self.execution_path.push(node.to_string());
    }

    pub fn results_for(&self, lane: Lane) -> &[SearchResult] {
        match lane {
            Lane::Online => &self.online_results,
            Lane::Knowledge => &self.knowledge_results,
            Lane::Lightrag => &self.lightrag_results,
        }
    }

    pub fn results_for_mut(&mut self, lane: Lane) -> &mut Vec<SearchResult> {
        match lane {
            Lane::Online => &mut self.online_results,
            Lane::Knowledge => &mut self.knowledge_results,
            Lane::Lightrag => &mut self.lightrag_results,
        }
    }

    pub fn summary_for(&self, lane: Lane) -> &str {
        match lane {
            Lane::Online => &self.online_summary,
            Lane::Knowledge => &self.knowledge_summary,
            Lane::Lightrag => &self.lightrag_summary,
        }
    }

    pub fn set_summary(&mut self, lane: Lane, summary: String) {
        match lane {
            Lane::Online => self.online_summary = summary,
            Lane::Knowledge => self.knowledge_summary = summary,
            Lane::Lightrag => self.lightrag_summary = summary,
        }
    }

    pub fn has_any_results(&self) -> bool {
        !self.online_results.is_empty()
            || !self.knowledge_results.is_empty()
            || !self.lightrag_results.is_empty()
    }

    pub fn has_any_summary(&self) -> bool {
        !self.online_summary.is_empty()
            || !self.knowledge_summary.is_empty()
            || !self.lightrag_summary.is_empty()
    }

    /// `sufficient-info` ≔ (≥1 `*_results` non-empty) AND (≥1 `*_summary`
    /// non-empty).
    pub fn has_sufficient_info(&self) -> bool {
        self.has_any_results() && self.has_any_summary()
    }

    fn master_visits(&self) -> usize {
        self.execution_path.iter().filter(|n| n.as_str() == "master").count()
    }

    pub fn max_iterations_reached(&self) -> bool {
        self.master_visits() >= MAX_ITERATIONS
    }
}

/// Node the graph should run after `master` (routing predicate
/// `route_after_master`/`check_max_iterations`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterMaster {
    QueryOptimizer,
    FinalOutput,
}

pub fn route_after_master(state: &AgentState) -> AfterMaster {
    if state.max_iterations_reached() {
        return AfterMaster::FinalOutput;
    }
    match state.master_decision.as_str() {
        "finish" => AfterMaster::FinalOutput,
        "continue" => AfterMaster::QueryOptimizer,
        _ if state.need_more_info => AfterMaster::QueryOptimizer,
        _ => AfterMaster::FinalOutput,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterParallelSearch {
    Summary,
    Master,
}

pub fn route_after_parallel_search(state: &AgentState) -> AfterParallelSearch {
    if state.has_any_results() {
        AfterParallelSearch::Summary
    } else {
        AfterParallelSearch::Master
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterSummary {
    FinalOutput,
    Master,
}

pub fn route_after_summary(state: &AgentState) -> AfterSummary {
    if state.max_iterations_reached() {
        return AfterSummary::FinalOutput;
    }
    if state.has_any_summary() || state.has_sufficient_info() {
        AfterSummary::FinalOutput
    } else {
        AfterSummary::Master
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_has_no_sufficient_info() {
        let state = AgentState::new("q", vec![]);
        assert!(!state.has_sufficient_info());
    }

    #[test]
    fn master_routes_to_query_optimizer_by_default() {
        let state = AgentState::new("q", vec![]);
        assert_eq!(route_after_master(&state), AfterMaster::QueryOptimizer);
    }

    #[test]
    fn master_routes_to_final_output_on_explicit_finish() {
        let mut state = AgentState::new("q", vec![]);
        state.master_decision = "finish".to_string();
        assert_eq!(route_after_master(&state), AfterMaster::FinalOutput);
    }

    #[test]
    fn max_iterations_forces_final_output() {
        let mut state = AgentState::new("q", vec![]);
        for _ in 0..MAX_ITERATIONS {
            state.enter("master");
        }
        assert!(state.max_iterations_reached());
        assert_eq!(route_after_master(&state), AfterMaster::FinalOutput);
        assert_eq!(route_after_summary(&state), AfterSummary::FinalOutput);
    }

    #[test]
    fn parallel_search_routes_to_master_when_empty() {
        let state = AgentState::new("q", vec![]);
        assert_eq!(route_after_parallel_search(&state), AfterParallelSearch::Master);
    }

    #[test]
    fn parallel_search_routes_to_summary_when_results_present() {
        let mut state = AgentState::new("q", vec![]);
        state.online_results.push(SearchResult {
            title: "t".into(),
            content: "c".into(),
            url: None,
            score: None,
            source: "online_search".into(),
            metadata: Default::default(),
        });
        assert_eq!(route_after_parallel_search(&state), AfterParallelSearch::Summary);
    }

    #[test]
    fn summary_routes_to_master_without_summaries() {
        let state = AgentState::new("q", vec![]);
        assert_eq!(route_after_summary(&state), AfterSummary::Master);
    }
}
