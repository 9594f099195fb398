//! Core data model: messages, conversation history, tasks, plans, and
//! search results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// The three roles a [`Message`] can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A single turn in a conversation. Immutable once appended (I1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Append-only sequence of messages for one conversation. Insertion order
/// is the authoritative ordering (I1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationHistory {
    pub conversation_id: String,
    pub user_id: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl ConversationHistory {
    pub fn new(conversation_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }

    /// Appends a message, bumping `updated_at`. Never mutates prior entries.
    pub fn append(&mut self, message: Message) {
        self.updated_at = message.timestamp.max(self.updated_at);
        self.messages.push(message);
    }

    /// Last `n` messages, oldest first (used as dialog context for stages).
    pub fn tail(&self, n: usize) -> &[Message] {
        let len = self.messages.len();
        &self.messages[len.saturating_sub(n)..]
    }
}

/// Execution mode a conversation task runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Workflow,
    Agent,
}

impl Mode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "workflow" => Some(Mode::Workflow),
            "agent" => Some(Mode::Agent),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Workflow => "workflow",
            Mode::Agent => "agent",
        }
    }
}

/// Lifecycle status of a [`ConversationTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Error,
    Cancelled,
}

/// A candidate knowledge base offered by the caller for `knowledge_search`
/// sub-tasks (the knowledge-base selection sub-stage).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// The unit of isolation: one conversation's mutable state. Owned
/// exclusively by whichever driver currently holds the per-conversation
/// lock (see `isolation.rs`).
#[derive(Debug, Clone)]
pub struct ConversationTask {
    pub conversation_id: String,
    pub user_id: String,
    pub mode: Mode,
    pub history: ConversationHistory,
    pub status: TaskStatus,
    pub current_stage: String,
    pub progress: f32,
    pub knowledge_bases: Vec<KnowledgeBase>,
    pub knowledge_api_url: Option<String>,
    pub user_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_count: u32,
    pub last_error: Option<String>,
    /// Carried between stages within one `send_message`/`stream` call.
    pub expanded_question: Option<String>,
    pub expert_analysis: Option<String>,
}

impl ConversationTask {
    pub fn new(conversation_id: String, user_id: String, mode: Mode) -> Self {
        let now = Utc::now();
        Self {
            history: ConversationHistory::new(conversation_id.clone(), user_id.clone()),
            conversation_id,
            user_id,
            mode,
            status: TaskStatus::Pending,
            current_stage: "initialization".to_string(),
            progress: 0.0,
            knowledge_bases: Vec::new(),
            knowledge_api_url: None,
            user_token: None,
            created_at: now,
            updated_at: now,
            error_count: 0,
            last_error: None,
            expanded_question: None,
            expert_analysis: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error_count += 1;
        self.last_error = Some(message.into());
        self.touch();
    }
}

/// Valid retrieval sub-task kinds for `TaskPlan`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalTaskType {
    OnlineSearch,
    KnowledgeSearch,
    LightragSearch,
}

impl RetrievalTaskType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online_search" => Some(Self::OnlineSearch),
            "knowledge_search" => Some(Self::KnowledgeSearch),
            "lightrag_search" => Some(Self::LightragSearch),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnlineSearch => "online_search",
            Self::KnowledgeSearch => "knowledge_search",
            Self::LightragSearch => "lightrag_search",
        }
    }

    /// The stage-description key this task type reports status under while
    /// running (the stage-description table).
    pub fn status_stage(&self) -> &'static str {
        match self {
            Self::OnlineSearch => "online_search",
            Self::KnowledgeSearch => "knowledge_search",
            Self::LightragSearch => "lightrag_query",
        }
    }
}

/// One entry in a [`TaskPlan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTask {
    #[serde(rename = "type")]
    pub task_type: RetrievalTaskType,
    pub query: String,
}

/// The decomposition produced by Stage 2 and consumed by Stage 3.
#[derive(Debug, Clone)]
pub struct TaskPlan {
    pub tasks: Vec<PlannedTask>,
    pub max_concurrency: usize,
    pub timeout_seconds: u64,
}

impl TaskPlan {
    /// Plan-stage fallback: one of each task type, query verbatim.
    pub fn default_plan(expanded_question: &str) -> Self {
        Self {
            tasks: vec![
                PlannedTask {
                    task_type: RetrievalTaskType::OnlineSearch,
                    query: expanded_question.to_string(),
                },
                PlannedTask {
                    task_type: RetrievalTaskType::KnowledgeSearch,
                    query: expanded_question.to_string(),
                },
                PlannedTask {
                    task_type: RetrievalTaskType::LightragSearch,
                    query: expanded_question.to_string(),
                },
            ],
            max_concurrency: 3,
            timeout_seconds: 60,
        }
    }
}

/// A single retrieval hit, normalised across adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub score: Option<f32>,
    pub source: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// Outcome of one Stage-3 sub-task: either results (possibly empty) or a
/// recorded error, never both (I6).
#[derive(Debug, Clone)]
pub enum SubTaskOutcome {
    Results {
        results: Vec<SearchResult>,
        collection_name: Option<String>,
    },
    Error {
        message: String,
    },
}

/// A completed sub-task, tagged with the plan entry it answers.
#[derive(Debug, Clone)]
pub struct SubTaskResult {
    pub task_type: RetrievalTaskType,
    pub query: String,
    pub outcome: SubTaskOutcome,
}

impl SubTaskResult {
    pub fn result_count(&self) -> usize {
        match &self.outcome {
            SubTaskOutcome::Results { results, .. } => results.len(),
            SubTaskOutcome::Error { .. } => 0,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, SubTaskOutcome::Error { .. })
    }
}
