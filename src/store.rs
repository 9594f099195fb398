//! Conversation store (C3): the single authority for conversation
//! identity. Concurrency safety for a given id is delegated to the
//! per-conversation `tokio::sync::Mutex` the store hands out (I2, I3).

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{ConversationTask, KnowledgeBase, Mode, TaskStatus};

/// A lightweight, independently-readable mirror of a task's registry
/// fields (the registry entry), updated whenever the owning driver
/// changes status. Lets `list`/`statistics` avoid contending the
/// per-conversation lock.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub conversation_id: String,
    pub user_id: String,
    pub mode: Mode,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub streaming: bool,
}

impl RegistryEntry {
    fn from_task(task: &ConversationTask) -> Self {
        Self {
            conversation_id: task.conversation_id.clone(),
            user_id: task.user_id.clone(),
            mode: task.mode,
            status: task.status,
            created_at: task.created_at,
            updated_at: task.updated_at,
            error_count: task.error_count,
            last_error: task.last_error.clone(),
            streaming: false,
        }
    }
}

/// Aggregate counts by mode and status across every tracked conversation.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Statistics {
    pub total_tasks: usize,
    pub pending_tasks: usize,
    pub running_tasks: usize,
    pub completed_tasks: usize,
    pub error_tasks: usize,
    pub cancelled_tasks: usize,
    pub streaming_tasks: usize,
    pub total_errors: u64,
    pub workflow_tasks: usize,
    pub agent_tasks: usize,
}

struct Entry {
    task: Arc<Mutex<ConversationTask>>,
    registry: RegistryEntry,
}

/// In-memory mapping conversation-id → task handle. The map itself
/// is protected by an `RwLock` for create/lookup/close/list; each entry's
/// mutable `ConversationTask` is protected by its own `Mutex`, acquired by
/// drivers via [`ConversationStore::try_acquire`].
#[derive(Default)]
pub struct ConversationStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new conversation task. Uses the caller-supplied id if
    /// present, else mints a fresh UUID. Fails `UnsupportedMode` for modes
    /// outside `{workflow, agent}` (checked by the caller via
    /// `Mode::parse` before this is reached in the HTTP path).
    pub async fn create(
        &self,
        user_id: String,
        mode: Mode,
        conversation_id: Option<String>,
        knowledge_bases: Vec<KnowledgeBase>,
        knowledge_api_url: Option<String>,
        user_token: Option<String>,
    ) -> (String, bool) {
        let is_custom_id = conversation_id.is_some();
        let id = conversation_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut task = ConversationTask::new(id.clone(), user_id, mode);
        task.knowledge_bases = knowledge_bases;
        task.knowledge_api_url = knowledge_api_url;
        task.user_token = user_token;

        let registry = RegistryEntry::from_task(&task);
        let entry = Entry {
            task: Arc::new(Mutex::new(task)),
            registry,
        };

        let mut entries = self.entries.write().await;
        entries.insert(id.clone(), entry);
        (id, is_custom_id)
    }

    /// Returns the task handle, or `NotFound`.
    pub async fn get(&self, id: &str) -> Result<Arc<Mutex<ConversationTask>>, StoreError> {
        let entries = self.entries.read().await;
        entries
            .get(id)
            .map(|e| Arc::clone(&e.task))
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Acquires the per-conversation lock for the full duration of one
    /// `send_message`/`stream` call. Refuses immediately (I3) rather than
    /// queuing behind an in-flight stream: a second concurrent call on the
    /// same conversation gets `LockContention`, not a wait.
    pub async fn try_acquire(
        &self,
        id: &str,
    ) -> Result<OwnedMutexGuard<ConversationTask>, StoreError> {
        let handle = self.get(id).await?;
        self.mark_streaming(id, true).await;
        match handle.try_lock_owned() {
            Ok(guard) => Ok(guard),
            Err(_) => {
                self.mark_streaming(id, false).await;
                Err(StoreError::LockContention(id.to_string()))
            }
        }
    }

    /// Transitions status to `cancelled` if running, removes the entry.
    /// Idempotent: the second call on an already-closed id reports
    /// `NotFound`, and no residual entry remains either time. A driver that
    /// still holds the task's lock (acquired via `try_acquire`) keeps
    /// running against its own `Arc`, but that task's `status` field now
    /// correctly reads `cancelled` rather than being silently orphaned
    /// from the registry while still reporting `running`.
    pub async fn close(&self, id: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        let entry = entries.remove(id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        drop(entries);

        let mut task = entry.task.lock().await;
        if task.status == TaskStatus::Running {
            task.status = TaskStatus::Cancelled;
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    /// Snapshot summaries, optionally filtered by `user_id`.
    pub async fn list(&self, user_id: Option<&str>) -> Vec<RegistryEntry> {
        let entries = self.entries.read().await;
        entries
            .values()
            .map(|e| e.registry.clone())
            .filter(|r| user_id.map(|u| u == r.user_id).unwrap_or(true))
            .collect()
    }

    pub async fn statistics(&self) -> Statistics {
        let entries = self.entries.read().await;
        let mut stats = Statistics::default();
        for e in entries.values() {
            let r = &e.registry;
            stats.total_tasks += 1;
            stats.total_errors += r.error_count as u64;
            match r.status {
                TaskStatus::Pending => stats.pending_tasks += 1,
                TaskStatus::Running => stats.running_tasks += 1,
                TaskStatus::Completed => stats.completed_tasks += 1,
                TaskStatus::Error => stats.error_tasks += 1,
                TaskStatus::Cancelled => stats.cancelled_tasks += 1,
            }
            if r.streaming {
                stats.streaming_tasks += 1;
            }
            match r.mode {
                Mode::Workflow => stats.workflow_tasks += 1,
                Mode::Agent => stats.agent_tasks += 1,
            }
        }
        stats
    }

    /// Called by a driver whenever it changes the task's status, to keep
    /// the registry mirror current without requiring `list`/`statistics`
    /// callers to contend the per-conversation lock.
    pub async fn sync_registry(&self, id: &str, task: &ConversationTask) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(id) {
            let streaming = entry.registry.streaming;
            entry.registry = RegistryEntry::from_task(task);
            entry.registry.streaming = streaming;
        }
    }

    async fn mark_streaming(&self, id: &str, streaming: bool) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(id) {
            entry.registry.streaming = streaming;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_with_custom_id_round_trips() {
        let store = ConversationStore::new();
        let (id, is_custom) = store
            .create(
                "u1".into(),
                Mode::Workflow,
                Some("my-custom-id".into()),
                vec![],
                None,
                None,
            )
            .await;
        assert!(is_custom);
        assert_eq!(id, "my-custom-id");
        let handle = store.get(&id).await.unwrap();
        let task = handle.lock().await;
        assert_eq!(task.conversation_id, "my-custom-id");
    }

    #[tokio::test]
    async fn create_without_id_mints_uuid() {
        let store = ConversationStore::new();
        let (id, is_custom) = store
            .create("u1".into(), Mode::Workflow, None, vec![], None, None)
            .await;
        assert!(!is_custom);
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_leaves_no_residual_entry() {
        let store = ConversationStore::new();
        let (id, _) = store
            .create("u1".into(), Mode::Workflow, None, vec![], None, None)
            .await;
        store.close(&id).await.unwrap();
        assert!(matches!(store.close(&id).await, Err(StoreError::NotFound(_))));
        assert!(matches!(store.get(&id).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn close_marks_a_running_task_cancelled_before_removing_it() {
        let store = ConversationStore::new();
        let (id, _) = store
            .create("u1".into(), Mode::Workflow, None, vec![], None, None)
            .await;
        let handle = store.get(&id).await.unwrap();
        {
            let mut task = handle.lock().await;
            task.status = TaskStatus::Running;
        }

        store.close(&id).await.unwrap();

        let task = handle.lock().await;
        assert_eq!(task.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn concurrent_acquire_refuses_second_caller() {
        let store = ConversationStore::new();
        let (id, _) = store
            .create("u1".into(), Mode::Workflow, None, vec![], None, None)
            .await;
        let first = store.try_acquire(&id).await.unwrap();
        let second = store.try_acquire(&id).await;
        assert!(matches!(second, Err(StoreError::LockContention(_))));
        drop(first);
        assert!(store.try_acquire(&id).await.is_ok());
    }

    #[tokio::test]
    async fn list_filters_by_user_id() {
        let store = ConversationStore::new();
        store
            .create("u1".into(), Mode::Workflow, None, vec![], None, None)
            .await;
        store
            .create("u2".into(), Mode::Agent, None, vec![], None, None)
            .await;
        let only_u1 = store.list(Some("u1")).await;
        assert_eq!(only_u1.len(), 1);
        assert_eq!(only_u1[0].user_id, "u1");
        assert_eq!(store.list(None).await.len(), 2);
    }
}
