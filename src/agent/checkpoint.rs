//! Checkpoint store: one async capability contract for
//! persisting agent-mode graph state, with two interchangeable
//! implementations — in-memory and a remote-KV-with-TTL store. The latter
//! uses a Redis-shaped key layout but is kept in-process rather than wired
//! to a real network client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// One saved graph-state snapshot.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub thread_id: String,
    pub checkpoint_id: String,
    pub state: Value,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Aggregate counters for a checkpoint store's current contents.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CheckpointStatistics {
    pub total_checkpoints: u64,
    pub total_threads: u64,
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, thread_id: &str, checkpoint_id: &str, state: Value, metadata: Value);
    async fn load(&self, thread_id: &str, checkpoint_id: &str) -> Option<Checkpoint>;
    async fn list(&self, thread_id: &str) -> Vec<String>;
    async fn delete_checkpoint(&self, thread_id: &str, checkpoint_id: &str) -> bool;
    async fn delete_thread(&self, thread_id: &str) -> bool;
    async fn latest(&self, thread_id: &str) -> Option<Checkpoint>;
    async fn statistics(&self) -> CheckpointStatistics;
}

struct ThreadCheckpoints {
    by_id: HashMap<String, Checkpoint>,
    /// Insertion order, since checkpoint ids aren't necessarily sortable.
    order: Vec<String>,
}

/// In-memory implementation, one `ThreadCheckpoints` map guarded by a
/// single mutex — process lifetime only.
pub struct MemoryCheckpointStore {
    threads: Mutex<HashMap<String, ThreadCheckpoints>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            threads: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, thread_id: &str, checkpoint_id: &str, state: Value, metadata: Value) {
        let mut threads = self.threads.lock().unwrap();
        let entry = threads.entry(thread_id.to_string()).or_insert_with(|| ThreadCheckpoints {
            by_id: HashMap::new(),
            order: Vec::new(),
        });
        if !entry.by_id.contains_key(checkpoint_id) {
            entry.order.push(checkpoint_id.to_string());
        }
        entry.by_id.insert(
            checkpoint_id.to_string(),
            Checkpoint {
                thread_id: thread_id.to_string(),
                checkpoint_id: checkpoint_id.to_string(),
                state,
                metadata,
                created_at: Utc::now(),
            },
        );
    }

    async fn load(&self, thread_id: &str, checkpoint_id: &str) -> Option<Checkpoint> {
        let threads = self.threads.lock().unwrap();
        threads.get(thread_id)?.by_id.get(checkpoint_id).cloned()
    }

    async fn list(&self, thread_id: &str) -> Vec<String> {
        let threads = self.threads.lock().unwrap();
        threads.get(thread_id).map(|t| t.order.clone()).unwrap_or_default()
    }

    async fn delete_checkpoint(&self, thread_id: &str, checkpoint_id: &str) -> bool {
        let mut threads = self.threads.lock().unwrap();
        let Some(entry) = threads.get_mut(thread_id) else {
            return false;
        };
        if entry.by_id.remove(checkpoint_id).is_some() {
            entry.order.retain(|id| id != checkpoint_id);
            true
        } else {
            false
        }
    }

    async fn delete_thread(&self, thread_id: &str) -> bool {
        let mut threads = self.threads.lock().unwrap();
        threads.remove(thread_id).is_some()
    }

    async fn latest(&self, thread_id: &str) -> Option<Checkpoint> {
        let threads = self.threads.lock().unwrap();
        let entry = threads.get(thread_id)?;
        let last_id = entry.order.last()?;
        entry.by_id.get(last_id).cloned()
    }

    async fn statistics(&self) -> CheckpointStatistics {
        let threads = self.threads.lock().unwrap();
        CheckpointStatistics {
            total_checkpoints: threads.values().map(|t| t.by_id.len() as u64).sum(),
            total_threads: threads.len() as u64,
        }
    }
}

/// Remote-KV-with-TTL implementation. Keys follow
/// `langgraph:checkpoint:{thread_id}:{checkpoint_id}` and
/// `langgraph:metadata:{thread_id}`, the layout a real Redis-backed
/// deployment would use; kept as a second in-process store here, with
/// entries past `ttl` treated as absent by every read path instead of
/// being actively evicted.
pub struct RemoteKvCheckpointStore {
    entries: Mutex<HashMap<String, (Checkpoint, DateTime<Utc>)>>,
    index: Mutex<HashMap<String, Vec<String>>>,
    ttl: Duration,
}

fn checkpoint_key(thread_id: &str, checkpoint_id: &str) -> String {
    format!("langgraph:checkpoint:{thread_id}:{checkpoint_id}")
}

fn metadata_key(thread_id: &str) -> String {
    format!("langgraph:metadata:{thread_id}")
}

impl RemoteKvCheckpointStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            index: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn is_expired(&self, stored_at: DateTime<Utc>) -> bool {
        Utc::now().signed_duration_since(stored_at).to_std().unwrap_or_default() >= self.ttl
    }
}

#[async_trait]
impl CheckpointStore for RemoteKvCheckpointStore {
    async fn save(&self, thread_id: &str, checkpoint_id: &str, state: Value, metadata: Value) {
        let key = checkpoint_key(thread_id, checkpoint_id);
        let checkpoint = Checkpoint {
            thread_id: thread_id.to_string(),
            checkpoint_id: checkpoint_id.to_string(),
            state,
            metadata,
            created_at: Utc::now(),
        };
        let now = checkpoint.created_at;
        self.entries.lock().unwrap().insert(key, (checkpoint, now));

        let mut index = self.index.lock().unwrap();
        let list = index.entry(metadata_key(thread_id)).or_default();
        if !list.contains(&checkpoint_id.to_string()) {
            list.push(checkpoint_id.to_string());
        }
    }

    async fn load(&self, thread_id: &str, checkpoint_id: &str) -> Option<Checkpoint> {
        let key = checkpoint_key(thread_id, checkpoint_id);
        let entries = self.entries.lock().unwrap();
        let (checkpoint, stored_at) = entries.get(&key)?;
        if self.is_expired(*stored_at) {
            None
        } else {
            Some(checkpoint.clone())
        }
    }

    async fn list(&self, thread_id: &str) -> Vec<String> {
        let index = self.index.lock().unwrap();
        let entries = self.entries.lock().unwrap();
        index
            .get(&metadata_key(thread_id))
            .map(|ids| {
                ids.iter()
                    .filter(|id| {
                        entries
                            .get(&checkpoint_key(thread_id, id))
                            .map(|(_, at)| !self.is_expired(*at))
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn delete_checkpoint(&self, thread_id: &str, checkpoint_id: &str) -> bool {
        let key = checkpoint_key(thread_id, checkpoint_id);
        let removed = self.entries.lock().unwrap().remove(&key).is_some();
        if removed {
            if let Some(list) = self.index.lock().unwrap().get_mut(&metadata_key(thread_id)) {
                list.retain(|id| id != checkpoint_id);
            }
        }
        removed
    }

    async fn delete_thread(&self, thread_id: &str) -> bool {
        let ids = self.list(thread_id).await;
        if ids.is_empty() {
            return false;
        }
        let mut entries = self.entries.lock().unwrap();
        for id in &ids {
            entries.remove(&checkpoint_key(thread_id, id));
        }
        self.index.lock().unwrap().remove(&metadata_key(thread_id));
        true
    }

    async fn latest(&self, thread_id: &str) -> Option<Checkpoint> {
        let ids = self.list(thread_id).await;
        let last = ids.last()?;
        self.load(thread_id, last).await
    }

    async fn statistics(&self) -> CheckpointStatistics {
        let entries = self.entries.lock().unwrap();
        let index = self.index.lock().unwrap();
        CheckpointStatistics {
            total_checkpoints: entries.values().filter(|(_, at)| !self.is_expired(*at)).count() as u64,
            total_threads: index.len() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn round_trip<S: CheckpointStore>(store: &S) {
        assert!(store.load("t1", "c1").await.is_none());
        store.save("t1", "c1", serde_json::json!({"stage": "master"}), serde_json::json!({})).await;
        let loaded = store.load("t1", "c1").await.unwrap();
        assert_eq!(loaded.state["stage"], "master");

        store.save("t1", "c2", serde_json::json!({"stage": "summary"}), serde_json::json!({})).await;
        assert_eq!(store.list("t1").await, vec!["c1".to_string(), "c2".to_string()]);
        assert_eq!(store.latest("t1").await.unwrap().checkpoint_id, "c2");

        assert!(store.delete_checkpoint("t1", "c1").await);
        assert!(!store.delete_checkpoint("t1", "c1").await);
        assert_eq!(store.list("t1").await, vec!["c2".to_string()]);

        assert!(store.delete_thread("t1").await);
        assert!(store.list("t1").await.is_empty());
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        round_trip(&MemoryCheckpointStore::new()).await;
    }

    #[tokio::test]
    async fn remote_kv_store_round_trip() {
        round_trip(&RemoteKvCheckpointStore::new(Duration::from_secs(3600))).await;
    }

    #[tokio::test]
    async fn remote_kv_store_expires_entries() {
        let store = RemoteKvCheckpointStore::new(Duration::from_millis(0));
        store.save("t1", "c1", serde_json::json!({}), serde_json::json!({})).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(store.load("t1", "c1").await.is_none());
        assert!(store.list("t1").await.is_empty());
    }

    #[tokio::test]
    async fn statistics_count_threads_and_checkpoints() {
        let store = MemoryCheckpointStore::new();
        store.save("t1", "c1", serde_json::json!({}), serde_json::json!({})).await;
        store.save("t2", "c1", serde_json::json!({}), serde_json::json!({})).await;
        let stats = store.statistics().await;
        assert_eq!(stats.total_threads, 2);
        assert_eq!(stats.total_checkpoints, 2);
    }
}
