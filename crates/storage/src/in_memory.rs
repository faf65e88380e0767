//! In-memory conversation store — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use inquest_core::error::StorageError;
use inquest_core::storage::{ConversationStore, Turn};

/// Maximum turns retained per thread; oldest are evicted first.
const MAX_TURNS_PER_THREAD: usize = 256;
/// Maximum number of threads before the oldest-touched is evicted.
const MAX_THREADS: usize = 1_000;

/// An in-memory store keeping threads in a map.
pub struct MemoryConversationStore {
    threads: RwLock<HashMap<String, Vec<Turn>>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self { threads: RwLock::new(HashMap::new()) }
    }
}

impl Default for MemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn get_thread(&self, id: &str) -> Result<Vec<Turn>, StorageError> {
        let threads = self.threads.read().await;
        Ok(threads.get(id).cloned().unwrap_or_default())
    }

    async fn append(&self, id: &str, turn: Turn) -> Result<(), StorageError> {
        let mut threads = self.threads.write().await;

        if !threads.contains_key(id) && threads.len() >= MAX_THREADS {
            // Evict the thread with the oldest most-recent turn.
            let stalest = threads
                .iter()
                .min_by_key(|(_, turns)| turns.last().map(|t| t.timestamp))
                .map(|(k, _)| k.clone());
            if let Some(key) = stalest {
                debug!(thread = %key, "Evicting stalest thread at capacity");
                threads.remove(&key);
            }
        }

        let turns = threads.entry(id.to_string()).or_default();

        // Idempotent on turn id: the same turn appended twice stores once.
        if turns.iter().any(|t| t.id == turn.id) {
            return Ok(());
        }

        turns.push(turn);
        if turns.len() > MAX_TURNS_PER_THREAD {
            let excess = turns.len() - MAX_TURNS_PER_THREAD;
            turns.drain(0..excess);
        }
        Ok(())
    }

    async fn thread_count(&self) -> Result<usize, StorageError> {
        Ok(self.threads.read().await.len())
    }
}
