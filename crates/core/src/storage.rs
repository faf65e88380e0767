//! Conversation storage trait.
//!
//! The daemon records each admitted request and its result as turns in a
//! thread. The core only requires idempotent append and a bounded-latency
//! read; persistence guarantees are the implementation's concern.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageError;
use crate::message::Role;

/// A single turn in a conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Unique turn ID. Appending the same ID twice stores once.
    pub id: String,

    /// Who produced this turn.
    pub role: Role,

    /// The content.
    pub content: String,

    /// When the turn was recorded.
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// A turn with a caller-chosen ID, for idempotent appends keyed on
    /// request identity.
    pub fn with_id(id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// The conversation storage contract.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    fn name(&self) -> &str;

    /// Read a thread's history, oldest first. Unknown threads read empty.
    async fn get_thread(&self, id: &str) -> std::result::Result<Vec<Turn>, StorageError>;

    /// Append a turn. Idempotent on `turn.id`.
    async fn append(&self, id: &str, turn: Turn) -> std::result::Result<(), StorageError>;

    /// Number of stored threads.
    async fn thread_count(&self) -> std::result::Result<usize, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_with_id_keeps_caller_id() {
        let turn = Turn::with_id("req-1:result", Role::Assistant, "done");
        assert_eq!(turn.id, "req-1:result");
        assert_eq!(turn.role, Role::Assistant);
    }

    #[test]
    fn turn_new_generates_id() {
        let turn = Turn::new(Role::User, "hello");
        assert!(!turn.id.is_empty());
    }
}
