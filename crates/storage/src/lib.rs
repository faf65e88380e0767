//! Conversation storage backends.
//!
//! The in-memory store is the default: bounded, idempotent, and ephemeral.
//! Anything needing durability implements the same trait elsewhere.

mod in_memory;

pub use in_memory::MemoryConversationStore;
