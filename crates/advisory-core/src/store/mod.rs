//! Conversation state storage.
//!
//! The orchestrator keeps a small [`ConversationState`] per conversation
//! id between turns. The [`StateStore`] trait makes that storage explicit
//! so the in-process map can be swapped for a shared backend.
//!
//! # Consistency
//!
//! Updates are read-modify-write without cross-request locking. Two
//! concurrent turns on the same conversation race, and the last `put`
//! wins. This is acceptable because the stage is derived from the turn
//! count on every call: a lost update delays stage advancement by at most
//! one turn and never touches persisted message content.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::ConversationState;

/// Keyed storage for per-conversation orchestration state.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get`](StateStore::get) | Read the state for a conversation |
/// | [`put`](StateStore::put) | Replace the state (last writer wins) |
/// | [`delete`](StateStore::delete) | Forget one conversation |
/// | [`clear`](StateStore::clear) | Forget every conversation |
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, conversation_id: &str) -> Result<Option<ConversationState>>;

    async fn put(&self, conversation_id: &str, state: ConversationState) -> Result<()>;

    /// Returns true if a state was removed.
    async fn delete(&self, conversation_id: &str) -> Result<bool>;

    async fn clear(&self) -> Result<()>;

    async fn len(&self) -> Result<usize>;
}
