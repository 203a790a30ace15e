//! Boundary traits for the external collaborators.
//!
//! The core drives these interfaces but does not implement the production
//! versions; persistence, catalog search and memory compaction live in
//! separate services.

use async_trait::async_trait;

use crate::error::{StoreError, ToolError};
use crate::types::{Message, Profile};

/// Persistent conversation history, keyed by session.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Loads the most recent `limit` messages of a session, newest last.
    /// Returns `None` when the session does not exist or belongs to a
    /// different user.
    async fn load_history(
        &self,
        user_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Option<Vec<Message>>, StoreError>;

    /// Appends messages to a session, creating it on first write.
    async fn append(
        &self,
        user_id: &str,
        session_id: &str,
        messages: &[Message],
    ) -> Result<(), StoreError>;

    /// Replaces the stored history wholesale. Used after compaction.
    async fn replace(
        &self,
        user_id: &str,
        session_id: &str,
        messages: Vec<Message>,
    ) -> Result<(), StoreError>;
}

/// User profile storage.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, StoreError>;
}

/// Registry of callable tools.
///
/// Contract relied on by the core: the result is JSON-serializable, and an
/// identical `(name, args)` pair yields an identical result within one
/// request, which is what makes deduplication sound. The user id is passed
/// explicitly; implementations must not reach for ambient request context,
/// because tool execution may hop across worker threads.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    async fn call(
        &self,
        name: &str,
        args: &serde_json::Value,
        user_id: &str,
    ) -> Result<serde_json::Value, ToolError>;
}

/// Hooks invoked when history is pruned, so facts survive compaction.
#[async_trait]
pub trait MemoryHooks: Send + Sync {
    /// Extracts durable facts from messages about to be pruned. Called
    /// before the prune so nothing is lost.
    async fn extract_facts(&self, user_id: &str, pruned: &[Message]) -> Result<(), StoreError>;

    /// Summarizes pruned messages into a single context paragraph.
    async fn summarize(&self, pruned: &[Message]) -> Result<String, StoreError>;
}

/// Localizes internal model thoughts into user-facing status lines.
#[async_trait]
pub trait ThoughtTranslator: Send + Sync {
    /// Returns a status line for the thought, or `None` to drop it.
    async fn translate(&self, thought: &str) -> Option<String>;
}
