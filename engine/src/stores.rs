//! In-memory implementations of the boundary traits.
//!
//! The production stores live in external services; these doubles back the
//! default wiring and the integration tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use sb_core::error::{StoreError, ToolError};
use sb_core::traits::{HistoryStore, MemoryHooks, ProfileStore, ThoughtTranslator, ToolRegistry};
use sb_core::types::{Message, Profile};

#[derive(Default)]
struct SessionRecord {
    user_id: String,
    messages: Vec<Message>,
}

/// History kept in a process-local map.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn load_history(
        &self,
        user_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Option<Vec<Message>>, StoreError> {
        let sessions = self.sessions.read().await;
        let Some(record) = sessions.get(session_id) else {
            return Ok(None);
        };
        if record.user_id != user_id {
            return Ok(None);
        }
        let start = record.messages.len().saturating_sub(limit);
        Ok(Some(record.messages[start..].to_vec()))
    }

    async fn append(
        &self,
        user_id: &str,
        session_id: &str,
        messages: &[Message],
    ) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        let record = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionRecord {
                user_id: user_id.to_string(),
                messages: Vec::new(),
            });
        record.messages.extend_from_slice(messages);
        Ok(())
    }

    async fn replace(
        &self,
        user_id: &str,
        session_id: &str,
        messages: Vec<Message>,
    ) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            session_id.to_string(),
            SessionRecord {
                user_id: user_id.to_string(),
                messages,
            },
        );
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryProfileStore {
    profiles: RwLock<HashMap<String, Profile>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user_id: &str, profile: Profile) {
        self.profiles
            .write()
            .await
            .insert(user_id.to_string(), profile);
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, StoreError> {
        Ok(self.profiles.read().await.get(user_id).cloned())
    }
}

/// Registry answering from canned per-tool responses.
#[derive(Default)]
pub struct StaticToolRegistry {
    responses: HashMap<String, serde_json::Value>,
}

impl StaticToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, name: &str, response: serde_json::Value) -> Self {
        self.responses.insert(name.to_string(), response);
        self
    }
}

#[async_trait]
impl ToolRegistry for StaticToolRegistry {
    async fn call(
        &self,
        name: &str,
        _args: &serde_json::Value,
        _user_id: &str,
    ) -> Result<serde_json::Value, ToolError> {
        self.responses
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))
    }
}

/// Hooks that keep nothing. The real extraction pipeline is a separate
/// service.
pub struct NoopMemoryHooks;

#[async_trait]
impl MemoryHooks for NoopMemoryHooks {
    async fn extract_facts(&self, _user_id: &str, _pruned: &[Message]) -> Result<(), StoreError> {
        Ok(())
    }

    async fn summarize(&self, pruned: &[Message]) -> Result<String, StoreError> {
        Ok(format!("({} ადრინდელი შეტყობინება)", pruned.len()))
    }
}

/// Passes thoughts through unchanged.
pub struct IdentityTranslator;

#[async_trait]
impl ThoughtTranslator for IdentityTranslator {
    async fn translate(&self, thought: &str) -> Option<String> {
        Some(thought.to_string())
    }
}

/// Convenience bundle for wiring the engine with all in-memory doubles.
pub struct InMemoryBundle {
    pub history: Arc<InMemoryHistoryStore>,
    pub profiles: Arc<InMemoryProfileStore>,
}

impl InMemoryBundle {
    pub fn new() -> Self {
        Self {
            history: Arc::new(InMemoryHistoryStore::new()),
            profiles: Arc::new(InMemoryProfileStore::new()),
        }
    }
}

impl Default for InMemoryBundle {
    fn default() -> Self {
        Self::new()
    }
}
