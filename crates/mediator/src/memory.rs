//! In-memory conversation store

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use sentinel_core::{Conflict, ConversationSnapshot, ConversationStore, Result};

#[derive(Default)]
struct Inner {
    conversations: HashMap<Uuid, ConversationSnapshot>,
    conflicts: HashMap<Uuid, Conflict>,
}

/// Lock-guarded in-memory implementation of [`ConversationStore`].
#[derive(Default)]
pub struct InMemoryConversationStore {
    inner: RwLock<Inner>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded conflict rows for one conversation.
    pub fn conflicts_for(&self, conversation_id: Uuid) -> Vec<Conflict> {
        self.inner
            .read()
            .conflicts
            .values()
            .filter(|c| c.conversation_id == conversation_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn save(&self, snapshot: &ConversationSnapshot) -> Result<()> {
        self.inner
            .write()
            .conversations
            .insert(snapshot.conversation_id, snapshot.clone());
        Ok(())
    }

    async fn load(&self, conversation_id: Uuid) -> Result<Option<ConversationSnapshot>> {
        Ok(self.inner.read().conversations.get(&conversation_id).cloned())
    }

    async fn record_conflict(&self, conflict: &Conflict) -> Result<()> {
        self.inner
            .write()
            .conflicts
            .insert(conflict.conflict_id, conflict.clone());
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<Uuid>> {
        Ok(self
            .inner
            .read()
            .conversations
            .values()
            .filter(|c| !c.state.is_terminal())
            .map(|c| c.conversation_id)
            .collect())
    }
}
