use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::error::{StoreError, StoreResult};
use crate::models::{ConversationId, NewConversation, NewMessage, StoredConversation};

/// Storage collaborator for reconstructed conversations.
///
/// Each call is atomic on its own; nothing spans calls. Implementations are
/// passed in explicitly so the pipeline never reaches for a global client.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Subset of `ids` that already exist
    async fn existing_conversation_ids(&self, ids: &[ConversationId]) -> StoreResult<HashSet<ConversationId>>;

    /// Insert conversations, skipping ids that already exist. Returns rows inserted.
    async fn insert_conversations(&self, rows: &[NewConversation]) -> StoreResult<usize>;

    /// Insert messages, all or nothing. Returns rows inserted.
    async fn insert_messages(&self, rows: &[NewMessage]) -> StoreResult<usize>;

    /// Replace the title of an existing conversation
    async fn update_conversation_title(&self, id: ConversationId, title: &str) -> StoreResult<()>;
}

#[derive(Debug, Default)]
struct MemoryState {
    conversations: BTreeMap<ConversationId, StoredConversation>,
    messages: Vec<NewMessage>,
}

/// In-memory store with the same contract as the SQLite one
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| StoreError::Task(format!("memory store lock poisoned: {e}")))
    }

    /// All stored conversations ordered by id
    pub fn conversations(&self) -> StoreResult<Vec<StoredConversation>> {
        Ok(self.lock()?.conversations.values().cloned().collect())
    }

    /// All stored messages in insertion order
    pub fn messages(&self) -> StoreResult<Vec<NewMessage>> {
        Ok(self.lock()?.messages.clone())
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn existing_conversation_ids(&self, ids: &[ConversationId]) -> StoreResult<HashSet<ConversationId>> {
        let state = self.lock()?;
        Ok(ids.iter().filter(|id| state.conversations.contains_key(id)).copied().collect())
    }

    async fn insert_conversations(&self, rows: &[NewConversation]) -> StoreResult<usize> {
        let mut state = self.lock()?;
        let mut inserted = 0;
        for row in rows {
            if state.conversations.contains_key(&row.id) {
                continue;
            }
            state.conversations.insert(
                row.id,
                StoredConversation {
                    id: row.id,
                    title: row.title.clone(),
                    user_id: row.user_id,
                    created_at: row.created_at.clone(),
                },
            );
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn insert_messages(&self, rows: &[NewMessage]) -> StoreResult<usize> {
        let mut state = self.lock()?;
        if let Some(orphan) = rows.iter().find(|m| !state.conversations.contains_key(&m.conversation_id)) {
            return Err(StoreError::Rejected(format!(
                "FOREIGN KEY constraint failed: conversation {} does not exist",
                orphan.conversation_id
            )));
        }
        state.messages.extend_from_slice(rows);
        Ok(rows.len())
    }

    async fn update_conversation_title(&self, id: ConversationId, title: &str) -> StoreResult<()> {
        let mut state = self.lock()?;
        let conversation = state
            .conversations
            .get_mut(&id)
            .ok_or_else(|| StoreError::Rejected(format!("conversation {id} does not exist")))?;
        conversation.title = title.to_string();
        Ok(())
    }
}
