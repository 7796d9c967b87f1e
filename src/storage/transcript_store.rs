//! Durable collection of conversations.
//!
//! The whole collection lives under one key and is rewritten in full on
//! every change. Each mutation is staged on a copy and only swapped in once
//! the write succeeded, so a failed commit leaves memory and disk agreeing.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::chat::errors::{ChatError, ChatResult};
use crate::chat::ids::{ConversationId, ModelId};
use crate::chat::message::{Conversation, ConversationSummary, Message};
use crate::storage::kv_store::KeyValueStore;

/// Storage key of the serialized conversation collection.
pub const CHATS_KEY: &str = "chats";

/// Conversation store, newest conversation first.
pub struct TranscriptStore {
    kv: Arc<dyn KeyValueStore>,
    conversations: RwLock<Vec<Conversation>>,
}

impl TranscriptStore {
    /// Load the stored collection; a missing key yields an empty store.
    ///
    /// # Errors
    /// Returns an error if storage access fails or the stored value is not a
    /// valid collection.
    pub async fn load(kv: Arc<dyn KeyValueStore>) -> ChatResult<Self> {
        let conversations = match kv.get(CHATS_KEY).await? {
            Some(raw) => serde_json::from_str::<Vec<Conversation>>(&raw)?,
            None => Vec::new(),
        };
        info!("Loaded {} conversations", conversations.len());
        Ok(Self {
            kv,
            conversations: RwLock::new(conversations),
        })
    }

    /// Sidebar listing, newest first.
    pub async fn list(&self) -> Vec<ConversationSummary> {
        self.conversations
            .read()
            .await
            .iter()
            .map(Conversation::summary)
            .collect()
    }

    /// Full copy of one conversation.
    pub async fn get(&self, id: ConversationId) -> Option<Conversation> {
        self.conversations
            .read()
            .await
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    /// Create an empty conversation, prepend it and commit.
    ///
    /// # Errors
    /// Returns an error if the commit fails; nothing is created in that case.
    pub async fn create(&self, model_id: ModelId) -> ChatResult<Conversation> {
        let conversation = Conversation::new(model_id);
        let mut guard = self.conversations.write().await;

        let mut staged = Vec::with_capacity(guard.len() + 1);
        staged.push(conversation.clone());
        staged.extend(guard.iter().cloned());

        self.commit(&staged).await?;
        *guard = staged;
        debug!("Created conversation {}", conversation.id);
        Ok(conversation)
    }

    /// Append one completed exchange to a conversation and commit.
    ///
    /// # Errors
    /// Returns `ConversationNotFound` for an unknown id, or the commit error.
    pub async fn append_exchange(
        &self,
        id: ConversationId,
        user: Message,
        assistant: Message,
        title_max_chars: usize,
    ) -> ChatResult<Conversation> {
        let mut guard = self.conversations.write().await;
        let index = guard
            .iter()
            .position(|c| c.id == id)
            .ok_or(ChatError::ConversationNotFound(id))?;

        let mut staged = guard.clone();
        staged[index].append_exchange(user, assistant, title_max_chars);
        let updated = staged[index].clone();

        self.commit(&staged).await?;
        *guard = staged;
        debug!(
            "Committed exchange to {id} ({} messages)",
            updated.messages.len()
        );
        Ok(updated)
    }

    /// Remove a conversation and commit.
    ///
    /// # Errors
    /// Returns `ConversationNotFound` for an unknown id, or the commit error.
    pub async fn delete(&self, id: ConversationId) -> ChatResult<()> {
        let mut guard = self.conversations.write().await;
        if !guard.iter().any(|c| c.id == id) {
            return Err(ChatError::ConversationNotFound(id));
        }

        let staged: Vec<Conversation> = guard.iter().filter(|c| c.id != id).cloned().collect();
        self.commit(&staged).await?;
        *guard = staged;
        info!("Deleted conversation {id}");
        Ok(())
    }

    async fn commit(&self, conversations: &[Conversation]) -> ChatResult<()> {
        let raw = serde_json::to_string(conversations)?;
        self.kv.set(CHATS_KEY, raw).await
    }
}
