//! Messages and conversations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::chat::ids::{ConversationId, ModelId};

/// Title given to a conversation before its first exchange completes.
pub const PLACEHOLDER_TITLE: &str = "New conversation";

/// Author of a message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// User input.
    User,
    /// Model output.
    Assistant,
}

impl Role {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One message of a transcript.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Author of the message.
    pub role: Role,
    /// Text content.
    pub content: String,
}

impl Message {
    /// Build a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Build an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A stored conversation.
///
/// Serialized with camel-cased keys so the stored collection keeps the same
/// shape as the browser front end expects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Unique identifier.
    pub id: ConversationId,
    /// Display title.
    pub title: String,
    /// Completed messages, in order.
    pub messages: Vec<Message>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Model the conversation was last used with.
    pub model_id: ModelId,
}

impl Conversation {
    /// Create an empty conversation with the placeholder title.
    #[must_use]
    pub fn new(model_id: ModelId) -> Self {
        Self {
            id: ConversationId::new(),
            title: PLACEHOLDER_TITLE.to_string(),
            messages: Vec::new(),
            created_at: Utc::now(),
            model_id,
        }
    }

    /// Append one completed exchange.
    ///
    /// The title is derived from the prompt only when the history was empty
    /// before this exchange; it is never touched afterwards.
    pub fn append_exchange(&mut self, user: Message, assistant: Message, title_max_chars: usize) {
        if self.messages.is_empty() {
            self.title = derive_title(&user.content, title_max_chars);
        }
        self.messages.push(user);
        self.messages.push(assistant);
    }

    /// Sidebar view of this conversation.
    #[must_use]
    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id,
            title: self.title.clone(),
            created_at: self.created_at,
            model_id: self.model_id.clone(),
            message_count: self.messages.len(),
        }
    }
}

/// Metadata for a conversation displayed in the sidebar.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    /// Unique identifier.
    pub id: ConversationId,
    /// Display title.
    pub title: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Model the conversation was last used with.
    pub model_id: ModelId,
    /// Number of stored messages.
    pub message_count: usize,
}

/// Title for a conversation, built from its first prompt.
///
/// Surrounding whitespace is trimmed before counting, so leading spaces never
/// eat into the budget. Truncates on character boundaries, never inside a
/// UTF-8 sequence.
#[must_use]
pub fn derive_title(prompt: &str, max_chars: usize) -> String {
    let title: String = prompt.trim().chars().take(max_chars).collect();
    if title.is_empty() {
        PLACEHOLDER_TITLE.to_string()
    } else {
        title
    }
}
