//! Core chat types and identifiers.

pub mod config;
pub mod errors;
pub mod ids;
pub mod message;

pub use config::ChatConfig;
pub use errors::{ChatError, ChatResult};
pub use ids::{ConversationId, ModelId, ModelIdError, RequestToken};
pub use message::{
    Conversation, ConversationSummary, Message, PLACEHOLDER_TITLE, Role, derive_title,
};
