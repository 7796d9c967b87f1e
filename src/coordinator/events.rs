//! Observer contract between the coordinator and the presentation layer.

use serde::Serialize;

use crate::chat::ids::{ConversationId, ModelId, RequestToken};
use crate::chat::message::Conversation;

/// State change broadcast by the coordinator.
///
/// Subscribers redraw from these; the stream is lossy for slow subscribers,
/// who can always recover with a session snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    /// A request was issued and provisional messages are visible.
    ExchangeStarted {
        /// Conversation the exchange belongs to.
        conversation_id: ConversationId,
        /// Identity of the new request.
        token: RequestToken,
    },
    /// One record was applied.
    FragmentApplied {
        /// Conversation the exchange belongs to.
        conversation_id: ConversationId,
        /// Request the record belonged to.
        token: RequestToken,
        /// Whole assistant text so far.
        text: String,
    },
    /// The exchange was committed.
    ExchangeCompleted {
        /// Conversation the exchange was committed to.
        conversation_id: ConversationId,
        /// Request that completed.
        token: RequestToken,
        /// Conversation title after the commit.
        title: String,
    },
    /// The exchange was aborted and discarded.
    ExchangeCanceled {
        /// Request that was aborted.
        token: RequestToken,
    },
    /// The exchange failed; partial text stays visible.
    ExchangeFailed {
        /// Request that failed.
        token: RequestToken,
        /// Message shown to the user.
        notice: String,
    },
    /// An empty conversation was committed and made current.
    ConversationCreated {
        /// The new conversation.
        conversation_id: ConversationId,
    },
    /// A stored conversation became current.
    ConversationSwitched {
        /// The conversation now shown.
        conversation_id: ConversationId,
        /// Model restored from it.
        model_id: ModelId,
    },
    /// A conversation was removed from the store.
    ConversationDeleted {
        /// The removed conversation.
        conversation_id: ConversationId,
    },
    /// The model for the next submission changed.
    ModelSelected {
        /// Newly selected model.
        model_id: ModelId,
    },
    /// Non-fatal condition unrelated to a running exchange.
    Notice {
        /// Message shown to the user.
        message: String,
    },
}

/// How one `submit` call ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// Empty prompt; nothing happened.
    Rejected,
    /// The exchange was committed; carries the updated conversation.
    Completed(Conversation),
    /// Superseded or explicitly canceled. Not an error.
    Canceled,
    /// The request failed; the notice was also broadcast.
    Failed {
        /// Message shown to the user.
        notice: String,
    },
}
