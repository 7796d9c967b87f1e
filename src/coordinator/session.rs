//! Per-client session context.
//!
//! Holds what the browser would otherwise keep in ambient globals: the
//! current conversation, the selected model, the visible transcript and the
//! single in-flight exchange. The coordinator owns one of these behind a
//! mutex; every mutation goes through the methods below so the token rule is
//! enforced in one place.

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::chat::ids::{ConversationId, ModelId, RequestToken};
use crate::chat::message::{Message, Role};

/// Lifecycle of the session's exchange slot.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeState {
    /// No request in flight.
    #[default]
    Idle,
    /// A response is being streamed.
    Streaming,
}

/// The one request currently streaming. Never persisted.
#[derive(Debug)]
pub struct ExchangeInProgress {
    /// Conversation the exchange will be committed to.
    pub conversation_id: ConversationId,
    /// Prompt as submitted.
    pub user_message: Message,
    /// Assistant text accumulated so far.
    pub partial_text: String,
    /// Identity of this request.
    pub token: RequestToken,
    cancel: CancellationToken,
}

impl ExchangeInProgress {
    /// Signal the driving task to drop the response body.
    ///
    /// Safe to call any number of times.
    pub fn abort(&self) {
        self.cancel.cancel();
    }
}

/// Serializable view of a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Conversation shown in the transcript, if any.
    pub current_conversation: Option<ConversationId>,
    /// Model the next submission will use.
    pub selected_model: ModelId,
    /// Whether a response is streaming.
    pub state: ExchangeState,
    /// Token of the streaming request.
    pub active_token: Option<RequestToken>,
    /// Visible transcript, including provisional messages.
    pub messages: Vec<Message>,
    /// Last non-fatal failure shown to the user.
    pub notice: Option<String>,
}

/// Mutable session state.
#[derive(Debug)]
pub struct SessionContext {
    current: Option<ConversationId>,
    selected_model: ModelId,
    visible: Vec<Message>,
    active: Option<ExchangeInProgress>,
    notice: Option<String>,
}

impl SessionContext {
    /// Fresh session with nothing selected.
    #[must_use]
    pub const fn new(selected_model: ModelId) -> Self {
        Self {
            current: None,
            selected_model,
            visible: Vec::new(),
            active: None,
            notice: None,
        }
    }

    /// Conversation shown in the transcript, if any.
    #[must_use]
    pub const fn current(&self) -> Option<ConversationId> {
        self.current
    }

    /// Model the next submission will use.
    #[must_use]
    pub const fn selected_model(&self) -> &ModelId {
        &self.selected_model
    }

    /// Change the model for the next submission.
    pub fn select_model(&mut self, model: ModelId) {
        self.selected_model = model;
    }

    /// Streaming while an exchange holds the slot.
    #[must_use]
    pub const fn state(&self) -> ExchangeState {
        if self.active.is_some() {
            ExchangeState::Streaming
        } else {
            ExchangeState::Idle
        }
    }

    /// Whether `token` identifies the exchange currently in flight.
    #[must_use]
    pub fn is_active(&self, token: RequestToken) -> bool {
        self.active.as_ref().is_some_and(|e| e.token == token)
    }

    /// Make `id` current and show `messages` as its transcript.
    pub fn show_conversation(&mut self, id: ConversationId, messages: Vec<Message>) {
        self.current = Some(id);
        self.visible = messages;
        self.notice = None;
    }

    /// Forget the current conversation and clear the transcript.
    pub fn clear_conversation(&mut self) {
        self.current = None;
        self.visible.clear();
    }

    /// Record a failure to show the user.
    pub fn set_notice(&mut self, notice: impl Into<String>) {
        self.notice = Some(notice.into());
    }

    /// Abort and drop the in-flight exchange, if any.
    ///
    /// Returns the token of the aborted exchange. A second call returns
    /// `None`, so aborting is idempotent.
    pub fn abort_active(&mut self) -> Option<RequestToken> {
        let exchange = self.active.take()?;
        exchange.abort();
        Some(exchange.token)
    }

    /// Start a new exchange on `conversation_id`.
    ///
    /// Appends the user message and an empty assistant placeholder to the
    /// visible transcript. Any previous exchange must have been aborted.
    pub fn begin(
        &mut self,
        conversation_id: ConversationId,
        prompt: &str,
    ) -> (RequestToken, CancellationToken) {
        debug_assert!(self.active.is_none());
        let token = RequestToken::new();
        let cancel = CancellationToken::new();
        let user_message = Message::user(prompt);

        self.current = Some(conversation_id);
        self.notice = None;
        self.visible.push(user_message.clone());
        self.visible.push(Message::assistant(String::new()));
        self.active = Some(ExchangeInProgress {
            conversation_id,
            user_message,
            partial_text: String::new(),
            token,
            cancel: cancel.clone(),
        });
        (token, cancel)
    }

    /// Apply one fragment to the exchange identified by `token`.
    ///
    /// Returns the accumulated text, or `None` when `token` is stale and the
    /// fragment was discarded.
    pub fn apply_fragment(&mut self, token: RequestToken, fragment: &str) -> Option<&str> {
        let exchange = self.active.as_mut().filter(|e| e.token == token)?;
        exchange.partial_text.push_str(fragment);

        // Replace, never append: the placeholder is always last while streaming.
        if let Some(last) = self.visible.last_mut().filter(|m| m.role == Role::Assistant) {
            last.content.clone_from(&exchange.partial_text);
        }
        Some(&exchange.partial_text)
    }

    /// Take the exchange identified by `token` out of the slot.
    ///
    /// Returns `None` when another exchange took its place or it was aborted.
    pub fn finish(&mut self, token: RequestToken) -> Option<ExchangeInProgress> {
        if self.is_active(token) {
            self.active.take()
        } else {
            None
        }
    }

    /// Copy of the state for rendering.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            current_conversation: self.current,
            selected_model: self.selected_model.clone(),
            state: self.state(),
            active_token: self.active.as_ref().map(|e| e.token),
            messages: self.visible.clone(),
            notice: self.notice.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionContext {
        SessionContext::new(ModelId::new("m1").unwrap())
    }

    #[test]
    fn test_begin_adds_user_message_and_placeholder() {
        let mut session = session();
        let conversation = ConversationId::new();
        session.begin(conversation, "Hello");

        assert_eq!(session.state(), ExchangeState::Streaming);
        assert_eq!(session.current(), Some(conversation));
        assert_eq!(
            session.snapshot().messages,
            vec![Message::user("Hello"), Message::assistant("")]
        );
    }

    #[test]
    fn test_fragments_replace_last_message() {
        let mut session = session();
        let (token, _) = session.begin(ConversationId::new(), "Hello");
        for fragment in ["Hi", " there", "!"] {
            session.apply_fragment(token, fragment);
        }

        let messages = session.snapshot().messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "Hi there!");
    }

    #[test]
    fn test_stale_token_is_discarded() {
        let mut session = session();
        let conversation = ConversationId::new();
        let (old, old_cancel) = session.begin(conversation, "first");
        session.abort_active();
        let (new, _) = session.begin(conversation, "second");

        assert!(old_cancel.is_cancelled());
        assert!(session.apply_fragment(old, "late").is_none());
        assert_eq!(session.apply_fragment(new, "ok"), Some("ok"));
        assert!(session.finish(old).is_none());
        assert_eq!(session.snapshot().messages.last().unwrap().content, "ok");
    }

    #[test]
    fn test_abort_is_idempotent() {
        let mut session = session();
        let (token, cancel) = session.begin(ConversationId::new(), "Hello");

        assert_eq!(session.abort_active(), Some(token));
        assert_eq!(session.abort_active(), None);
        assert!(cancel.is_cancelled());
        assert_eq!(session.state(), ExchangeState::Idle);
    }

    #[test]
    fn test_finish_keeps_visible_text() {
        let mut session = session();
        let (token, _) = session.begin(ConversationId::new(), "Hello");
        session.apply_fragment(token, "partial");

        let exchange = session.finish(token).unwrap();
        assert_eq!(exchange.partial_text, "partial");
        assert_eq!(session.snapshot().messages[1].content, "partial");
        assert_eq!(session.snapshot().active_token, None);
    }
}
