//! Generation coordinator.
//!
//! Drives one prompt/response exchange at a time per session:
//! - a new submission aborts the one in flight (latest request wins);
//! - each decoded record is applied only while its request token is still
//!   the active one, so a read that lands after cancellation is dropped;
//! - the store is written once, when the body ends normally;
//! - cancellation is silent, other failures become a notice and leave the
//!   partial text visible.
//!
//! The session lives behind an async mutex. Network reads happen outside the
//! lock; applying a record and committing an exchange happen inside it.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chat::config::ChatConfig;
use crate::chat::errors::{ChatError, ChatResult};
use crate::chat::ids::{ConversationId, ModelId, RequestToken};
use crate::chat::message::{Conversation, ConversationSummary, Message};
use crate::coordinator::events::{CoordinatorEvent, ExchangeOutcome};
use crate::coordinator::session::{SessionContext, SessionSnapshot};
use crate::llm::ollama_client::{GenerateRequest, Generator};
use crate::storage::transcript_store::TranscriptStore;
use crate::stream::decoder::decode_stream;

/// How the read loop ended.
enum StreamEnd {
    Finished,
    Canceled,
    Failed(ChatError),
}

struct Inner {
    generator: Arc<dyn Generator>,
    store: Arc<TranscriptStore>,
    session: Mutex<SessionContext>,
    events: broadcast::Sender<CoordinatorEvent>,
    title_max_chars: usize,
}

/// Cloneable handle to one session's coordinator.
#[derive(Clone)]
pub struct GenerationCoordinator {
    inner: Arc<Inner>,
}

impl GenerationCoordinator {
    /// Build a coordinator with an empty session selecting `model`.
    #[must_use]
    pub fn new(
        generator: Arc<dyn Generator>,
        store: Arc<TranscriptStore>,
        model: ModelId,
        config: &ChatConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                generator,
                store,
                session: Mutex::new(SessionContext::new(model)),
                events,
                title_max_chars: config.title_max_chars,
            }),
        }
    }

    /// Receive every event emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.inner.events.subscribe()
    }

    /// Copy of the session state for rendering.
    pub async fn snapshot(&self) -> SessionSnapshot {
        self.inner.session.lock().await.snapshot()
    }

    /// Stored conversations, most recently updated first.
    pub async fn conversations(&self) -> Vec<ConversationSummary> {
        self.inner.store.list().await
    }

    /// Run one exchange to its end.
    ///
    /// `conversation_id` picks the target conversation; `None` means the
    /// current one, and a new conversation is created when nothing is
    /// current. Any exchange already streaming is aborted first.
    ///
    /// Never returns an error: failures are reported as
    /// [`ExchangeOutcome::Failed`] and broadcast.
    pub async fn submit(
        &self,
        conversation_id: Option<ConversationId>,
        model: ModelId,
        prompt: &str,
    ) -> ExchangeOutcome {
        if prompt.trim().is_empty() {
            debug!("Ignoring empty prompt");
            return ExchangeOutcome::Rejected;
        }

        let (token, cancel) = {
            let mut session = self.inner.session.lock().await;
            self.abort_locked(&mut session);

            let target = match self.resolve_target(&mut session, conversation_id, &model).await {
                Ok(id) => id,
                Err(err) => {
                    let notice = err.to_string();
                    warn!("Cannot start exchange: {notice}");
                    session.set_notice(notice.clone());
                    self.emit(CoordinatorEvent::Notice {
                        message: notice.clone(),
                    });
                    return ExchangeOutcome::Failed { notice };
                }
            };

            session.select_model(model.clone());
            let (token, cancel) = session.begin(target, prompt);
            info!("Exchange {token} started on {target} with {model}");
            self.emit(CoordinatorEvent::ExchangeStarted {
                conversation_id: target,
                token,
            });
            (token, cancel)
        };

        let request = GenerateRequest::streaming(model.as_str(), prompt);
        match self.drive(token, &cancel, request).await {
            StreamEnd::Finished => self.complete(token).await,
            StreamEnd::Canceled => self.discard(token).await,
            StreamEnd::Failed(err) => self.fail(token, &err).await,
        }
    }

    /// Abort the exchange in flight, if any.
    ///
    /// Returns whether something was aborted; calling it again is a no-op.
    pub async fn cancel_active(&self) -> bool {
        let mut session = self.inner.session.lock().await;
        self.abort_locked(&mut session)
    }

    /// Show a stored conversation and restore its model.
    ///
    /// # Errors
    /// Returns `ConversationNotFound` for an unknown id; the session's data
    /// is left unchanged apart from the aborted exchange.
    pub async fn switch_conversation(&self, id: ConversationId) -> ChatResult<Conversation> {
        let mut session = self.inner.session.lock().await;
        self.abort_locked(&mut session);

        let Some(conversation) = self.inner.store.get(id).await else {
            let err = ChatError::ConversationNotFound(id);
            session.set_notice(err.to_string());
            self.emit(CoordinatorEvent::Notice {
                message: err.to_string(),
            });
            return Err(err);
        };

        session.show_conversation(id, conversation.messages.clone());
        session.select_model(conversation.model_id.clone());
        debug!("Switched to conversation {id}");
        self.emit(CoordinatorEvent::ConversationSwitched {
            conversation_id: id,
            model_id: conversation.model_id.clone(),
        });
        Ok(conversation)
    }

    /// Create, commit and show an empty conversation for the selected model.
    ///
    /// # Errors
    /// Returns the commit error; nothing is created in that case.
    pub async fn new_conversation(&self) -> ChatResult<Conversation> {
        let mut session = self.inner.session.lock().await;
        self.abort_locked(&mut session);
        let conversation = self.create_locked(&mut session).await?;
        Ok(conversation)
    }

    /// Delete a stored conversation, leaving the session empty if it was
    /// the current one.
    ///
    /// # Errors
    /// Returns `ConversationNotFound` or the commit error.
    pub async fn delete_conversation(&self, id: ConversationId) -> ChatResult<()> {
        let mut session = self.inner.session.lock().await;
        self.inner.store.delete(id).await?;
        if session.current() == Some(id) {
            self.abort_locked(&mut session);
            session.clear_conversation();
        }
        self.emit(CoordinatorEvent::ConversationDeleted {
            conversation_id: id,
        });
        Ok(())
    }

    /// Model used by the next submission.
    pub async fn select_model(&self, model: ModelId) {
        let mut session = self.inner.session.lock().await;
        session.select_model(model.clone());
        self.emit(CoordinatorEvent::ModelSelected { model_id: model });
    }

    /// Model the next submission will use.
    pub async fn selected_model(&self) -> ModelId {
        self.inner.session.lock().await.selected_model().clone()
    }

    async fn resolve_target(
        &self,
        session: &mut SessionContext,
        requested: Option<ConversationId>,
        model: &ModelId,
    ) -> ChatResult<ConversationId> {
        match requested.or(session.current()) {
            Some(id) if session.current() == Some(id) => Ok(id),
            Some(id) => {
                let conversation = self
                    .inner
                    .store
                    .get(id)
                    .await
                    .ok_or(ChatError::ConversationNotFound(id))?;
                session.show_conversation(id, conversation.messages);
                Ok(id)
            }
            None => {
                session.select_model(model.clone());
                let conversation = self.create_locked(session).await?;
                Ok(conversation.id)
            }
        }
    }

    async fn create_locked(&self, session: &mut SessionContext) -> ChatResult<Conversation> {
        let conversation = self
            .inner
            .store
            .create(session.selected_model().clone())
            .await?;
        session.show_conversation(conversation.id, Vec::new());
        self.emit(CoordinatorEvent::ConversationCreated {
            conversation_id: conversation.id,
        });
        Ok(conversation)
    }

    fn abort_locked(&self, session: &mut SessionContext) -> bool {
        match session.abort_active() {
            Some(token) => {
                info!("Exchange {token} canceled");
                self.emit(CoordinatorEvent::ExchangeCanceled { token });
                true
            }
            None => false,
        }
    }

    /// Read the response to its end, racing every suspension against `cancel`.
    ///
    /// Dropping the body on cancellation closes the connection.
    async fn drive(
        &self,
        token: RequestToken,
        cancel: &CancellationToken,
        request: GenerateRequest,
    ) -> StreamEnd {
        let body = tokio::select! {
            biased;
            () = cancel.cancelled() => return StreamEnd::Canceled,
            result = self.inner.generator.generate_stream(request) => match result {
                Ok(body) => body,
                Err(err) => return StreamEnd::Failed(err),
            },
        };

        let mut records = std::pin::pin!(decode_stream(body));
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return StreamEnd::Canceled,
                next = records.next() => next,
            };

            match next {
                None => return StreamEnd::Finished,
                Some(Err(err)) => return StreamEnd::Failed(err),
                Some(Ok(record)) => {
                    if let Some(message) = &record.error {
                        return StreamEnd::Failed(ChatError::Server(message.clone()));
                    }
                    if !self.apply(token, record.fragment()).await {
                        return StreamEnd::Canceled;
                    }
                }
            }
        }
    }

    async fn apply(&self, token: RequestToken, fragment: &str) -> bool {
        let mut session = self.inner.session.lock().await;
        let Some(conversation_id) = session.current() else {
            return false;
        };
        match session.apply_fragment(token, fragment) {
            Some(text) => {
                let text = text.to_string();
                self.emit(CoordinatorEvent::FragmentApplied {
                    conversation_id,
                    token,
                    text,
                });
                true
            }
            None => {
                debug!("Discarding record for stale exchange {token}");
                false
            }
        }
    }

    async fn complete(&self, token: RequestToken) -> ExchangeOutcome {
        let mut session = self.inner.session.lock().await;
        let Some(exchange) = session.finish(token) else {
            return ExchangeOutcome::Canceled;
        };

        let result = self
            .inner
            .store
            .append_exchange(
                exchange.conversation_id,
                exchange.user_message,
                Message::assistant(exchange.partial_text),
                self.inner.title_max_chars,
            )
            .await;

        match result {
            Ok(conversation) => {
                info!("Exchange {token} committed to {}", conversation.id);
                self.emit(CoordinatorEvent::ExchangeCompleted {
                    conversation_id: conversation.id,
                    token,
                    title: conversation.title.clone(),
                });
                ExchangeOutcome::Completed(conversation)
            }
            Err(err) => {
                let notice = err.to_string();
                warn!("Exchange {token} could not be committed: {notice}");
                session.set_notice(notice.clone());
                self.emit(CoordinatorEvent::ExchangeFailed {
                    token,
                    notice: notice.clone(),
                });
                ExchangeOutcome::Failed { notice }
            }
        }
    }

    async fn discard(&self, token: RequestToken) -> ExchangeOutcome {
        let mut session = self.inner.session.lock().await;
        // Normally already taken by whoever canceled.
        if session.finish(token).is_some() {
            self.emit(CoordinatorEvent::ExchangeCanceled { token });
        }
        debug!("Exchange {token} discarded");
        ExchangeOutcome::Canceled
    }

    async fn fail(&self, token: RequestToken, err: &ChatError) -> ExchangeOutcome {
        let mut session = self.inner.session.lock().await;
        if session.finish(token).is_none() {
            // Superseded while the error was in flight.
            return ExchangeOutcome::Canceled;
        }

        let notice = err.to_string();
        if err.is_transport() {
            warn!("Exchange {token} failed: {notice}");
        } else {
            warn!("Exchange {token} failed (non-transport): {notice}");
        }
        session.set_notice(notice.clone());
        self.emit(CoordinatorEvent::ExchangeFailed {
            token,
            notice: notice.clone(),
        });
        ExchangeOutcome::Failed { notice }
    }

    fn emit(&self, event: CoordinatorEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use futures::stream;
    use tokio::sync::mpsc;

    use super::*;
    use crate::llm::ollama_client::{ByteStream, GenerateFuture};
    use crate::storage::kv_store::{KeyValueStore, SqliteKeyValueStore};

    type Body = mpsc::Receiver<ChatResult<Vec<u8>>>;

    /// Generator answering each request with the next scripted reply.
    #[derive(Default)]
    struct ScriptedGenerator {
        replies: StdMutex<VecDeque<Result<Body, u16>>>,
        requests: StdMutex<Vec<GenerateRequest>>,
    }

    impl ScriptedGenerator {
        fn reply(&self, reply: Result<Body, u16>) {
            self.replies.lock().unwrap().push_back(reply);
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    impl Generator for ScriptedGenerator {
        fn generate_stream(
            &self,
            request: GenerateRequest,
        ) -> GenerateFuture<'_, ChatResult<ByteStream>> {
            self.requests.lock().unwrap().push(request);
            let reply = self.replies.lock().unwrap().pop_front();
            Box::pin(async move {
                match reply {
                    Some(Ok(rx)) => {
                        let body = stream::unfold(rx, |mut rx| async move {
                            rx.recv().await.map(|item| (item, rx))
                        });
                        Ok(Box::pin(body) as ByteStream)
                    }
                    Some(Err(status)) => Err(ChatError::HttpStatus { status }),
                    None => Err(ChatError::Server("no scripted reply".to_string())),
                }
            })
        }
    }

    fn record(fragment: &str) -> ChatResult<Vec<u8>> {
        let line = serde_json::json!({ "model": "m1", "response": fragment, "done": false });
        Ok(format!("{line}\n").into_bytes())
    }

    /// Body with every read already queued and the sender dropped.
    async fn finished_body(reads: Vec<ChatResult<Vec<u8>>>) -> Body {
        let (tx, rx) = mpsc::channel(reads.len().max(1));
        for read in reads {
            tx.send(read).await.unwrap();
        }
        rx
    }

    fn model(name: &str) -> ModelId {
        ModelId::new(name).unwrap()
    }

    async fn setup() -> (
        GenerationCoordinator,
        Arc<ScriptedGenerator>,
        Arc<TranscriptStore>,
    ) {
        let kv: Arc<dyn KeyValueStore> =
            Arc::new(SqliteKeyValueStore::open_in_memory().await.unwrap());
        let store = Arc::new(TranscriptStore::load(kv).await.unwrap());
        let generator = Arc::new(ScriptedGenerator::default());
        let coordinator = GenerationCoordinator::new(
            Arc::clone(&generator) as Arc<dyn Generator>,
            Arc::clone(&store),
            model("m1"),
            &ChatConfig::default(),
        );
        (coordinator, generator, store)
    }

    async fn wait_for_fragment(events: &mut broadcast::Receiver<CoordinatorEvent>) -> String {
        loop {
            if let CoordinatorEvent::FragmentApplied { text, .. } = events.recv().await.unwrap() {
                return text;
            }
        }
    }

    #[tokio::test]
    async fn test_hello_exchange_is_committed() {
        let (coordinator, generator, store) = setup().await;
        generator.reply(Ok(finished_body(vec![
            record("Hi"),
            record(" there"),
            record("!"),
        ])
        .await));

        let outcome = coordinator.submit(None, model("m1"), "Hello").await;

        let ExchangeOutcome::Completed(conversation) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(conversation.title, "Hello");
        assert_eq!(
            conversation.messages,
            vec![Message::user("Hello"), Message::assistant("Hi there!")]
        );

        let stored = store.get(conversation.id).await.unwrap();
        assert_eq!(stored.messages.len(), 2);

        let snapshot = coordinator.snapshot().await;
        assert_eq!(snapshot.messages, conversation.messages);
        assert_eq!(snapshot.active_token, None);

        let requests = generator.requests.lock().unwrap().clone();
        assert_eq!(requests, vec![GenerateRequest::streaming("m1", "Hello")]);
    }

    #[tokio::test]
    async fn test_empty_prompt_is_rejected() {
        let (coordinator, generator, _) = setup().await;

        let outcome = coordinator.submit(None, model("m1"), "   \n").await;

        assert_eq!(outcome, ExchangeOutcome::Rejected);
        assert_eq!(generator.request_count(), 0);
        assert!(coordinator.conversations().await.is_empty());
    }

    #[tokio::test]
    async fn test_new_submission_supersedes_streaming_one() {
        let (coordinator, generator, _) = setup().await;
        let (first_tx, first_rx) = mpsc::channel(8);
        generator.reply(Ok(first_rx));
        generator.reply(Ok(finished_body(vec![record("second answer")]).await));
        let mut events = coordinator.subscribe();

        let first = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.submit(None, model("m1"), "first").await }
        });
        first_tx.send(record("partial")).await.unwrap();
        assert_eq!(wait_for_fragment(&mut events).await, "partial");

        let second = coordinator.submit(None, model("m1"), "second").await;
        // Arrives after supersession; must never be applied.
        let _ = first_tx.send(record(" late")).await;

        assert_eq!(first.await.unwrap(), ExchangeOutcome::Canceled);
        let ExchangeOutcome::Completed(conversation) = second else {
            panic!("expected completion, got {second:?}");
        };
        assert_eq!(
            conversation.messages,
            vec![Message::user("second"), Message::assistant("second answer")]
        );
        assert_eq!(conversation.title, "second");
        assert_eq!(coordinator.conversations().await.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_never_touches_store() {
        let (coordinator, generator, _) = setup().await;
        let (tx, rx) = mpsc::channel(8);
        generator.reply(Ok(rx));
        let mut events = coordinator.subscribe();

        let running = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.submit(None, model("m1"), "Hello").await }
        });
        tx.send(record("Hi")).await.unwrap();
        wait_for_fragment(&mut events).await;

        assert!(coordinator.cancel_active().await);
        assert!(!coordinator.cancel_active().await);
        assert_eq!(running.await.unwrap(), ExchangeOutcome::Canceled);

        let summaries = coordinator.conversations().await;
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].message_count, 0);
        assert_eq!(coordinator.snapshot().await.notice, None);
    }

    #[tokio::test]
    async fn test_error_status_leaves_empty_placeholder() {
        let (coordinator, generator, _) = setup().await;
        generator.reply(Err(404));

        let outcome = coordinator.submit(None, model("m1"), "Hello").await;

        let ExchangeOutcome::Failed { notice } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(notice.contains("404"));

        let snapshot = coordinator.snapshot().await;
        assert_eq!(
            snapshot.messages,
            vec![Message::user("Hello"), Message::assistant("")]
        );
        assert_eq!(snapshot.notice.as_deref(), Some(notice.as_str()));
        assert_eq!(coordinator.conversations().await[0].message_count, 0);
    }

    #[tokio::test]
    async fn test_dropped_connection_keeps_partial_text_visible() {
        let (coordinator, generator, _) = setup().await;
        generator.reply(Ok(finished_body(vec![
            record("Hi"),
            Err(ChatError::Server("connection reset".to_string())),
        ])
        .await));

        let outcome = coordinator.submit(None, model("m1"), "Hello").await;

        assert!(matches!(outcome, ExchangeOutcome::Failed { .. }));
        let snapshot = coordinator.snapshot().await;
        assert_eq!(snapshot.messages[1].content, "Hi");
        assert_eq!(coordinator.conversations().await[0].message_count, 0);

        // The conversation stays usable.
        generator.reply(Ok(finished_body(vec![record("again")]).await));
        let retry = coordinator.submit(None, model("m1"), "Hello?").await;
        assert!(matches!(retry, ExchangeOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_malformed_line_is_skipped() {
        let (coordinator, generator, _) = setup().await;
        generator.reply(Ok(finished_body(vec![
            record("a"),
            Ok(b"not json at all\n".to_vec()),
            record("b"),
        ])
        .await));

        let outcome = coordinator.submit(None, model("m1"), "x").await;

        let ExchangeOutcome::Completed(conversation) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(conversation.messages[1].content, "ab");
    }

    #[tokio::test]
    async fn test_server_error_record_is_a_failure() {
        let (coordinator, generator, _) = setup().await;
        generator.reply(Ok(finished_body(vec![Ok(
            b"{\"error\":\"model not found\"}\n".to_vec()
        )])
        .await));

        let outcome = coordinator.submit(None, model("m1"), "Hello").await;

        let ExchangeOutcome::Failed { notice } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(notice.contains("model not found"));
    }

    #[tokio::test]
    async fn test_title_is_set_only_once() {
        let (coordinator, generator, _) = setup().await;
        generator.reply(Ok(finished_body(vec![record("1")]).await));
        generator.reply(Ok(finished_body(vec![record("2")]).await));

        coordinator.submit(None, model("m1"), "First question").await;
        let outcome = coordinator.submit(None, model("m1"), "Second question").await;

        let ExchangeOutcome::Completed(conversation) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(conversation.title, "First question");
        assert_eq!(conversation.messages.len(), 4);
    }

    #[tokio::test]
    async fn test_switch_restores_model_and_history() {
        let (coordinator, generator, _) = setup().await;
        generator.reply(Ok(finished_body(vec![record("Hi there!")]).await));
        let ExchangeOutcome::Completed(first) = coordinator.submit(None, model("m1"), "Hello").await
        else {
            panic!("expected completion");
        };

        coordinator.select_model(model("m2")).await;
        let second = coordinator.new_conversation().await.unwrap();
        assert_eq!(second.model_id, model("m2"));
        assert!(coordinator.snapshot().await.messages.is_empty());

        coordinator.switch_conversation(first.id).await.unwrap();
        let snapshot = coordinator.snapshot().await;
        assert_eq!(snapshot.current_conversation, Some(first.id));
        assert_eq!(snapshot.selected_model, model("m1"));
        assert_eq!(snapshot.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_switch_to_unknown_conversation_changes_nothing() {
        let (coordinator, _, _) = setup().await;
        let existing = coordinator.new_conversation().await.unwrap();

        let missing = ConversationId::new();
        let result = coordinator.switch_conversation(missing).await;

        assert!(matches!(result, Err(ChatError::ConversationNotFound(id)) if id == missing));
        let snapshot = coordinator.snapshot().await;
        assert_eq!(snapshot.current_conversation, Some(existing.id));
        assert!(snapshot.notice.is_some());
    }

    #[tokio::test]
    async fn test_switch_mid_stream_cancels_exchange() {
        let (coordinator, generator, _) = setup().await;
        let other = coordinator.new_conversation().await.unwrap();
        coordinator.new_conversation().await.unwrap();
        let (tx, rx) = mpsc::channel(8);
        generator.reply(Ok(rx));
        let mut events = coordinator.subscribe();

        let running = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.submit(None, model("m1"), "Hello").await }
        });
        tx.send(record("Hi")).await.unwrap();
        wait_for_fragment(&mut events).await;

        coordinator.switch_conversation(other.id).await.unwrap();

        assert_eq!(running.await.unwrap(), ExchangeOutcome::Canceled);
        assert!(coordinator
            .conversations()
            .await
            .iter()
            .all(|c| c.message_count == 0));
    }

    #[tokio::test]
    async fn test_deleting_current_conversation_clears_session() {
        let (coordinator, _, _) = setup().await;
        let conversation = coordinator.new_conversation().await.unwrap();

        coordinator.delete_conversation(conversation.id).await.unwrap();

        let snapshot = coordinator.snapshot().await;
        assert_eq!(snapshot.current_conversation, None);
        assert!(coordinator.conversations().await.is_empty());
    }
}
