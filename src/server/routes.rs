//! HTTP route handlers for the browser front end.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tower_http::services::ServeDir;
use tracing::{debug, error, warn};

use crate::chat::errors::ChatError;
use crate::chat::ids::{ConversationId, ModelId};
use crate::chat::message::{Conversation, ConversationSummary};
use crate::coordinator::{CoordinatorEvent, ExchangeOutcome, SessionSnapshot};
use crate::llm::{ModelDescriptor, ModelDetails};
use crate::storage::Theme;

use super::state::AppState;

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let assets = ServeDir::new(&state.config.static_dir);
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/conversations",
            get(list_conversations).post(new_conversation),
        )
        .route("/api/conversations/{id}", delete(delete_conversation))
        .route("/api/conversations/{id}/select", post(select_conversation))
        .route("/api/session", get(session_snapshot))
        .route("/api/session/submit", post(submit))
        .route("/api/session/cancel", post(cancel))
        .route("/api/events", get(events))
        .route("/api/models", get(list_models).delete(delete_model))
        .route("/api/models/refresh", post(refresh_models))
        .route("/api/models/select", post(select_model))
        .route("/api/models/show", post(show_model))
        .route("/api/models/pull", post(pull_model))
        .route("/api/theme", get(get_theme).put(set_theme))
        .route("/api/theme/toggle", post(toggle_theme))
        .fallback_service(assets)
        .with_state(state)
}

fn error_response(err: &ChatError) -> (StatusCode, String) {
    let status = match err {
        ChatError::ConversationNotFound(_) => StatusCode::NOT_FOUND,
        ChatError::InvalidModel(_) | ChatError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        e if e.is_transport() => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("Request failed: {err}");
    }
    (status, err.to_string())
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "ollama-chat",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn list_conversations(State(state): State<Arc<AppState>>) -> Json<Vec<ConversationSummary>> {
    Json(state.coordinator.conversations().await)
}

async fn new_conversation(State(state): State<Arc<AppState>>) -> ApiResult<Conversation> {
    state
        .coordinator
        .new_conversation()
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}

async fn select_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ConversationId>,
) -> ApiResult<Conversation> {
    state
        .coordinator
        .switch_conversation(id)
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}

async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ConversationId>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .coordinator
        .delete_conversation(id)
        .await
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(|e| error_response(&e))
}

async fn session_snapshot(State(state): State<Arc<AppState>>) -> Json<SessionSnapshot> {
    Json(state.coordinator.snapshot().await)
}

/// Submission from the prompt box.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    /// Target conversation; the current one when absent.
    pub conversation_id: Option<ConversationId>,
    /// Model to use; the selected one when absent.
    pub model: Option<String>,
    /// Prompt text.
    pub prompt: String,
}

/// Result of one exchange.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    /// `completed`, `canceled`, `failed` or `rejected`.
    pub outcome: &'static str,
    /// Updated conversation on completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation: Option<Conversation>,
    /// Failure notice.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

impl From<ExchangeOutcome> for SubmitResponse {
    fn from(outcome: ExchangeOutcome) -> Self {
        match outcome {
            ExchangeOutcome::Rejected => Self {
                outcome: "rejected",
                conversation: None,
                notice: None,
            },
            ExchangeOutcome::Completed(conversation) => Self {
                outcome: "completed",
                conversation: Some(conversation),
                notice: None,
            },
            ExchangeOutcome::Canceled => Self {
                outcome: "canceled",
                conversation: None,
                notice: None,
            },
            ExchangeOutcome::Failed { notice } => Self {
                outcome: "failed",
                conversation: None,
                notice: Some(notice),
            },
        }
    }
}

/// Run one exchange and answer with its outcome.
///
/// The exchange runs on its own task so a closed browser tab does not leave
/// the session stuck in the streaming state; progress is on `/api/events`.
async fn submit(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitRequest>,
) -> ApiResult<SubmitResponse> {
    let SubmitRequest {
        conversation_id,
        model,
        prompt,
    } = request;
    let model = match model {
        Some(name) => ModelId::new(name).map_err(|e| error_response(&ChatError::from(e)))?,
        None => state.coordinator.selected_model().await,
    };

    let coordinator = state.coordinator.clone();
    let task =
        tokio::spawn(async move { coordinator.submit(conversation_id, model, &prompt).await });

    let outcome = task.await.map_err(|e| {
        error!("Exchange task failed: {e}");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    Ok(Json(outcome.into()))
}

async fn cancel(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let canceled = state.coordinator.cancel_active().await;
    Json(serde_json::json!({ "canceled": canceled }))
}

/// Server-sent stream of coordinator events.
async fn events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(event_stream(state.coordinator.subscribe())).keep_alive(KeepAlive::default())
}

fn event_stream(
    receiver: broadcast::Receiver<CoordinatorEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => match Event::default().json_data(&event) {
                    Ok(sse) => return Some((Ok(sse), receiver)),
                    Err(e) => warn!("Dropping unserializable event: {e}"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Event subscriber lagged by {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}

/// Installed models and the current selection.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelsResponse {
    /// Installed models.
    pub models: Vec<ModelDescriptor>,
    /// Model used by the next submission.
    pub selected: ModelId,
}

async fn models_response(state: &AppState) -> ModelsResponse {
    ModelsResponse {
        models: state.models.models().await,
        selected: state.coordinator.selected_model().await,
    }
}

async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelsResponse> {
    Json(models_response(&state).await)
}

async fn refresh_models(State(state): State<Arc<AppState>>) -> ApiResult<ModelsResponse> {
    state
        .refresh_models()
        .await
        .map_err(|e| error_response(&e))?;
    Ok(Json(models_response(&state).await))
}

/// Request naming one model.
#[derive(Debug, Deserialize)]
pub struct ModelRequest {
    /// Model name.
    pub name: String,
}

async fn select_model(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ModelRequest>,
) -> ApiResult<ModelsResponse> {
    let model = ModelId::new(request.name).map_err(|e| error_response(&ChatError::from(e)))?;
    state.coordinator.select_model(model).await;
    Ok(Json(models_response(&state).await))
}

async fn show_model(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ModelRequest>,
) -> ApiResult<ModelDetails> {
    state
        .ollama
        .show_model(&request.name)
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}

async fn pull_model(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ModelRequest>,
) -> ApiResult<ModelsResponse> {
    state
        .ollama
        .pull_model(&request.name)
        .await
        .map_err(|e| error_response(&e))?;
    refresh_after_change(&state).await;
    Ok(Json(models_response(&state).await))
}

async fn delete_model(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ModelRequest>,
) -> ApiResult<ModelsResponse> {
    state
        .ollama
        .delete_model(&request.name)
        .await
        .map_err(|e| error_response(&e))?;
    refresh_after_change(&state).await;
    Ok(Json(models_response(&state).await))
}

async fn refresh_after_change(state: &AppState) {
    // The change itself succeeded; a stale list is only cosmetic.
    if let Err(e) = state.refresh_models().await {
        warn!("Model list not refreshed: {e}");
    }
}

/// Theme payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct ThemeBody {
    /// `light` or `dark`.
    pub theme: Theme,
}

async fn get_theme(State(state): State<Arc<AppState>>) -> Json<ThemeBody> {
    Json(ThemeBody {
        theme: state.preferences.theme().await,
    })
}

async fn set_theme(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ThemeBody>,
) -> ApiResult<ThemeBody> {
    let theme = state
        .preferences
        .set_theme(body.theme)
        .await
        .map_err(|e| error_response(&e))?;
    Ok(Json(ThemeBody { theme }))
}

async fn toggle_theme(State(state): State<Arc<AppState>>) -> ApiResult<ThemeBody> {
    let theme = state
        .preferences
        .toggle()
        .await
        .map_err(|e| error_response(&e))?;
    Ok(Json(ThemeBody { theme }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    use super::*;
    use crate::chat::config::ChatConfig;
    use crate::storage::{KeyValueStore, SqliteKeyValueStore};

    /// State pointing at an address nothing listens on.
    async fn state() -> Arc<AppState> {
        let kv: Arc<dyn KeyValueStore> =
            Arc::new(SqliteKeyValueStore::open_in_memory().await.unwrap());
        let config = ChatConfig::default()
            .with_ollama_url("http://127.0.0.1:9")
            .with_default_model("m1");
        AppState::with_storage(config, kv).await.unwrap()
    }

    fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(state().await);
        let response = app
            .oneshot(empty_request(Method::GET, "/health"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_new_conversation_is_listed() {
        let state = state().await;
        let created = create_router(Arc::clone(&state))
            .oneshot(empty_request(Method::POST, "/api/conversations"))
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::OK);
        let created = body_json(created).await;

        let listed = create_router(state)
            .oneshot(empty_request(Method::GET, "/api/conversations"))
            .await
            .unwrap();
        let listed = body_json(listed).await;
        assert_eq!(listed[0]["id"], created["id"]);
        assert_eq!(listed[0]["messageCount"], 0);
    }

    #[tokio::test]
    async fn test_selecting_unknown_conversation_is_not_found() {
        let uri = format!("/api/conversations/{}/select", ConversationId::new());
        let response = create_router(state().await)
            .oneshot(empty_request(Method::POST, &uri))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_empty_prompt_is_rejected() {
        let response = create_router(state().await)
            .oneshot(json_request(
                Method::POST,
                "/api/session/submit",
                serde_json::json!({ "prompt": "  " }),
            ))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["outcome"], "rejected");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_a_failed_exchange() {
        let state = state().await;
        let response = create_router(Arc::clone(&state))
            .oneshot(json_request(
                Method::POST,
                "/api/session/submit",
                serde_json::json!({ "prompt": "Hello" }),
            ))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["outcome"], "failed");
        assert!(body["notice"].is_string());

        let snapshot = state.coordinator.snapshot().await;
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages[1].content, "");
    }

    #[tokio::test]
    async fn test_theme_toggle() {
        let state = state().await;
        let toggled = create_router(Arc::clone(&state))
            .oneshot(empty_request(Method::POST, "/api/theme/toggle"))
            .await
            .unwrap();
        assert_eq!(body_json(toggled).await["theme"], "dark");

        let set = create_router(state)
            .oneshot(json_request(
                Method::PUT,
                "/api/theme",
                serde_json::json!({ "theme": "light" }),
            ))
            .await
            .unwrap();
        assert_eq!(body_json(set).await["theme"], "light");
    }

    #[tokio::test]
    async fn test_invalid_model_selection_is_bad_request() {
        let response = create_router(state().await)
            .oneshot(json_request(
                Method::POST,
                "/api/models/select",
                serde_json::json!({ "name": "" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
