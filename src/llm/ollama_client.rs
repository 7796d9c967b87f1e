//! Async Ollama HTTP client.
//!
//! Behaviour:
//! - `GET /api/version` to probe reachability.
//! - `GET /api/tags` for the installed model list.
//! - `POST /api/generate` with `stream: true`; the body is handed back as a
//!   raw byte stream so the caller can decode and cancel it incrementally.
//! - `POST /api/show`, `POST /api/pull`, `DELETE /api/delete` for model
//!   management.
//!
//! No overall request timeout is set: a streamed generation legitimately runs
//! for minutes. Only the connect phase is bounded.

use std::future::Future;
use std::pin::Pin;

use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chat::config::ChatConfig;
use crate::chat::errors::{ChatError, ChatResult};
use crate::llm::models::{ModelCatalog, ModelDescriptor, ModelDetails, ModelFuture, TagsResponse};

/// Raw body of a streamed response.
pub type ByteStream = Pin<Box<dyn Stream<Item = ChatResult<Vec<u8>>> + Send>>;

/// Boxed future type for generation operations.
pub type GenerateFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Body of `POST /api/generate`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GenerateRequest {
    /// Model name.
    pub model: String,
    /// Prompt text.
    pub prompt: String,
    /// Always `true` for the coordinator.
    pub stream: bool,
}

impl GenerateRequest {
    /// Build a streaming request.
    #[must_use]
    pub fn streaming(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            stream: true,
        }
    }
}

#[derive(Serialize)]
struct NameRequest<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct PullRequest<'a> {
    name: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct VersionResponse {
    version: String,
}

/// Producer of streamed generations.
pub trait Generator: Send + Sync {
    /// Issue a generation request and return its body once headers arrived.
    ///
    /// # Errors
    /// Returns an error if the server is unreachable or answers with a
    /// non-success status.
    fn generate_stream(&self, request: GenerateRequest) -> GenerateFuture<'_, ChatResult<ByteStream>>;
}

/// Async client for one Ollama server.
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    /// Create a client configured from `config`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &ChatConfig) -> ChatResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url().to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Server version, also used as a readiness probe.
    ///
    /// # Errors
    /// Returns an error if the server cannot be reached.
    pub async fn version(&self) -> ChatResult<String> {
        let response = self.client.get(self.url("/api/version")).send().await?;
        let response = ensure_success(response)?;
        Ok(response.json::<VersionResponse>().await?.version)
    }

    /// Installed models.
    ///
    /// # Errors
    /// Returns an error if the request fails or the body is malformed.
    pub async fn tags(&self) -> ChatResult<Vec<ModelDescriptor>> {
        let response = self.client.get(self.url("/api/tags")).send().await?;
        let response = ensure_success(response)?;
        Ok(response.json::<TagsResponse>().await?.models)
    }

    /// Detail metadata of one model.
    ///
    /// # Errors
    /// Returns an error if the request fails or the body is malformed.
    pub async fn show_model(&self, name: &str) -> ChatResult<ModelDetails> {
        let response = self
            .client
            .post(self.url("/api/show"))
            .json(&NameRequest { name })
            .send()
            .await?;
        let response = ensure_success(response)?;
        Ok(response.json::<ModelDetails>().await?)
    }

    /// Ask the server to download a model and wait until it is done.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn pull_model(&self, name: &str) -> ChatResult<()> {
        let response = self
            .client
            .post(self.url("/api/pull"))
            .json(&PullRequest {
                name,
                stream: false,
            })
            .send()
            .await?;
        ensure_success(response)?;
        debug!("Pulled model {name}");
        Ok(())
    }

    /// Remove a model from the server.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn delete_model(&self, name: &str) -> ChatResult<()> {
        let response = self
            .client
            .delete(self.url("/api/delete"))
            .json(&NameRequest { name })
            .send()
            .await?;
        ensure_success(response)?;
        debug!("Deleted model {name}");
        Ok(())
    }

    /// Issue a streaming generation.
    ///
    /// Dropping the returned stream closes the connection, which is how an
    /// in-flight generation gets aborted.
    ///
    /// # Errors
    /// Returns an error if the request fails before the body starts.
    pub async fn generate(&self, request: &GenerateRequest) -> ChatResult<ByteStream> {
        let response = self
            .client
            .post(self.url("/api/generate"))
            .json(request)
            .send()
            .await?;
        let response = ensure_success(response)?;
        let body = response
            .bytes_stream()
            .map_ok(|bytes| bytes.to_vec())
            .map(|read| read.map_err(ChatError::from));
        Ok(Box::pin(body))
    }
}

fn ensure_success(response: Response) -> ChatResult<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(ChatError::HttpStatus {
            status: status.as_u16(),
        })
    }
}

impl Generator for OllamaClient {
    fn generate_stream(&self, request: GenerateRequest) -> GenerateFuture<'_, ChatResult<ByteStream>> {
        Box::pin(async move { self.generate(&request).await })
    }
}

impl ModelCatalog for OllamaClient {
    fn list_models(&self) -> ModelFuture<'_, ChatResult<Vec<ModelDescriptor>>> {
        Box::pin(async move { self.tags().await })
    }
}
