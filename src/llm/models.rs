//! Model descriptors and the model directory.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::chat::errors::ChatResult;
use crate::chat::ids::ModelId;

/// Boxed future type for model operations.
pub type ModelFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Format details reported for an installed model.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFormat {
    /// File format (e.g. `gguf`).
    #[serde(default)]
    pub format: String,
    /// Model family (e.g. `llama`).
    #[serde(default)]
    pub family: String,
    /// Parameter count label (e.g. `7B`).
    #[serde(default)]
    pub parameter_size: String,
    /// Quantization label (e.g. `Q4_0`).
    #[serde(default)]
    pub quantization_level: String,
}

/// One entry of `GET /api/tags`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model name, usable in generation requests.
    pub name: String,
    /// Last modification time as reported by the server.
    #[serde(default)]
    pub modified_at: Option<String>,
    /// Size on disk in bytes.
    #[serde(default)]
    pub size: u64,
    /// Content digest.
    #[serde(default)]
    pub digest: Option<String>,
    /// Format details, when reported.
    #[serde(default)]
    pub details: Option<ModelFormat>,
}

/// Body of `GET /api/tags`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct TagsResponse {
    #[serde(default)]
    pub(crate) models: Vec<ModelDescriptor>,
}

/// Body of `POST /api/show`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDetails {
    /// License text.
    #[serde(default)]
    pub license: String,
    /// Modelfile source.
    #[serde(default)]
    pub modelfile: String,
    /// Default runtime parameters.
    #[serde(default)]
    pub parameters: String,
    /// Prompt template.
    #[serde(default)]
    pub template: String,
    /// Default system prompt.
    #[serde(default)]
    pub system: String,
}

/// Source of the installed model list.
pub trait ModelCatalog: Send + Sync {
    /// Fetch every installed model.
    ///
    /// # Errors
    /// Returns an error if the server cannot be reached or answers badly.
    fn list_models(&self) -> ModelFuture<'_, ChatResult<Vec<ModelDescriptor>>>;
}

/// Read-only mirror of the models installed on the inference server.
///
/// The list is replaced wholesale on every successful refresh; a failed
/// refresh keeps the previous (possibly empty) list.
pub struct ModelDirectory {
    catalog: Arc<dyn ModelCatalog>,
    models: RwLock<Vec<ModelDescriptor>>,
}

impl ModelDirectory {
    /// Create an empty directory backed by `catalog`.
    #[must_use]
    pub fn new(catalog: Arc<dyn ModelCatalog>) -> Self {
        Self {
            catalog,
            models: RwLock::new(Vec::new()),
        }
    }

    /// Re-fetch the model list.
    ///
    /// # Errors
    /// Returns the fetch error; the cached list is left untouched in that case.
    pub async fn refresh(&self) -> ChatResult<usize> {
        match self.catalog.list_models().await {
            Ok(models) => {
                let count = models.len();
                *self.models.write().await = models;
                debug!("Model directory refreshed: {count} models");
                Ok(count)
            }
            Err(err) => {
                warn!("Failed to refresh model directory: {err}");
                Err(err)
            }
        }
    }

    /// Snapshot of the cached model list.
    pub async fn models(&self) -> Vec<ModelDescriptor> {
        self.models.read().await.clone()
    }

    /// Model to select after a refresh.
    ///
    /// Returns the first listed model when `current` is not installed, `None`
    /// when `current` is fine or the list is empty.
    pub async fn fallback_for(&self, current: &ModelId) -> Option<ModelId> {
        let models = self.models.read().await;
        if models.is_empty() || models.iter().any(|m| m.name == current.as_str()) {
            return None;
        }
        models.iter().find_map(|m| ModelId::new(&m.name).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::errors::ChatError;

    /// `None` simulates an unreachable server.
    struct FixedCatalog(Option<Vec<&'static str>>);

    impl ModelCatalog for FixedCatalog {
        fn list_models(&self) -> ModelFuture<'_, ChatResult<Vec<ModelDescriptor>>> {
            Box::pin(async move {
                match &self.0 {
                    Some(names) => Ok(names.iter().map(|n| descriptor(n)).collect()),
                    None => Err(ChatError::HttpStatus { status: 503 }),
                }
            })
        }
    }

    fn descriptor(name: &str) -> ModelDescriptor {
        ModelDescriptor {
            name: name.to_string(),
            modified_at: None,
            size: 0,
            digest: None,
            details: None,
        }
    }

    #[test]
    fn test_tags_response_parsing() {
        let body = r#"{"models":[{"name":"llama2:latest","modified_at":"2024-01-01T00:00:00Z",
            "size":3825819519,"digest":"abc","details":{"format":"gguf","family":"llama",
            "parameter_size":"7B","quantization_level":"Q4_0"}}]}"#;
        let tags: TagsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(tags.models.len(), 1);
        let details = tags.models[0].details.clone().unwrap_or_default();
        assert_eq!(details.quantization_level, "Q4_0");
        assert_eq!(tags.models[0].size, 3_825_819_519);
    }

    #[tokio::test]
    async fn test_refresh_replaces_list_and_picks_fallback() {
        let directory = ModelDirectory::new(Arc::new(FixedCatalog(Some(vec!["m1", "m2"]))));
        assert_eq!(directory.refresh().await.unwrap(), 2);
        assert!(directory.models().await.iter().any(|m| m.name == "m2"));

        let missing = ModelId::new("deepseek").unwrap();
        assert_eq!(
            directory.fallback_for(&missing).await,
            Some(ModelId::new("m1").unwrap())
        );
        let present = ModelId::new("m2").unwrap();
        assert_eq!(directory.fallback_for(&present).await, None);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_list_empty() {
        let directory = ModelDirectory::new(Arc::new(FixedCatalog(None)));
        assert!(directory.refresh().await.is_err());
        assert!(directory.models().await.is_empty());
        let current = ModelId::new("deepseek").unwrap();
        assert_eq!(directory.fallback_for(&current).await, None);
    }
}
