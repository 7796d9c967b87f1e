//! Application state shared across all request handlers.

use std::sync::Arc;

use tracing::info;

use crate::chat::config::ChatConfig;
use crate::chat::errors::ChatResult;
use crate::chat::ids::ModelId;
use crate::coordinator::GenerationCoordinator;
use crate::llm::{Generator, ModelCatalog, ModelDirectory, OllamaClient};
use crate::storage::{KeyValueStore, Preferences, SqliteKeyValueStore, TranscriptStore};

/// Shared application state.
pub struct AppState {
    /// Effective configuration.
    pub config: ChatConfig,
    /// Inference server client, used for model management.
    pub ollama: OllamaClient,
    /// Installed models.
    pub models: ModelDirectory,
    /// The browser session's coordinator.
    pub coordinator: GenerationCoordinator,
    /// Theme preference.
    pub preferences: Preferences,
}

impl AppState {
    /// Open storage and build every component from `config`.
    ///
    /// # Errors
    /// Returns an error if the config is invalid or storage cannot be opened.
    pub async fn new(config: ChatConfig) -> ChatResult<Arc<Self>> {
        config.validate()?;
        let kv: Arc<dyn KeyValueStore> =
            Arc::new(SqliteKeyValueStore::open(&config.sqlite_path).await?);
        info!("Local storage: {}", config.sqlite_path.display());
        Self::with_storage(config, kv).await
    }

    /// Build every component on top of an already opened storage.
    ///
    /// # Errors
    /// Returns an error if the stored state cannot be loaded.
    pub async fn with_storage(
        config: ChatConfig,
        kv: Arc<dyn KeyValueStore>,
    ) -> ChatResult<Arc<Self>> {
        let ollama = OllamaClient::new(&config)?;
        let store = Arc::new(TranscriptStore::load(Arc::clone(&kv)).await?);
        let preferences = Preferences::load(kv).await?;

        let generator: Arc<dyn Generator> = Arc::new(ollama.clone());
        let catalog: Arc<dyn ModelCatalog> = Arc::new(ollama.clone());
        let coordinator =
            GenerationCoordinator::new(generator, store, config.default_model_id()?, &config);

        Ok(Arc::new(Self {
            config,
            ollama,
            models: ModelDirectory::new(catalog),
            coordinator,
            preferences,
        }))
    }

    /// Refresh the model list and fall back to the first installed model
    /// when the selected one is gone.
    ///
    /// # Errors
    /// Returns the fetch error; the previous list is kept.
    pub async fn refresh_models(&self) -> ChatResult<usize> {
        let count = self.models.refresh().await?;
        let selected: ModelId = self.coordinator.selected_model().await;
        if let Some(fallback) = self.models.fallback_for(&selected).await {
            info!("Model {selected} is not installed, selecting {fallback}");
            self.coordinator.select_model(fallback).await;
        }
        Ok(count)
    }
}
