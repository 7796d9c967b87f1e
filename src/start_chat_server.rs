//! Startup helpers for the chat server.
//!
//! Local-only mode: talks to an inference server on the same machine and
//! serves the browser front end on loopback.

use std::process::ExitCode;
use std::sync::Arc;

use crate::chat::config::ChatConfig;
use crate::chat::errors::ChatResult;
use crate::server::{self, AppState};

/// Run the server (used by the `ollama-chat-server` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting ollama-chat v{}", env!("CARGO_PKG_VERSION"));

    let config = ChatConfig::from_env();
    tracing::info!("Ollama endpoint: {}", config.ollama_url);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(serve(config)) {
        tracing::error!("Server error: {e}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

/// Build state, load the model list and serve until Ctrl-C.
async fn serve(config: ChatConfig) -> ChatResult<()> {
    let state = initialize(config).await?;
    server::run_server_with_shutdown(state, shutdown_signal()).await
}

/// Initialize application state without starting the server.
///
/// An unreachable inference server is not fatal: the model list stays empty
/// until the next refresh.
///
/// # Errors
/// Returns an error if the config is invalid or storage cannot be opened.
pub async fn initialize(config: ChatConfig) -> ChatResult<Arc<AppState>> {
    let state = AppState::new(config).await?;

    match state.ollama.version().await {
        Ok(version) => tracing::info!("Ollama version {version}"),
        Err(e) => tracing::warn!("Ollama not reachable yet: {e}"),
    }
    if let Ok(count) = state.refresh_models().await {
        tracing::info!("{count} models installed");
    }

    Ok(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
