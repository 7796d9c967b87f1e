//! Error types for the chat client.

use thiserror::Error;

use crate::chat::ids::{ConversationId, ModelIdError};

/// Chat client error type.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// HTTP transport error (connect, read, body).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// The inference server answered with a non-success status.
    #[error("ollama http status not ok: {status}")]
    HttpStatus {
        /// Status code returned by the server.
        status: u16,
    },
    /// The inference server reported an error inside the response stream.
    #[error("ollama reported an error: {0}")]
    Server(String),
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Invalid model name.
    #[error("invalid model: {0}")]
    InvalidModel(#[from] ModelIdError),
    /// The requested conversation does not exist.
    #[error("conversation not found: {0}")]
    ConversationNotFound(ConversationId),
}

impl ChatError {
    /// Whether the error happened while talking to the inference server.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_) | Self::HttpStatus { .. } | Self::Server(_))
    }
}

/// Convenience result alias for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(ChatError::HttpStatus { status: 500 }.is_transport());
        assert!(ChatError::Server("model not found".to_string()).is_transport());
        assert!(!ChatError::InvalidConfig("x".to_string()).is_transport());
    }

    #[test]
    fn test_status_display() {
        let err = ChatError::HttpStatus { status: 404 };
        assert_eq!(err.to_string(), "ollama http status not ok: 404");
    }
}
