use chat_provider::BackendError;
use session_store::SessionStoreError;
use thiserror::Error;

use crate::tools::ToolError;

/// Failure of one engine operation.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Unable to connect to Ollama host {host}: {message}")]
    Connection { host: String, message: String },

    #[error("Model '{model}' was not found on {host}.")]
    ModelNotFound { model: String, host: String },

    #[error("Failed to stream response: {0}")]
    Streaming(String),

    #[error("Request cancelled.")]
    Cancelled,

    /// Registry-level misconfiguration. Individual tool failures are reported to
    /// the model as text instead.
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] SessionStoreError),
}

impl ChatError {
    /// Transient backend faults worth another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Streaming(_))
    }

    /// Stable label for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::ModelNotFound { .. } => "model_not_found",
            Self::Streaming(_) => "streaming",
            Self::Cancelled => "cancelled",
            Self::Tool(_) => "tool",
            Self::Persistence(_) => "persistence",
        }
    }
}

impl From<BackendError> for ChatError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::Connection { host, message } => Self::Connection { host, message },
            BackendError::ModelNotFound { model, host } => Self::ModelNotFound { model, host },
            BackendError::Streaming(message) => Self::Streaming(message),
            BackendError::Cancelled => Self::Cancelled,
        }
    }
}
