use chat_provider::BackendError;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OllamaApiError {
    #[error("invalid host URL '{host}': {message}")]
    InvalidHost { host: String, message: String },

    #[error("invalid header '{0}'")]
    InvalidHeader(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status} {message}")]
    Status { status: StatusCode, message: String },

    #[error("backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("request was cancelled")]
    Cancelled,
}

impl OllamaApiError {
    pub fn invalid_host(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidHost {
            host: host.into(),
            message: message.into(),
        }
    }

    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Maps a transport failure onto the backend-neutral taxonomy.
    ///
    /// Connect and timeout failures become `Connection`; a 404 or a body naming a
    /// missing model becomes `ModelNotFound`; everything else is `Streaming`.
    pub fn into_backend_error(self, host: &str, model: &str) -> BackendError {
        match self {
            Self::Cancelled => BackendError::Cancelled,
            Self::InvalidHost { message, .. } => BackendError::connection(host, message),
            Self::Request(error) if error.is_connect() || error.is_timeout() => {
                BackendError::connection(host, error.to_string())
            }
            Self::Request(error) => BackendError::streaming(error.to_string()),
            Self::Status { status, message } => {
                if status == StatusCode::NOT_FOUND || mentions_missing_model(&message) {
                    BackendError::model_not_found(model, host)
                } else {
                    BackendError::streaming(format!("HTTP {status}: {message}"))
                }
            }
            Self::Backend(message) => {
                if mentions_missing_model(&message) {
                    BackendError::model_not_found(model, host)
                } else {
                    BackendError::streaming(message)
                }
            }
            Self::InvalidHeader(message) => BackendError::streaming(message),
            Self::Serde(error) => BackendError::streaming(error.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    error: Option<String>,
}

/// Extracts the server's `{"error": "..."}` message, falling back to the raw
/// body or the canonical status reason.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(ErrorPayload { error: Some(message) }) = serde_json::from_str::<ErrorPayload>(body) {
        if !message.trim().is_empty() {
            return message.trim().to_string();
        }
    }

    if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.trim().to_string()
    }
}

fn mentions_missing_model(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("model") && lower.contains("not found")
}
