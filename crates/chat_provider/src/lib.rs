//! Backend-neutral contract for streaming chat against a local model server.
//!
//! This crate defines the conversation roles, request envelope, streamed deltas,
//! and the typed backend error taxonomy shared by transports and the engine. It
//! contains no HTTP code and no conversation state.

use std::fmt;
use std::pin::Pin;
use std::str::FromStr;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Author of one conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a role label is not one of the four known roles.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown message role '{0}'")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            _ => Err(UnknownRole(value.to_string())),
        }
    }
}

/// One function call requested by the model.
///
/// `index` correlates members of a parallel batch. Backends may omit it, in which
/// case callers fall back to declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

impl ToolCall {
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: Value, index: Option<u32>) -> Self {
        Self {
            name: name.into(),
            arguments,
            index,
        }
    }
}

/// Request-side message. Carries the optional fields only the outgoing request
/// uses (images, echoed thinking, tool calls, tool result attribution).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: Vec::new(),
            thinking: None,
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }

    /// Assistant turn echoing the tool calls it requested.
    #[must_use]
    pub fn assistant_tool_calls(
        content: impl Into<String>,
        thinking: Option<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        Self {
            thinking: thinking.filter(|text| !text.is_empty()),
            tool_calls,
            ..Self::new(Role::Assistant, content)
        }
    }

    /// Result of one tool call, attributed to the tool by name.
    #[must_use]
    pub fn tool_result(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_name: Some(tool_name.into()),
            ..Self::new(Role::Tool, content)
        }
    }
}

/// Reasoning-trace request flag. Some model families take a level instead of a bool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThinkMode {
    Enabled,
    Level(String),
}

impl ThinkMode {
    /// Picks the request form a model family expects.
    #[must_use]
    pub fn for_model(model: &str) -> Self {
        if model.to_ascii_lowercase().contains("gpt-oss") {
            Self::Level("medium".to_string())
        } else {
            Self::Enabled
        }
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Enabled => Value::Bool(true),
            Self::Level(level) => Value::String(level.clone()),
        }
    }
}

/// One streaming chat request.
///
/// `think` and `tools` are omitted from the wire request entirely when `None`/empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub context_window: u32,
    pub think: Option<ThinkMode>,
    pub tools: Vec<Value>,
}

/// Incremental piece of one streamed model turn. Empty fields mean "nothing new".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatDelta {
    pub thinking: String,
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub done: bool,
}

impl ChatDelta {
    #[must_use]
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: text.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn thinking(text: impl Into<String>) -> Self {
        Self {
            thinking: text.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn tool_call(name: impl Into<String>, arguments: Value, index: Option<u32>) -> Self {
        Self {
            tool_calls: vec![ToolCall::new(name, arguments, index)],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn done() -> Self {
        Self {
            done: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.thinking.is_empty() && self.content.is_empty() && self.tool_calls.is_empty()
    }
}

/// Raw model description returned by the backend's describe-model call.
///
/// `capabilities` keeps the raw JSON so callers can tell an absent field
/// (`None`) from an explicit empty list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelDescription {
    pub capabilities: Option<Value>,
}

/// Ordered stream of deltas for one model turn.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<ChatDelta, BackendError>> + Send>>;

/// Typed failure surfaced by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("unable to connect to model backend at {host}: {message}")]
    Connection { host: String, message: String },

    #[error("model '{model}' was not found on {host}")]
    ModelNotFound { model: String, host: String },

    #[error("failed to stream response: {0}")]
    Streaming(String),

    #[error("request was cancelled")]
    Cancelled,
}

impl BackendError {
    #[must_use]
    pub fn connection(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            host: host.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn model_not_found(model: impl Into<String>, host: impl Into<String>) -> Self {
        Self::ModelNotFound {
            model: model.into(),
            host: host.into(),
        }
    }

    #[must_use]
    pub fn streaming(message: impl Into<String>) -> Self {
        Self::Streaming(message.into())
    }

    /// Connection and generic streaming faults are transient; a missing model and
    /// cancellation are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Streaming(_))
    }
}

/// Returns true when `available` satisfies a request for `requested`.
///
/// A bare name without a tag matches any tagged variant (`llama3` ~ `llama3:8b`).
#[must_use]
pub fn model_name_matches(requested: &str, available: &str) -> bool {
    let requested = requested.trim().to_ascii_lowercase();
    let available = available.trim().to_ascii_lowercase();
    if requested == available {
        return true;
    }
    !requested.contains(':') && available.starts_with(&format!("{requested}:"))
}

/// Streaming chat backend.
#[async_trait]
pub trait ChatBackend: Send + Sync + 'static {
    /// Stable identifier used for startup selection and logging.
    fn backend_id(&self) -> &str;

    /// Human-readable location of the backend, used in error messages.
    fn host(&self) -> &str;

    /// Opens one streamed chat turn.
    ///
    /// Implementations should stop producing deltas once `cancel` fires.
    async fn stream_chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<DeltaStream, BackendError>;

    /// Queries the describe-model endpoint.
    async fn show_model(&self, model: &str) -> Result<ModelDescription, BackendError>;

    /// Lists model names known to the backend.
    async fn list_models(&self) -> Result<Vec<String>, BackendError>;

    /// Downloads a model so later requests can use it.
    ///
    /// Backends may return an error when pulling is unsupported.
    async fn pull_model(&self, model: &str) -> Result<(), BackendError> {
        Err(BackendError::streaming(format!(
            "pulling '{model}' is not supported by this backend"
        )))
    }
}
