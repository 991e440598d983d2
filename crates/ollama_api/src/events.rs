use chat_provider::ChatDelta;
use serde::Deserialize;
use serde_json::Value;

use crate::payload::WireToolCall;

/// One NDJSON frame of a streamed `/api/chat` response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatResponseChunk {
    #[serde(default)]
    pub message: Option<ResponseMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub done_reason: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<WireToolCall>>,
}

impl ChatResponseChunk {
    /// Flattens the frame into a delta. Absent fields become empty.
    pub fn into_delta(self) -> ChatDelta {
        let done = self.done;
        let Some(message) = self.message else {
            return ChatDelta {
                done,
                ..ChatDelta::default()
            };
        };

        ChatDelta {
            thinking: message.thinking.unwrap_or_default(),
            content: message.content.unwrap_or_default(),
            tool_calls: message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(WireToolCall::into_tool_call)
                .collect(),
            done,
        }
    }
}

/// Response of `POST /api/show`. Only the capability field is interpreted.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ShowResponse {
    #[serde(default)]
    pub capabilities: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct TagsResponse {
    #[serde(default)]
    pub models: Vec<TagEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TagEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub model: Option<String>,
}

impl TagEntry {
    pub(crate) fn display_name(&self) -> Option<String> {
        if !self.name.trim().is_empty() {
            return Some(self.name.trim().to_string());
        }
        self.model
            .as_deref()
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .map(ToString::to_string)
    }
}

/// One NDJSON frame of a streamed `/api/pull` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct PullStatus {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct VersionResponse {
    #[serde(default)]
    pub version: String,
}
