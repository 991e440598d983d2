use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chat_provider::{ChatMessage, ChatRequest, ToolCall};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire body for `POST /api/chat`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OllamaChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub stream: bool,
    pub options: WireOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub think: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WireOptions {
    pub num_ctx: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

/// Tool call in the `{type, function: {name, arguments, index}}` shape used
/// by both requests and streamed responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireToolCall {
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: WireFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

fn function_kind() -> String {
    "function".to_string()
}

impl From<&ToolCall> for WireToolCall {
    fn from(call: &ToolCall) -> Self {
        Self {
            kind: function_kind(),
            function: WireFunction {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
                index: call.index,
            },
        }
    }
}

impl WireToolCall {
    /// Converts a streamed call, decoding arguments that arrive JSON-encoded
    /// as a string.
    pub fn into_tool_call(self) -> ToolCall {
        let arguments = match self.function.arguments {
            Value::Null => Value::Object(Default::default()),
            Value::String(text) => match serde_json::from_str::<Value>(&text) {
                Ok(value @ Value::Object(_)) => value,
                _ => Value::String(text),
            },
            other => other,
        };
        ToolCall::new(self.function.name, arguments, self.function.index)
    }
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
            images: message.images.clone(),
            thinking: message.thinking.clone(),
            tool_calls: message.tool_calls.iter().map(WireToolCall::from).collect(),
            tool_name: message.tool_name.clone(),
        }
    }
}

impl From<&ChatRequest> for OllamaChatRequest {
    fn from(request: &ChatRequest) -> Self {
        Self {
            model: request.model.clone(),
            messages: request.messages.iter().map(WireMessage::from).collect(),
            stream: true,
            options: WireOptions {
                num_ctx: request.context_window,
            },
            think: request.think.as_ref().map(|mode| mode.to_value()),
            tools: request.tools.clone(),
        }
    }
}

/// Base64-encodes raw image bytes for the `images` field of a message.
pub fn encode_image(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}
