use chat_provider::{ChatMessage, ChatRequest, Role, ThinkMode, ToolCall};
use ollama_api::{encode_image, OllamaChatRequest};
use pretty_assertions::assert_eq;
use serde_json::json;

fn request(think: Option<ThinkMode>, tools: Vec<serde_json::Value>) -> ChatRequest {
    let mut user = ChatMessage::new(Role::User, "what is in this picture?");
    user.images = vec![encode_image(b"png")];
    ChatRequest {
        model: "llava".to_string(),
        messages: vec![ChatMessage::new(Role::System, "be brief"), user],
        context_window: 8192,
        think,
        tools,
    }
}

#[test]
fn payload_omits_think_and_tools_when_not_requested() {
    let value = serde_json::to_value(OllamaChatRequest::from(&request(None, Vec::new())))
        .expect("payload should serialize");

    assert_eq!(
        value,
        json!({
            "model": "llava",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "what is in this picture?", "images": ["cG5n"]}
            ],
            "stream": true,
            "options": {"num_ctx": 8192}
        })
    );
}

#[test]
fn payload_carries_think_level_and_tool_schemas() {
    let tools = vec![json!({"type": "function", "function": {"name": "ls", "description": "list", "parameters": {"type": "object"}}})];
    let value = serde_json::to_value(OllamaChatRequest::from(&request(
        Some(ThinkMode::for_model("gpt-oss:20b")),
        tools.clone(),
    )))
    .expect("payload should serialize");

    assert_eq!(value["think"], json!("medium"));
    assert_eq!(value["tools"], json!(tools));
}

#[test]
fn assistant_and_tool_turns_use_function_call_shape() {
    let chat = ChatRequest {
        model: "qwen3".to_string(),
        messages: vec![
            ChatMessage::assistant_tool_calls(
                "",
                Some("need a listing".to_string()),
                vec![ToolCall::new("ls", json!({"path": "."}), Some(0))],
            ),
            ChatMessage::tool_result("ls", "[file] a.txt (3 bytes)"),
        ],
        context_window: 4096,
        think: Some(ThinkMode::Enabled),
        tools: Vec::new(),
    };

    let value = serde_json::to_value(OllamaChatRequest::from(&chat)).expect("payload should serialize");
    assert_eq!(
        value["messages"],
        json!([
            {
                "role": "assistant",
                "content": "",
                "thinking": "need a listing",
                "tool_calls": [
                    {"type": "function", "function": {"name": "ls", "arguments": {"path": "."}, "index": 0}}
                ]
            },
            {"role": "tool", "content": "[file] a.txt (3 bytes)", "tool_name": "ls"}
        ])
    );
    assert_eq!(value["think"], json!(true));
}
