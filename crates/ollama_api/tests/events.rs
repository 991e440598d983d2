use chat_provider::ToolCall;
use ollama_api::{ChatResponseChunk, ShowResponse};
use pretty_assertions::assert_eq;
use serde_json::json;

fn chunk(value: serde_json::Value) -> ChatResponseChunk {
    serde_json::from_value(value).expect("chunk should deserialize")
}

#[test]
fn thinking_content_and_done_map_to_delta() {
    let delta = chunk(json!({
        "message": {"role": "assistant", "content": "hi", "thinking": "hmm"},
        "done": true
    }))
    .into_delta();

    assert_eq!(delta.content, "hi");
    assert_eq!(delta.thinking, "hmm");
    assert!(delta.done);
}

#[test]
fn absent_and_null_fields_mean_nothing_new() {
    let delta = chunk(json!({"message": {"content": null, "tool_calls": null}})).into_delta();
    assert!(delta.is_empty());
    assert!(!delta.done);

    let delta = chunk(json!({"done": false})).into_delta();
    assert!(delta.is_empty());
}

#[test]
fn tool_calls_keep_index_and_decode_string_arguments() {
    let delta = chunk(json!({
        "message": {
            "content": "",
            "tool_calls": [
                {"function": {"name": "read", "arguments": {"path": "a.txt"}, "index": 0}},
                {"function": {"name": "ls", "arguments": "{\"path\": \".\"}"}}
            ]
        }
    }))
    .into_delta();

    assert_eq!(
        delta.tool_calls,
        vec![
            ToolCall::new("read", json!({"path": "a.txt"}), Some(0)),
            ToolCall::new("ls", json!({"path": "."}), None),
        ]
    );
}

#[test]
fn show_response_distinguishes_absent_from_empty_capabilities() {
    let absent: ShowResponse =
        serde_json::from_value(json!({"modelfile": "FROM x"})).expect("show should parse");
    assert_eq!(absent.capabilities, None);

    let empty: ShowResponse =
        serde_json::from_value(json!({"capabilities": []})).expect("show should parse");
    assert_eq!(empty.capabilities, Some(json!([])));
}
