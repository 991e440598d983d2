use std::collections::BTreeSet;
use std::sync::OnceLock;

use chat_provider::ToolCall;
use regex::Regex;
use serde_json::{Map, Value};

fn json_block() -> &'static Regex {
    static JSON_BLOCK: OnceLock<Regex> = OnceLock::new();
    JSON_BLOCK.get_or_init(|| {
        Regex::new(r"(?i)```json\s*(\{[\s\S]*?\})\s*```").expect("json block pattern is valid")
    })
}

/// Recovers a tool call some models write into their content as JSON instead of
/// using structured `tool_calls`.
///
/// A fenced ```` ```json ```` block is preferred over the raw text. The object must
/// name one of `allowed` either at the top level (`{"name", "arguments"}`) or under
/// `function`. For a list, the first matching element wins. Non-object arguments
/// become `{}`.
#[must_use]
pub fn parse_inline_tool_calls(content: &str, allowed: &BTreeSet<String>) -> Vec<ToolCall> {
    let text = content.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let candidate = json_block()
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map_or(text, |found| found.as_str());
    let Ok(parsed) = serde_json::from_str::<Value>(candidate) else {
        return Vec::new();
    };

    match parsed {
        Value::Array(items) => items
            .iter()
            .find_map(|item| as_call(item, allowed))
            .into_iter()
            .collect(),
        value => as_call(&value, allowed).into_iter().collect(),
    }
}

fn as_call(value: &Value, allowed: &BTreeSet<String>) -> Option<ToolCall> {
    let object = value.as_object()?;
    let source = match object.get("function") {
        Some(Value::Object(function)) => function,
        _ => object,
    };

    let name = source.get("name").and_then(Value::as_str)?;
    if name.is_empty() || !allowed.contains(name) {
        return None;
    }
    Some(ToolCall::new(
        name,
        object_arguments(source.get("arguments")),
        None,
    ))
}

/// Arguments as a JSON object; anything else becomes an empty object.
pub(crate) fn object_arguments(arguments: Option<&Value>) -> Value {
    match arguments {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        _ => Value::Object(Map::new()),
    }
}
