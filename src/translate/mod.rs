pub mod request;
pub mod response;
pub mod stream;

use serde_json::Value;

/// Flattens message content that is either a plain string or a list of text
/// blocks into one string, joining blocks with newlines.
pub(crate) fn extract_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                if let Some(text) = item.as_str() {
                    return Some(text.to_string());
                }

                if item.get("type").and_then(Value::as_str) == Some("text") {
                    return item.get("text").and_then(Value::as_str).map(str::to_string);
                }

                None
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// OpenAI finish_reason -> Anthropic stop_reason. Unrecognized values pass
/// through unchanged.
pub(crate) fn map_finish_reason(value: &str) -> &str {
    match value {
        "stop" => "end_turn",
        "tool_calls" => "tool_use",
        "length" => "max_tokens",
        other => other,
    }
}
