use serde_json::{Value, json};

use crate::translate::map_finish_reason;

/// Rewrites a complete OpenAI Chat Completions response into an Anthropic
/// Messages response. Streaming replies go through the stream transcoder
/// instead.
pub fn openai_to_anthropic(body: &Value, model_hint: Option<&str>) -> Value {
    let choice = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .cloned()
        .unwrap_or(Value::Null);
    let message = choice.get("message").unwrap_or(&Value::Null);

    let mut content = Vec::new();

    if let Some(text) = message.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            content.push(json!({
                "type": "text",
                "text": text,
            }));
        }
    }

    if let Some(tool_calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in tool_calls {
            content.push(json!({
                "type": "tool_use",
                "id": call.get("id").and_then(Value::as_str).unwrap_or_default(),
                "name": call
                    .get("function")
                    .and_then(|function| function.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or_default(),
                "input": parse_arguments(call),
            }));
        }
    }

    let stop_reason = choice
        .get("finish_reason")
        .and_then(Value::as_str)
        .map_or(Value::Null, |reason| json!(map_finish_reason(reason)));

    let model = model_hint
        .map(str::to_string)
        .or_else(|| {
            body.get("model")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_default();

    let chat_id = body
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or("gateway");

    json!({
        "id": format!("msg_{chat_id}"),
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": content,
        "stop_reason": stop_reason,
        "stop_sequence": null,
        "usage": {
            "input_tokens": usage_field(body, "prompt_tokens"),
            "output_tokens": usage_field(body, "completion_tokens"),
        }
    })
}

/// Tool-call arguments arrive as a JSON-encoded string. Malformed JSON
/// degrades to an empty object instead of failing the whole response.
fn parse_arguments(call: &Value) -> Value {
    call.get("function")
        .and_then(|function| function.get("arguments"))
        .and_then(Value::as_str)
        .and_then(|arguments| serde_json::from_str(arguments).ok())
        .unwrap_or_else(|| json!({}))
}

fn usage_field(body: &Value, field: &str) -> u64 {
    body.get("usage")
        .and_then(|usage| usage.get(field))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}
