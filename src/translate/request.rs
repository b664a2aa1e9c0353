use serde_json::{Value, json};

use crate::error::GatewayError;
use crate::resolver::normalize_model;
use crate::translate::extract_text;

/// Rewrites an Anthropic Messages request into an OpenAI Chat Completions
/// request. The reverse direction is deliberately not implemented; the
/// dispatcher refuses it with a 501 instead of approximating.
pub fn anthropic_to_openai(body: &Value) -> Result<Value, GatewayError> {
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let messages = body
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| GatewayError::BadRequest("The request body must include messages".to_string()))?;

    let mut converted = Vec::new();

    if let Some(system) = body.get("system").filter(|value| !value.is_null()) {
        converted.push(json!({
            "role": "system",
            "content": extract_text(system),
        }));
    }

    for message in messages {
        let role = message
            .get("role")
            .and_then(Value::as_str)
            .unwrap_or("user");
        let content = message.get("content").unwrap_or(&Value::Null);

        match role {
            "user" => convert_user_turn(content, &mut converted),
            "assistant" => convert_assistant_turn(content, &mut converted),
            _ => {}
        }
    }

    let mut request = json!({
        "model": normalize_model(model),
        "messages": converted,
    });

    if let Some(max_tokens) = body.get("max_tokens").filter(|value| !value.is_null()) {
        request["max_tokens"] = max_tokens.clone();
    }

    if let Some(stream) = body.get("stream").filter(|value| !value.is_null()) {
        request["stream"] = stream.clone();
    }

    if let Some(temperature) = body.get("temperature").filter(|value| !value.is_null()) {
        request["temperature"] = temperature.clone();
    }

    if let Some(top_p) = body.get("top_p").filter(|value| !value.is_null()) {
        request["top_p"] = top_p.clone();
    }

    if let Some(tools) = body.get("tools").and_then(Value::as_array) {
        request["tools"] = Value::Array(tools.iter().map(convert_tool).collect());
    }

    if let Some(tool_choice) = body.get("tool_choice").filter(|value| !value.is_null()) {
        request["tool_choice"] = convert_tool_choice(tool_choice);
    }

    Ok(request)
}

fn convert_user_turn(content: &Value, converted: &mut Vec<Value>) {
    match content {
        Value::String(text) => converted.push(json!({
            "role": "user",
            "content": text,
        })),
        Value::Array(blocks) => {
            let mut texts = Vec::new();

            // Tool results become their own tool-role messages and are
            // emitted before the remaining text of the same turn.
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(Value::as_str) {
                            texts.push(text.to_string());
                        }
                    }
                    Some("tool_result") => {
                        let tool_use_id = block
                            .get("tool_use_id")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        let result = extract_text(block.get("content").unwrap_or(&Value::Null));

                        converted.push(json!({
                            "role": "tool",
                            "tool_call_id": tool_use_id,
                            "content": result,
                        }));
                    }
                    _ => {}
                }
            }

            if !texts.is_empty() {
                converted.push(json!({
                    "role": "user",
                    "content": texts.join("\n"),
                }));
            }
        }
        _ => {}
    }
}

fn convert_assistant_turn(content: &Value, converted: &mut Vec<Value>) {
    match content {
        Value::String(text) => converted.push(json!({
            "role": "assistant",
            "content": text,
        })),
        Value::Array(blocks) => {
            let mut texts = Vec::new();
            let mut tool_calls = Vec::new();

            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(Value::as_str) {
                            texts.push(text.to_string());
                        }
                    }
                    Some("tool_use") => {
                        let arguments = block
                            .get("input")
                            .map(|input| {
                                serde_json::to_string(input)
                                    .unwrap_or_else(|_| "{}".to_string())
                            })
                            .unwrap_or_else(|| "{}".to_string());

                        tool_calls.push(json!({
                            "id": block.get("id").and_then(Value::as_str).unwrap_or_default(),
                            "type": "function",
                            "function": {
                                "name": block.get("name").and_then(Value::as_str).unwrap_or_default(),
                                "arguments": arguments,
                            }
                        }));
                    }
                    _ => {}
                }
            }

            let mut message = json!({
                "role": "assistant",
                "content": if texts.is_empty() {
                    Value::Null
                } else {
                    Value::String(texts.join("\n"))
                },
            });

            if !tool_calls.is_empty() {
                message["tool_calls"] = Value::Array(tool_calls);
            }

            converted.push(message);
        }
        _ => {}
    }
}

fn convert_tool(tool: &Value) -> Value {
    let parameters = tool
        .get("input_schema")
        .filter(|value| !value.is_null())
        .cloned()
        .unwrap_or_else(|| json!({"type": "object", "properties": {}}));

    let mut function = json!({
        "name": tool.get("name").and_then(Value::as_str).unwrap_or_default(),
        "parameters": parameters,
    });

    if let Some(description) = tool.get("description").filter(|value| !value.is_null()) {
        function["description"] = description.clone();
    }

    json!({
        "type": "function",
        "function": function,
    })
}

fn convert_tool_choice(tool_choice: &Value) -> Value {
    let kind = tool_choice
        .as_str()
        .or_else(|| tool_choice.get("type").and_then(Value::as_str));

    match kind {
        Some("any") => json!("required"),
        Some("auto") => json!("auto"),
        Some("tool") => json!({
            "type": "function",
            "function": {
                "name": tool_choice.get("name").and_then(Value::as_str).unwrap_or_default(),
            }
        }),
        _ => tool_choice.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_string_becomes_first_system_message() {
        let body = json!({
            "model": "gpt-4o",
            "system": "X",
            "messages": [{"role": "user", "content": "hi"}],
        });

        let converted = anthropic_to_openai(&body).unwrap();
        let messages = converted["messages"].as_array().unwrap();
        assert_eq!(messages[0], json!({"role": "system", "content": "X"}));
        assert_eq!(messages[1], json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn system_text_blocks_join_with_newline() {
        let body = json!({
            "model": "gpt-4o",
            "system": [
                {"type": "text", "text": "first"},
                {"type": "text", "text": "second"},
            ],
            "messages": [{"role": "user", "content": "hi"}],
        });

        let converted = anthropic_to_openai(&body).unwrap();
        assert_eq!(
            converted["messages"][0],
            json!({"role": "system", "content": "first\nsecond"})
        );
    }

    #[test]
    fn tool_result_turn_emits_tool_message_before_user_text() {
        let body = json!({
            "model": "gpt-4o",
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": "here you go"},
                    {"type": "tool_result", "tool_use_id": "call_1", "content": "42"},
                ],
            }],
        });

        let converted = anthropic_to_openai(&body).unwrap();
        let messages = converted["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[0],
            json!({"role": "tool", "tool_call_id": "call_1", "content": "42"})
        );
        assert_eq!(messages[1], json!({"role": "user", "content": "here you go"}));
    }

    #[test]
    fn tool_result_block_list_content_joins_text_blocks() {
        let body = json!({
            "model": "gpt-4o",
            "messages": [{
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": "call_9",
                    "content": [
                        {"type": "text", "text": "line one"},
                        {"type": "text", "text": "line two"},
                    ],
                }],
            }],
        });

        let converted = anthropic_to_openai(&body).unwrap();
        assert_eq!(converted["messages"][0]["content"], json!("line one\nline two"));
    }

    #[test]
    fn assistant_tool_use_becomes_function_call_with_null_content() {
        let body = json!({
            "model": "gpt-4o",
            "messages": [{
                "role": "assistant",
                "content": [{
                    "type": "tool_use",
                    "id": "toolu_1",
                    "name": "get_weather",
                    "input": {"city": "Oslo"},
                }],
            }],
        });

        let converted = anthropic_to_openai(&body).unwrap();
        let message = &converted["messages"][0];
        assert_eq!(message["content"], Value::Null);

        let call = &message["tool_calls"][0];
        assert_eq!(call["id"], json!("toolu_1"));
        assert_eq!(call["type"], json!("function"));
        assert_eq!(call["function"]["name"], json!("get_weather"));

        let arguments: Value =
            serde_json::from_str(call["function"]["arguments"].as_str().unwrap()).unwrap();
        assert_eq!(arguments, json!({"city": "Oslo"}));
    }

    #[test]
    fn tools_and_tool_choice_map_to_function_shapes() {
        let body = json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [
                {"name": "lookup", "description": "Find things", "input_schema": {"type": "object"}},
                {"name": "bare"},
            ],
            "tool_choice": {"type": "tool", "name": "lookup"},
        });

        let converted = anthropic_to_openai(&body).unwrap();
        let tools = converted["tools"].as_array().unwrap();
        assert_eq!(tools[0]["type"], json!("function"));
        assert_eq!(tools[0]["function"]["name"], json!("lookup"));
        assert_eq!(tools[0]["function"]["parameters"], json!({"type": "object"}));
        assert_eq!(
            tools[1]["function"]["parameters"],
            json!({"type": "object", "properties": {}})
        );

        assert_eq!(
            converted["tool_choice"],
            json!({"type": "function", "function": {"name": "lookup"}})
        );
    }

    #[test]
    fn tool_choice_any_and_auto_map_to_keywords() {
        let base = json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
        });

        let mut any = base.clone();
        any["tool_choice"] = json!({"type": "any"});
        assert_eq!(anthropic_to_openai(&any).unwrap()["tool_choice"], json!("required"));

        let mut auto = base.clone();
        auto["tool_choice"] = json!("auto");
        assert_eq!(anthropic_to_openai(&auto).unwrap()["tool_choice"], json!("auto"));

        let absent = anthropic_to_openai(&base).unwrap();
        assert!(absent.get("tool_choice").is_none());
    }

    #[test]
    fn model_is_normalized_and_max_tokens_copied_when_present() {
        let body = json!({
            "model": "claude-sonnet-4-20250514",
            "max_tokens": 512,
            "messages": [{"role": "user", "content": "hi"}],
        });

        let converted = anthropic_to_openai(&body).unwrap();
        assert_eq!(converted["model"], json!("claude-sonnet-4"));
        assert_eq!(converted["max_tokens"], json!(512));

        let without = json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
        });
        assert!(anthropic_to_openai(&without).unwrap().get("max_tokens").is_none());
    }
}
