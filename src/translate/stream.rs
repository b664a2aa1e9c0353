use async_stream::try_stream;
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::{Value, json};

use crate::proxy::ProviderStream;
use crate::translate::map_finish_reason;

pub type StreamEvent = (&'static str, Value);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum BlockType {
    None,
    Text,
    ToolUse,
}

/// Incremental OpenAI-chunk -> Anthropic-event transcoder. One instance per
/// streaming request; `step` is pure with respect to I/O, so the whole state
/// machine is testable without a socket.
pub struct StreamState {
    model: String,
    message_id: String,
    block_index: i64,
    current_block: BlockType,
    message_started: bool,
    input_tokens: u64,
    output_tokens: u64,
    stop_reason: Option<String>,
    done: bool,
}

impl StreamState {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            message_id: "msg_gateway".to_string(),
            block_index: -1,
            current_block: BlockType::None,
            message_started: false,
            input_tokens: 0,
            output_tokens: 0,
            stop_reason: None,
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn usage(&self) -> (u64, u64) {
        (self.input_tokens, self.output_tokens)
    }

    /// Consumes one raw backend SSE line and returns the Anthropic events it
    /// produces, in order. Lines without a data marker are ignored; `[DONE]`
    /// finalizes the stream and makes every later call a no-op.
    pub fn step(&mut self, line: &str) -> Vec<StreamEvent> {
        if self.done {
            return Vec::new();
        }

        let Some(data) = line.strip_prefix("data:") else {
            return Vec::new();
        };

        let data = data.trim();
        if data == "[DONE]" {
            return self.finish();
        }

        let Ok(chunk) = serde_json::from_str::<Value>(data) else {
            return Vec::new();
        };

        let mut events = Vec::new();

        // Usage may ride along on any chunk, including one with no choices.
        // The latest report wins outright; counts are not additive.
        let has_usage = chunk.get("usage").is_some_and(|usage| !usage.is_null());
        if has_usage {
            let usage = &chunk["usage"];
            if let Some(value) = usage.get("prompt_tokens").and_then(Value::as_u64) {
                self.input_tokens = value;
            }
            if let Some(value) = usage.get("completion_tokens").and_then(Value::as_u64) {
                self.output_tokens = value;
            }
        }

        if !self.message_started && (chunk.get("choices").is_some() || has_usage) {
            if let Some(id) = chunk.get("id").and_then(Value::as_str) {
                self.message_id = format!("msg_{id}");
            }
            if self.model.is_empty() {
                if let Some(model) = chunk.get("model").and_then(Value::as_str) {
                    self.model = model.to_string();
                }
            }
            events.push(self.message_start());
        }

        let Some(choice) = chunk
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
        else {
            return events;
        };

        let delta = choice.get("delta").unwrap_or(&Value::Null);

        if let Some(text) = delta.get("content").and_then(Value::as_str) {
            if self.current_block != BlockType::Text {
                events.extend(self.close_open_block());
                events.push(self.open_block(
                    BlockType::Text,
                    json!({"type": "text", "text": ""}),
                ));
            }
            events.push((
                "content_block_delta",
                json!({
                    "type": "content_block_delta",
                    "index": self.block_index,
                    "delta": {"type": "text_delta", "text": text},
                }),
            ));
        }

        if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
            if self.current_block == BlockType::Text {
                events.extend(self.close_open_block());
            }

            for call in tool_calls {
                // An id marks the start of a new call; argument fragments for
                // the current call arrive without one.
                if let Some(id) = call
                    .get("id")
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
                {
                    events.extend(self.close_open_block());
                    let name = call
                        .get("function")
                        .and_then(|function| function.get("name"))
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    events.push(self.open_block(
                        BlockType::ToolUse,
                        json!({"type": "tool_use", "id": id, "name": name, "input": {}}),
                    ));
                }

                if let Some(arguments) = call
                    .get("function")
                    .and_then(|function| function.get("arguments"))
                    .and_then(Value::as_str)
                    .filter(|arguments| !arguments.is_empty())
                {
                    events.push((
                        "content_block_delta",
                        json!({
                            "type": "content_block_delta",
                            "index": self.block_index,
                            "delta": {"type": "input_json_delta", "partial_json": arguments},
                        }),
                    ));
                }
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            events.extend(self.close_open_block());
            events.push(self.message_delta(map_finish_reason(reason).to_string()));
        }

        events
    }

    /// Finalizes the stream: closes any open block, emits the terminal
    /// `message_delta` (unless one was already driven by a finish_reason)
    /// and `message_stop`. No event of any kind follows.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.done {
            return Vec::new();
        }
        self.done = true;

        let mut events = Vec::new();

        if !self.message_started {
            events.push(self.message_start());
        }

        events.extend(self.close_open_block());

        if self.stop_reason.is_none() {
            events.push(self.message_delta("end_turn".to_string()));
        }

        events.push(("message_stop", json!({"type": "message_stop"})));
        events
    }

    fn message_start(&mut self) -> StreamEvent {
        self.message_started = true;
        (
            "message_start",
            json!({
                "type": "message_start",
                "message": {
                    "id": self.message_id,
                    "type": "message",
                    "role": "assistant",
                    "model": self.model,
                    "content": [],
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": {"input_tokens": self.input_tokens, "output_tokens": 0},
                }
            }),
        )
    }

    fn open_block(&mut self, block: BlockType, content_block: Value) -> StreamEvent {
        self.block_index += 1;
        self.current_block = block;
        (
            "content_block_start",
            json!({
                "type": "content_block_start",
                "index": self.block_index,
                "content_block": content_block,
            }),
        )
    }

    fn close_open_block(&mut self) -> Vec<StreamEvent> {
        if self.current_block == BlockType::None {
            return Vec::new();
        }
        self.current_block = BlockType::None;
        vec![(
            "content_block_stop",
            json!({"type": "content_block_stop", "index": self.block_index}),
        )]
    }

    fn message_delta(&mut self, stop_reason: String) -> StreamEvent {
        let event = (
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": {"stop_reason": stop_reason, "stop_sequence": null},
                "usage": {"output_tokens": self.output_tokens},
            }),
        );
        self.stop_reason = Some(stop_reason);
        event
    }
}

fn sse_frame(event: &str, payload: &Value) -> Bytes {
    Bytes::from(format!("event: {event}\ndata: {payload}\n\n"))
}

/// Adapts a backend OpenAI SSE byte stream into Anthropic SSE frames as they
/// arrive, without buffering the response. `on_done` receives the final
/// (input_tokens, output_tokens) once the stream ends, however it ends.
pub fn transcode_sse(
    upstream: ProviderStream,
    model: String,
    on_done: impl FnOnce(u64, u64) + Send + 'static,
) -> ProviderStream {
    let stream = try_stream! {
        let mut state = StreamState::new(model);
        let mut buffer = String::new();
        let mut failed = false;

        futures_util::pin_mut!(upstream);

        'read: while let Some(chunk) = upstream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(error) => {
                    let payload = json!({
                        "type": "error",
                        "error": {"type": "api_error", "message": error.to_string()},
                    });
                    yield sse_frame("error", &payload);
                    failed = true;
                    break 'read;
                }
            };

            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(position) = buffer.find('\n') {
                let mut line = buffer[..position].to_string();
                buffer.drain(..=position);

                if line.ends_with('\r') {
                    line.pop();
                }

                for (event, payload) in state.step(&line) {
                    yield sse_frame(event, &payload);
                }

                if state.is_done() {
                    break 'read;
                }
            }
        }

        // Upstream ended without a [DONE] sentinel.
        if !failed && !state.is_done() {
            for (event, payload) in state.finish() {
                yield sse_frame(event, &payload);
            }
        }

        let (input_tokens, output_tokens) = state.usage();
        on_done(input_tokens, output_tokens);
    };

    Box::pin(stream)
}
