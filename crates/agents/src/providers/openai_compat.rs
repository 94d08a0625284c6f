//! Shared helpers for OpenAI-compatible chat completions.
//!
//! Request building and SSE parsing for any server that speaks the
//! `/chat/completions` dialect: OpenAI, DashScope compatible mode, vLLM,
//! Ollama and similar local servers.

use serde_json::{Value, json};

use crate::model::{ChatMessage, Completion, StreamEvent, Usage};

/// Wire messages, with the system prompt (if any) first.
pub fn to_openai_messages(messages: &[ChatMessage], system_prompt: Option<&str>) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    if let Some(system) = system_prompt.filter(|s| !s.is_empty()) {
        out.push(json!({"role": "system", "content": system}));
    }
    out.extend(
        messages
            .iter()
            .map(|m| json!({"role": m.role.as_str(), "content": m.content})),
    );
    out
}

fn parse_usage(value: &Value) -> Usage {
    Usage {
        input_tokens: value["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: value["completion_tokens"].as_u64().unwrap_or(0) as u32,
    }
}

/// Parse a non-streaming response body. `None` when there is no text.
pub fn parse_completion(body: &Value) -> Option<Completion> {
    let text = body["choices"][0]["message"]["content"].as_str()?;
    Some(Completion {
        text: text.to_string(),
        usage: body.get("usage").map(parse_usage).unwrap_or_default(),
    })
}

/// Token counts seen so far in a stream.
#[derive(Default)]
pub struct StreamingState {
    pub usage: Usage,
}

/// Result of processing a single SSE line.
pub enum SseLineResult {
    /// No actionable event (empty line, non-data prefix)
    Skip,
    /// Stream is done
    Done,
    /// Events to yield
    Events(Vec<StreamEvent>),
}

/// Process a single SSE `data:` payload and return any events to yield.
pub fn process_openai_sse_line(data: &str, state: &mut StreamingState) -> SseLineResult {
    if data == "[DONE]" {
        return SseLineResult::Done;
    }

    let Ok(evt) = serde_json::from_str::<Value>(data) else {
        return SseLineResult::Skip;
    };

    if let Some(message) = evt["error"]["message"].as_str() {
        return SseLineResult::Events(vec![StreamEvent::Error(message.to_string())]);
    }

    // Usage chunk (sent with stream_options.include_usage)
    if let Some(u) = evt.get("usage").filter(|u| !u.is_null()) {
        state.usage = parse_usage(u);
    }

    match evt["choices"][0]["delta"]["content"].as_str() {
        Some(content) if !content.is_empty() => {
            SseLineResult::Events(vec![StreamEvent::Delta(content.to_string())])
        },
        _ => SseLineResult::Skip,
    }
}

/// The terminal event once the stream is over.
pub fn finalize_stream(state: &StreamingState) -> StreamEvent {
    StreamEvent::Done(state.usage)
}

/// Splits a byte stream into SSE `data:` payloads, buffering partial lines.
///
/// Bytes are only decoded once a whole line has arrived, so a multi-byte
/// character split across network chunks stays intact.
#[derive(Default)]
pub struct SseLineBuffer {
    buf: Vec<u8>,
}

impl SseLineBuffer {
    /// Feed raw bytes; returns the complete `data:` payloads they finish.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}
