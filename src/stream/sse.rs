// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

// Wire framing for both streaming formats
//
// SSE lines in, `data:` frames and ndjson lines out, plus the chunk
// builders used when a processor synthesizes output of its own.

use bytes::Bytes;
use serde_json::{json, Value};

use crate::format::convert::{self, ollama_body, openai_tool_call};
use crate::format::OllamaShape;
use crate::message::ToolCall;

pub const DONE_SENTINEL: &str = "[DONE]";
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Error code carried by stream error frames.
pub const STREAM_ERROR_CODE: &str = "STREAM_ERROR";

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// One line of an SSE body, without its line terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseLine<'a> {
    Blank,
    Done,
    /// Payload of a `data:` line.
    Data(&'a str),
    /// `:` comments and `event:`/`id:`/`retry:` fields.
    Field(&'a str),
    /// Anything else, typically a raw JSON fragment.
    Raw(&'a str),
}

pub fn parse_sse_line(line: &str) -> SseLine<'_> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim().is_empty() {
        return SseLine::Blank;
    }
    if let Some(data) = line.strip_prefix("data:") {
        let data = data.trim();
        if data == DONE_SENTINEL {
            return SseLine::Done;
        }
        return SseLine::Data(data);
    }
    if line.starts_with(':')
        || ["event:", "id:", "retry:"]
            .iter()
            .any(|field| line.starts_with(field))
    {
        return SseLine::Field(line);
    }
    SseLine::Raw(line)
}

/// Pop the next complete `\n`-terminated line off `buffer`.
pub fn take_line(buffer: &mut String) -> Option<String> {
    let newline = buffer.find('\n')?;
    let mut line: String = buffer.drain(..=newline).collect();
    line.pop();
    if line.ends_with('\r') {
        line.pop();
    }
    Some(line)
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

pub fn sse_frame(value: &Value) -> Bytes {
    Bytes::from(format!("data: {value}\n\n"))
}

pub fn ndjson_line(value: &Value) -> Bytes {
    Bytes::from(format!("{value}\n"))
}

pub fn openai_error_frame(message: &str) -> Bytes {
    sse_frame(&json!({
        "error": {
            "message": message,
            "type": "proxy_stream_error",
            "code": STREAM_ERROR_CODE,
        }
    }))
}

pub fn ollama_error_line(message: &str) -> Bytes {
    ndjson_line(&json!({
        "error": message,
        "code": STREAM_ERROR_CODE,
        "done": true,
    }))
}

// ---------------------------------------------------------------------------
// Synthesized OpenAI chunks
// ---------------------------------------------------------------------------

/// Identity stamped on chunks a processor synthesizes for one response.
#[derive(Debug, Clone)]
pub struct ChunkIdentity {
    pub id: String,
    pub model: String,
    pub created: i64,
}

impl Default for ChunkIdentity {
    fn default() -> Self {
        Self {
            id: convert::completion_id(),
            model: convert::FALLBACK_MODEL.to_string(),
            created: convert::unix_now(),
        }
    }
}

impl ChunkIdentity {
    /// Adopt the id and model of an upstream OpenAI chunk.
    pub fn observe(&mut self, chunk: &Value) {
        if let Some(id) = chunk.get("id").and_then(Value::as_str) {
            self.id = id.to_string();
        }
        if let Some(model) = chunk.get("model").and_then(Value::as_str) {
            self.model = model.to_string();
        }
        if let Some(created) = chunk.get("created").and_then(Value::as_i64) {
            self.created = created;
        }
    }

    pub fn observe_model(&mut self, model: Option<&str>) {
        if let Some(model) = model {
            self.model = model.to_string();
        }
    }

    fn chunk(&self, delta: Value, finish_reason: Value) -> Value {
        json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{"index": 0, "delta": delta, "finish_reason": finish_reason}],
        })
    }

    pub fn content_chunk(&self, text: &str) -> Value {
        self.chunk(json!({"content": text}), Value::Null)
    }

    pub fn finish_chunk(&self, reason: &str) -> Value {
        self.chunk(json!({}), json!(reason))
    }

    /// The three chunks announcing one tool call: assistant role, the call
    /// itself with a fresh id, then `finish_reason: tool_calls`.
    pub fn tool_call_chunks(&self, call: &ToolCall) -> [Value; 3] {
        [
            self.chunk(json!({"role": "assistant", "content": null}), Value::Null),
            self.chunk(json!({"tool_calls": [openai_tool_call(call, 0)]}), Value::Null),
            self.finish_chunk("tool_calls"),
        ]
    }
}

// ---------------------------------------------------------------------------
// Synthesized Ollama lines
// ---------------------------------------------------------------------------

/// Identity stamped on Ollama lines a processor synthesizes.
#[derive(Debug, Clone)]
pub struct LineIdentity {
    pub model: String,
    pub shape: OllamaShape,
}

impl LineIdentity {
    pub fn new(shape: OllamaShape) -> Self {
        Self {
            model: convert::FALLBACK_MODEL.to_string(),
            shape,
        }
    }

    pub fn observe(&mut self, line: &Value) {
        if let Some(model) = line.get("model").and_then(Value::as_str) {
            self.model = model.to_string();
        }
        if line.get("message").is_some_and(Value::is_object) {
            self.shape = OllamaShape::Chat;
        }
    }

    pub fn observe_model(&mut self, model: Option<&str>) {
        if let Some(model) = model {
            self.model = model.to_string();
        }
    }

    pub fn text_line(&self, text: &str) -> Value {
        Value::Object(ollama_body(
            &self.model,
            convert::rfc3339_now(),
            self.shape,
            text,
            None,
            false,
        ))
    }

    pub fn tool_call_line(&self, call: &ToolCall) -> Value {
        Value::Object(ollama_body(
            &self.model,
            convert::rfc3339_now(),
            self.shape,
            "",
            Some(vec![convert::ollama_tool_call(call)]),
            false,
        ))
    }

    pub fn done_line(&self, reason: &str) -> Value {
        let mut body = ollama_body(
            &self.model,
            convert::rfc3339_now(),
            self.shape,
            "",
            None,
            true,
        );
        body.insert("done_reason".into(), json!(reason));
        Value::Object(body)
    }
}
