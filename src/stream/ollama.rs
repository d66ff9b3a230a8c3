// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

// Ollama ndjson in, Ollama ndjson out.
//
// Same interception as the OpenAI processor, applied to the `response`
// (generate) or `message.content` (chat) text of each line. A resolved
// tool call becomes one `tool_calls` line with empty text followed by a
// `done: true` line.

use std::sync::Arc;

use serde_json::Value;

use super::heuristics::PrefaceHeuristic;
use super::intercept::{Intercepted, Interception, ToolCallInterceptor};
use super::sse::{ndjson_line, ollama_error_line, take_line, LineIdentity};
use super::types::{ResponseSink, StreamError, Utf8Decoder};
use crate::format::convert::ollama_text;
use crate::format::OllamaShape;

pub struct OllamaProcessor {
    interceptor: ToolCallInterceptor,
    decoder: Utf8Decoder,
    lines: String,
    identity: LineIdentity,
    pub(super) sink: ResponseSink,
}

impl OllamaProcessor {
    pub fn new(
        known_tools: Vec<String>,
        preface: Arc<dyn PrefaceHeuristic>,
        shape: OllamaShape,
    ) -> Self {
        Self {
            interceptor: ToolCallInterceptor::new(known_tools, preface),
            decoder: Utf8Decoder::new(),
            lines: String::new(),
            identity: LineIdentity::new(shape),
            sink: ResponseSink::new(),
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        if self.sink.is_closed() {
            return;
        }
        let text = self.decoder.decode(chunk);
        self.lines.push_str(&text);
        while let Some(line) = take_line(&mut self.lines) {
            self.handle_line(&line);
            if self.sink.is_closed() {
                return;
            }
        }
    }

    pub fn end(&mut self) {
        if self.sink.is_closed() {
            return;
        }
        let tail = self.decoder.finish();
        self.lines.push_str(&tail);
        let rest = std::mem::take(&mut self.lines);
        self.handle_line(&rest);
        if self.sink.is_closed() {
            return;
        }
        // Backend stopped without a done line.
        let items = self.interceptor.finish();
        self.emit(items);
        if !self.sink.is_closed() {
            self.sink.write(ndjson_line(&self.identity.done_line("stop")));
            self.sink.end();
        }
    }

    pub fn on_error(&mut self, err: &StreamError) {
        if self.sink.is_closed() {
            return;
        }
        tracing::warn!(error = %err, "backend stream failed");
        if let Some(text) = self.interceptor.flush_text() {
            self.sink.write(ndjson_line(&self.identity.text_line(&text)));
        }
        self.sink.write(ollama_error_line(&err.to_string()));
        self.sink.end();
    }

    fn handle_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let Ok(mut value) = serde_json::from_str::<Value>(line) else {
            tracing::warn!(bytes = line.len(), "unparseable ndjson line forwarded as is");
            self.sink.write(format!("{line}\n"));
            return;
        };
        self.identity.observe(&value);
        let done = value.get("done").and_then(Value::as_bool).unwrap_or(false);
        let text = ollama_text(&value)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        let mut absorbed = false;
        if let Some(text) = text {
            if let Interception::Absorbed(items) = self.interceptor.push(&text) {
                absorbed = true;
                self.emit(items);
                if self.sink.is_closed() {
                    return;
                }
            }
        }

        if done {
            let items = self.interceptor.finish();
            self.emit(items);
            if self.sink.is_closed() {
                return;
            }
            if absorbed {
                clear_text(&mut value);
            }
            self.sink.write(ndjson_line(&value));
            self.sink.end();
            return;
        }
        if !absorbed {
            self.sink.write(format!("{line}\n"));
        }
    }

    fn emit(&mut self, items: Vec<Intercepted>) {
        for item in items {
            match item {
                Intercepted::Text(text) => {
                    self.sink.write(ndjson_line(&self.identity.text_line(&text)));
                }
                Intercepted::ToolCall(call) => {
                    self.sink.write(ndjson_line(&self.identity.tool_call_line(&call)));
                    self.sink.write(ndjson_line(&self.identity.done_line("stop")));
                    self.sink.end();
                    tracing::info!(tool = %call.name, "tool call emitted, closing stream");
                    return;
                }
            }
        }
    }
}

/// Blank the text of an Ollama line whose content was already emitted.
pub(super) fn clear_text(value: &mut Value) {
    if value.get("response").is_some() {
        value["response"] = Value::String(String::new());
    }
    if let Some(message) = value.get_mut("message").and_then(Value::as_object_mut) {
        message.insert("content".into(), Value::String(String::new()));
    }
}
