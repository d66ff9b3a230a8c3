// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

// OpenAI SSE in, OpenAI SSE out.
//
// Content deltas run through the interceptor. Everything else is forwarded
// as it arrives. A resolved tool call is sent as the three-chunk tool call
// sequence followed by `[DONE]`, which ends the response.

use std::sync::Arc;

use serde_json::Value;

use super::heuristics::PrefaceHeuristic;
use super::intercept::{Intercepted, Interception, ToolCallInterceptor};
use super::json_repair::JsonRepairBuffer;
use super::sse::{
    openai_error_frame, parse_sse_line, sse_frame, take_line, ChunkIdentity, SseLine, DONE_FRAME,
};
use super::types::{ResponseSink, StreamError, Utf8Decoder};

pub struct OpenAiProcessor {
    interceptor: ToolCallInterceptor,
    decoder: Utf8Decoder,
    lines: String,
    repair: JsonRepairBuffer,
    identity: ChunkIdentity,
    pub(super) sink: ResponseSink,
}

impl OpenAiProcessor {
    pub fn new(known_tools: Vec<String>, preface: Arc<dyn PrefaceHeuristic>) -> Self {
        Self {
            interceptor: ToolCallInterceptor::new(known_tools, preface),
            decoder: Utf8Decoder::new(),
            lines: String::new(),
            repair: JsonRepairBuffer::new(),
            identity: ChunkIdentity::default(),
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
        if !rest.trim().is_empty() {
            self.handle_line(&rest);
        }
        if self.sink.is_closed() {
            return;
        }
        self.repair.finish();
        self.finish_stream();
    }

    pub fn on_error(&mut self, err: &StreamError) {
        if self.sink.is_closed() {
            return;
        }
        tracing::warn!(error = %err, "backend stream failed");
        if let Some(text) = self.interceptor.flush_text() {
            self.sink.write(sse_frame(&self.identity.content_chunk(&text)));
        }
        self.sink.write(openai_error_frame(&err.to_string()));
        self.sink.end();
    }

    fn handle_line(&mut self, line: &str) {
        match parse_sse_line(line) {
            SseLine::Blank => {}
            SseLine::Done => self.finish_stream(),
            SseLine::Field(field) => self.sink.write(format!("{field}\n")),
            SseLine::Data(data) | SseLine::Raw(data) => {
                if let Some(chunk) = self.repair.push(data) {
                    self.handle_chunk(chunk);
                }
            }
        }
    }

    fn handle_chunk(&mut self, mut chunk: Value) {
        self.identity.observe(&chunk);
        let Some(choice) = chunk.pointer("/choices/0") else {
            // Usage-only and other choice-less chunks.
            self.sink.write(sse_frame(&chunk));
            return;
        };
        let finishing = choice.get("finish_reason").is_some_and(|r| !r.is_null());
        let content = choice
            .pointer("/delta/content")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        let mut absorbed = false;
        if let Some(content) = content {
            if let Interception::Absorbed(items) = self.interceptor.push(&content) {
                absorbed = true;
                self.emit(items);
                if self.sink.is_closed() {
                    return;
                }
            }
        }
        if finishing && self.interceptor.is_buffering() {
            let items = self.interceptor.finish();
            self.emit(items);
            if self.sink.is_closed() {
                return;
            }
        }

        if !absorbed {
            self.sink.write(sse_frame(&chunk));
            return;
        }
        // Keep whatever else the chunk carried (role, finish_reason).
        let delta_left = match chunk.pointer_mut("/choices/0/delta").and_then(Value::as_object_mut) {
            Some(delta) => {
                delta.remove("content");
                !delta.is_empty()
            }
            None => false,
        };
        if finishing || delta_left {
            self.sink.write(sse_frame(&chunk));
        }
    }

    fn emit(&mut self, items: Vec<Intercepted>) {
        for item in items {
            match item {
                Intercepted::Text(text) => {
                    self.sink.write(sse_frame(&self.identity.content_chunk(&text)));
                }
                Intercepted::ToolCall(call) => {
                    for chunk in self.identity.tool_call_chunks(&call) {
                        self.sink.write(sse_frame(&chunk));
                    }
                    self.sink.write(DONE_FRAME);
                    self.sink.end();
                    tracing::info!(tool = %call.name, "tool call emitted, closing stream");
                    return;
                }
            }
        }
    }

    /// `[DONE]` or end of input: settle anything held, then terminate.
    fn finish_stream(&mut self) {
        let items = self.interceptor.finish();
        self.emit(items);
        if self.sink.is_closed() {
            return;
        }
        self.sink.write(DONE_FRAME);
        self.sink.end();
    }
}
