// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

// Cross-format streaming: OpenAI SSE to Ollama ndjson and back.
//
// Every chunk is reshaped with the response converters while the
// interceptor watches its text. `[DONE]` and `done: true` are translated
// into each other. Synthesized OpenAI chunks share one completion id for
// the whole response.

use std::sync::Arc;

use serde_json::{json, Value};

use super::heuristics::PrefaceHeuristic;
use super::intercept::{Intercepted, Interception, ToolCallInterceptor};
use super::json_repair::JsonRepairBuffer;
use super::ollama::clear_text;
use super::sse::{
    ndjson_line, ollama_error_line, openai_error_frame, parse_sse_line, sse_frame, take_line,
    ChunkIdentity, LineIdentity, SseLine, DONE_FRAME,
};
use super::types::{ResponseSink, StreamError, Utf8Decoder};
use crate::format::convert::{convert_response_for, ollama_text};
use crate::format::{OllamaShape, WireFormat};

pub struct CrossFormatProcessor {
    source: WireFormat,
    target: WireFormat,
    interceptor: ToolCallInterceptor,
    decoder: Utf8Decoder,
    lines: String,
    repair: JsonRepairBuffer,
    chunk_identity: ChunkIdentity,
    line_identity: LineIdentity,
    done_written: bool,
    pub(super) sink: ResponseSink,
}

impl CrossFormatProcessor {
    pub fn new(
        source: WireFormat,
        target: WireFormat,
        known_tools: Vec<String>,
        preface: Arc<dyn PrefaceHeuristic>,
        shape: OllamaShape,
    ) -> Self {
        Self {
            source,
            target,
            interceptor: ToolCallInterceptor::new(known_tools, preface),
            decoder: Utf8Decoder::new(),
            lines: String::new(),
            repair: JsonRepairBuffer::new(),
            chunk_identity: ChunkIdentity::default(),
            line_identity: LineIdentity::new(shape),
            done_written: false,
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
        let held = self.interceptor.flush_text();
        let message = err.to_string();
        match self.target {
            WireFormat::OpenAi => {
                if let Some(text) = held {
                    self.sink.write(sse_frame(&self.chunk_identity.content_chunk(&text)));
                }
                self.sink.write(openai_error_frame(&message));
            }
            WireFormat::Ollama => {
                if let Some(text) = held {
                    self.sink.write(ndjson_line(&self.line_identity.text_line(&text)));
                }
                self.sink.write(ollama_error_line(&message));
            }
        }
        self.sink.end();
    }

    fn handle_line(&mut self, line: &str) {
        match self.source {
            WireFormat::OpenAi => match parse_sse_line(line) {
                SseLine::Blank | SseLine::Field(_) => {}
                SseLine::Done => self.finish_stream(),
                SseLine::Data(data) | SseLine::Raw(data) => {
                    if let Some(chunk) = self.repair.push(data) {
                        self.handle_openai_chunk(chunk);
                    }
                }
            },
            WireFormat::Ollama => {
                let line = line.trim();
                if line.is_empty() {
                    return;
                }
                match serde_json::from_str::<Value>(line) {
                    Ok(value) => self.handle_ollama_line(value),
                    Err(e) => {
                        tracing::warn!(error = %e, bytes = line.len(), "dropping unparseable ndjson line");
                    }
                }
            }
        }
    }

    /// OpenAI chunk in, Ollama line out.
    fn handle_openai_chunk(&mut self, mut chunk: Value) {
        self.line_identity
            .observe_model(chunk.get("model").and_then(Value::as_str));
        let Some(choice) = chunk.pointer("/choices/0") else {
            tracing::debug!("skipping chunk without choices");
            return;
        };
        let finishing = choice.get("finish_reason").is_some_and(|r| !r.is_null());
        let content = choice
            .pointer("/delta/content")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        let absorbed = match content {
            Some(content) => self.intercept(&content),
            None => false,
        };
        if self.sink.is_closed() {
            return;
        }
        if finishing && self.interceptor.is_buffering() {
            let items = self.interceptor.finish();
            self.emit(items);
            if self.sink.is_closed() {
                return;
            }
        }
        if absorbed {
            if !finishing {
                return;
            }
            if let Some(delta) = chunk
                .pointer_mut("/choices/0/delta")
                .and_then(Value::as_object_mut)
            {
                delta.remove("content");
            }
        }

        let converted = convert_response_for(
            WireFormat::OpenAi,
            WireFormat::Ollama,
            &chunk,
            true,
            self.line_identity.shape,
        );
        if converted.get("done").and_then(Value::as_bool) == Some(true) {
            self.done_written = true;
        }
        self.sink.write(ndjson_line(&converted));
    }

    /// Ollama line in, OpenAI chunk out.
    fn handle_ollama_line(&mut self, mut value: Value) {
        self.chunk_identity
            .observe_model(value.get("model").and_then(Value::as_str));
        let done = value.get("done").and_then(Value::as_bool).unwrap_or(false);
        let text = ollama_text(&value)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        let absorbed = match text {
            Some(text) => self.intercept(&text),
            None => false,
        };
        if self.sink.is_closed() {
            return;
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
            self.write_openai_chunk(&value);
            self.sink.write(DONE_FRAME);
            self.sink.end();
            return;
        }
        if !absorbed {
            self.write_openai_chunk(&value);
        }
    }

    fn write_openai_chunk(&mut self, ollama: &Value) {
        let mut converted = convert_response_for(
            WireFormat::Ollama,
            WireFormat::OpenAi,
            ollama,
            true,
            OllamaShape::default(),
        );
        converted["id"] = json!(self.chunk_identity.id);
        self.sink.write(sse_frame(&converted));
    }

    /// Run text through the interceptor. True when it was absorbed.
    fn intercept(&mut self, text: &str) -> bool {
        match self.interceptor.push(text) {
            Interception::PassThrough => false,
            Interception::Absorbed(items) => {
                self.emit(items);
                true
            }
        }
    }

    fn emit(&mut self, items: Vec<Intercepted>) {
        for item in items {
            match (item, self.target) {
                (Intercepted::Text(text), WireFormat::OpenAi) => {
                    self.sink.write(sse_frame(&self.chunk_identity.content_chunk(&text)));
                }
                (Intercepted::Text(text), WireFormat::Ollama) => {
                    self.sink.write(ndjson_line(&self.line_identity.text_line(&text)));
                }
                (Intercepted::ToolCall(call), WireFormat::OpenAi) => {
                    for chunk in self.chunk_identity.tool_call_chunks(&call) {
                        self.sink.write(sse_frame(&chunk));
                    }
                    self.sink.write(DONE_FRAME);
                    self.sink.end();
                    tracing::info!(tool = %call.name, "tool call emitted, closing stream");
                    return;
                }
                (Intercepted::ToolCall(call), WireFormat::Ollama) => {
                    self.sink.write(ndjson_line(&self.line_identity.tool_call_line(&call)));
                    self.sink.write(ndjson_line(&self.line_identity.done_line("stop")));
                    self.done_written = true;
                    self.sink.end();
                    tracing::info!(tool = %call.name, "tool call emitted, closing stream");
                    return;
                }
            }
        }
    }

    /// Source terminal signal or end of input.
    fn finish_stream(&mut self) {
        let items = self.interceptor.finish();
        self.emit(items);
        if self.sink.is_closed() {
            return;
        }
        match self.target {
            WireFormat::OpenAi => {
                self.sink
                    .write(sse_frame(&self.chunk_identity.finish_chunk("stop")));
                self.sink.write(DONE_FRAME);
            }
            WireFormat::Ollama => {
                if !self.done_written {
                    self.sink
                        .write(ndjson_line(&self.line_identity.done_line("stop")));
                    self.done_written = true;
                }
            }
        }
        self.sink.end();
    }
}
