// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

// Field mapping between the OpenAI and Ollama JSON schemas.
//
// Requests and responses are handled as `serde_json::Value` so that fields
// this module does not know about survive same-format round trips. Nothing
// here looks at XML in text content; tool-call recovery happens in the
// stream processors and the non-streaming handler.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::message::ToolCall;

use super::{OllamaShape, WireFormat};

/// Model name used when a backend chunk does not carry one.
pub const FALLBACK_MODEL: &str = "proxied-backend-model";

// ---------------------------------------------------------------------------
// Identifiers and timestamps
// ---------------------------------------------------------------------------

pub fn completion_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4().simple())
}

pub fn tool_call_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

pub fn rfc3339_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn rfc3339_from_unix(seconds: Option<i64>) -> String {
    seconds
        .and_then(|s| DateTime::<Utc>::from_timestamp(s, 0))
        .map(|d| d.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_else(rfc3339_now)
}

fn unix_from_rfc3339(value: Option<&Value>) -> i64 {
    value
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.timestamp())
        .unwrap_or_else(unix_now)
}

// ---------------------------------------------------------------------------
// Tool call JSON
// ---------------------------------------------------------------------------

/// OpenAI `tool_calls[]` entry; arguments travel as a JSON string.
pub fn openai_tool_call(call: &ToolCall, index: usize) -> Value {
    json!({
        "index": index,
        "id": tool_call_id(),
        "type": "function",
        "function": {
            "name": call.name,
            "arguments": call.arguments_string(),
        }
    })
}

/// Ollama `tool_calls[]` entry; arguments travel as an object.
pub fn ollama_tool_call(call: &ToolCall) -> Value {
    json!({
        "function": {
            "name": call.name,
            "arguments": call.arguments_json(),
        }
    })
}

/// OpenAI tool calls (string arguments) to Ollama tool calls (object arguments).
fn openai_tool_calls_to_ollama(calls: &[Value]) -> Vec<Value> {
    calls
        .iter()
        .map(|tc| {
            let function = tc.get("function");
            let name = function.and_then(|f| f.get("name")).cloned().unwrap_or(Value::Null);
            let arguments = match function.and_then(|f| f.get("arguments")) {
                Some(Value::String(s)) => {
                    serde_json::from_str::<Value>(s).unwrap_or_else(|_| Value::String(s.clone()))
                }
                Some(other) => other.clone(),
                None => json!({}),
            };
            json!({"function": {"name": name, "arguments": arguments}})
        })
        .collect()
}

/// Ollama tool calls (object arguments) to OpenAI tool calls (string arguments).
fn ollama_tool_calls_to_openai(calls: &[Value]) -> Vec<Value> {
    calls
        .iter()
        .enumerate()
        .map(|(index, tc)| {
            let function = tc.get("function");
            let name = function.and_then(|f| f.get("name")).cloned().unwrap_or(Value::Null);
            let arguments = match function.and_then(|f| f.get("arguments")) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => "{}".to_string(),
            };
            json!({
                "index": index,
                "id": tc.get("id").cloned().unwrap_or_else(|| Value::String(tool_call_id())),
                "type": "function",
                "function": {"name": name, "arguments": arguments},
            })
        })
        .collect()
}

fn non_empty_array(value: Option<&Value>) -> Option<&Vec<Value>> {
    value.and_then(Value::as_array).filter(|a| !a.is_empty())
}

/// Flatten OpenAI content-part arrays into plain text.
fn flatten_content(content: &Value) -> Value {
    match content {
        Value::Array(parts) => {
            let text: Vec<&str> = parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect();
            Value::String(text.join("\n"))
        }
        Value::Null => Value::String(String::new()),
        other => other.clone(),
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Convert a request body between formats. Same format is a no-op.
pub fn convert_request(source: WireFormat, target: WireFormat, body: &Value) -> Value {
    match (source, target) {
        (WireFormat::OpenAi, WireFormat::Ollama) => openai_request_to_ollama(body),
        (WireFormat::Ollama, WireFormat::OpenAi) => ollama_request_to_openai(body),
        _ => body.clone(),
    }
}

fn openai_request_to_ollama(body: &Value) -> Value {
    let mut out = Map::new();
    if let Some(model) = body.get("model") {
        out.insert("model".into(), model.clone());
    }

    let messages: Vec<Value> = body
        .get("messages")
        .and_then(Value::as_array)
        .map(|msgs| {
            msgs.iter()
                .map(|m| {
                    let mut msg = Map::new();
                    msg.insert("role".into(), m.get("role").cloned().unwrap_or(json!("user")));
                    msg.insert(
                        "content".into(),
                        flatten_content(m.get("content").unwrap_or(&Value::Null)),
                    );
                    if let Some(calls) = non_empty_array(m.get("tool_calls")) {
                        msg.insert("tool_calls".into(), Value::Array(openai_tool_calls_to_ollama(calls)));
                    }
                    if let Some(id) = m.get("tool_call_id") {
                        msg.insert("tool_call_id".into(), id.clone());
                    }
                    Value::Object(msg)
                })
                .collect()
        })
        .unwrap_or_default();
    out.insert("messages".into(), Value::Array(messages));
    out.insert(
        "stream".into(),
        Value::Bool(body.get("stream").and_then(Value::as_bool).unwrap_or(false)),
    );

    let mut options = Map::new();
    for (from, to) in [("temperature", "temperature"), ("top_p", "top_p"), ("max_tokens", "num_predict")] {
        if let Some(v) = body.get(from) {
            options.insert(to.into(), v.clone());
        }
    }
    if let Some(stop) = body.get("stop") {
        let stop = match stop {
            Value::Array(_) => stop.clone(),
            other => json!([other]),
        };
        options.insert("stop".into(), stop);
    }
    if !options.is_empty() {
        out.insert("options".into(), Value::Object(options));
    }

    if let Some(tools) = body.get("tools") {
        out.insert("tools".into(), tools.clone());
    }
    Value::Object(out)
}

fn ollama_request_to_openai(body: &Value) -> Value {
    let mut out = Map::new();
    if let Some(model) = body.get("model") {
        out.insert("model".into(), model.clone());
    }

    let mut messages = Vec::new();
    if let Some(msgs) = body.get("messages").and_then(Value::as_array) {
        for m in msgs {
            let mut msg = m.as_object().cloned().unwrap_or_default();
            if let Some(calls) = non_empty_array(m.get("tool_calls")) {
                msg.insert("tool_calls".into(), Value::Array(ollama_tool_calls_to_openai(calls)));
            }
            // OpenAI has no per-message images field.
            msg.remove("images");
            messages.push(Value::Object(msg));
        }
    } else {
        if let Some(system) = body.get("system").and_then(Value::as_str) {
            messages.push(json!({"role": "system", "content": system}));
        }
        if let Some(prompt) = body.get("prompt").and_then(Value::as_str) {
            messages.push(json!({"role": "user", "content": prompt}));
        }
    }
    out.insert("messages".into(), Value::Array(messages));
    // Ollama streams unless told otherwise.
    out.insert(
        "stream".into(),
        Value::Bool(body.get("stream").and_then(Value::as_bool).unwrap_or(true)),
    );

    if let Some(options) = body.get("options") {
        for (from, to) in [("temperature", "temperature"), ("top_p", "top_p"), ("num_predict", "max_tokens"), ("stop", "stop")] {
            if let Some(v) = options.get(from) {
                out.insert(to.into(), v.clone());
            }
        }
    }

    if let Some(tools) = body.get("tools") {
        out.insert("tools".into(), tools.clone());
    }
    Value::Object(out)
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Convert a response body or stream chunk between formats, producing
/// `/api/generate`-shaped Ollama output.
pub fn convert_response(
    source: WireFormat,
    target: WireFormat,
    body: &Value,
    is_stream_chunk: bool,
) -> Value {
    convert_response_for(source, target, body, is_stream_chunk, OllamaShape::Generate)
}

/// Convert a response body or stream chunk, choosing the Ollama shape.
pub fn convert_response_for(
    source: WireFormat,
    target: WireFormat,
    body: &Value,
    is_stream_chunk: bool,
    shape: OllamaShape,
) -> Value {
    match (source, target) {
        (WireFormat::OpenAi, WireFormat::Ollama) => openai_response_to_ollama(body, is_stream_chunk, shape),
        (WireFormat::Ollama, WireFormat::OpenAi) => ollama_response_to_openai(body, is_stream_chunk),
        _ => body.clone(),
    }
}

/// Ollama message/line with the text placed per shape.
pub(crate) fn ollama_body(
    model: &str,
    created_at: String,
    shape: OllamaShape,
    text: &str,
    tool_calls: Option<Vec<Value>>,
    done: bool,
) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert("model".into(), json!(model));
    out.insert("created_at".into(), json!(created_at));
    match shape {
        OllamaShape::Generate => {
            out.insert("response".into(), json!(text));
            if let Some(calls) = tool_calls {
                out.insert("tool_calls".into(), Value::Array(calls));
            }
        }
        OllamaShape::Chat => {
            let mut message = Map::new();
            message.insert("role".into(), json!("assistant"));
            message.insert("content".into(), json!(text));
            if let Some(calls) = tool_calls {
                message.insert("tool_calls".into(), Value::Array(calls));
            }
            out.insert("message".into(), Value::Object(message));
        }
    }
    out.insert("done".into(), json!(done));
    out
}

fn openai_response_to_ollama(body: &Value, is_stream_chunk: bool, shape: OllamaShape) -> Value {
    let model = body.get("model").and_then(Value::as_str).unwrap_or(FALLBACK_MODEL);
    let created_at = rfc3339_from_unix(body.get("created").and_then(Value::as_i64));
    let choice = body.pointer("/choices/0");
    let payload = choice.and_then(|c| c.get(if is_stream_chunk { "delta" } else { "message" }));
    let finish_reason = choice
        .and_then(|c| c.get("finish_reason"))
        .and_then(Value::as_str);

    let text = payload
        .and_then(|p| p.get("content"))
        .and_then(Value::as_str)
        .unwrap_or("");
    let tool_calls =
        non_empty_array(payload.and_then(|p| p.get("tool_calls"))).map(|c| openai_tool_calls_to_ollama(c));
    let text = if tool_calls.is_some() { "" } else { text };
    let done = !is_stream_chunk || finish_reason.is_some();

    let mut out = ollama_body(model, created_at, shape, text, tool_calls, done);
    if done {
        if let Some(reason) = finish_reason {
            out.insert("done_reason".into(), json!(reason));
        }
    }
    if let Some(usage) = body.get("usage").filter(|u| u.is_object()) {
        if let Some(n) = usage.get("prompt_tokens") {
            out.insert("prompt_eval_count".into(), n.clone());
        }
        if let Some(n) = usage.get("completion_tokens") {
            out.insert("eval_count".into(), n.clone());
        }
    }
    Value::Object(out)
}

/// Text an Ollama chunk carries, from `response` or `message.content`.
pub(crate) fn ollama_text(body: &Value) -> Option<&str> {
    body.get("response")
        .and_then(Value::as_str)
        .or_else(|| body.pointer("/message/content").and_then(Value::as_str))
}

fn ollama_response_to_openai(body: &Value, is_stream_chunk: bool) -> Value {
    let model = body.get("model").and_then(Value::as_str).unwrap_or(FALLBACK_MODEL);
    let created = unix_from_rfc3339(body.get("created_at"));
    let text = ollama_text(body).unwrap_or("");
    let done = body.get("done").and_then(Value::as_bool).unwrap_or(!is_stream_chunk);
    let tool_calls = non_empty_array(body.get("tool_calls"))
        .or_else(|| non_empty_array(body.pointer("/message/tool_calls")))
        .map(|c| ollama_tool_calls_to_openai(c));

    let finish_reason = if tool_calls.is_some() {
        json!("tool_calls")
    } else if done {
        json!(body.get("done_reason").and_then(Value::as_str).unwrap_or("stop"))
    } else {
        Value::Null
    };

    let mut out = Map::new();
    out.insert("id".into(), json!(completion_id()));
    out.insert("created".into(), json!(created));
    out.insert("model".into(), json!(model));

    let choice = if is_stream_chunk {
        out.insert("object".into(), json!("chat.completion.chunk"));
        let mut delta = Map::new();
        if !text.is_empty() {
            delta.insert("content".into(), json!(text));
        }
        if let Some(calls) = tool_calls {
            delta.insert("tool_calls".into(), Value::Array(calls));
        }
        json!({"index": 0, "delta": delta, "finish_reason": finish_reason})
    } else {
        out.insert("object".into(), json!("chat.completion"));
        let mut message = Map::new();
        message.insert("role".into(), json!("assistant"));
        match tool_calls {
            Some(calls) => {
                message.insert("content".into(), Value::Null);
                message.insert("tool_calls".into(), Value::Array(calls));
            }
            None => {
                message.insert("content".into(), json!(text));
            }
        }
        json!({"index": 0, "message": message, "finish_reason": finish_reason})
    };
    out.insert("choices".into(), json!([choice]));

    if done {
        let prompt = body.get("prompt_eval_count").and_then(Value::as_u64);
        let completion = body.get("eval_count").and_then(Value::as_u64);
        if prompt.is_some() || completion.is_some() {
            let (p, c) = (prompt.unwrap_or(0), completion.unwrap_or(0));
            out.insert(
                "usage".into(),
                json!({"prompt_tokens": p, "completion_tokens": c, "total_tokens": p + c}),
            );
        }
    }
    Value::Object(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
