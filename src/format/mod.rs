// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

// Wire formats and format detection
//
// Responsibilities:
// - Name the two wire formats the gateway speaks
// - Decide which format a client request uses (header, then body shape)
// - Decide which format the backend speaks (header override, then config)
// - Field mapping between the two schemas lives in `convert`
// - Tool prompt injection lives in `prompt`

pub mod convert;
pub mod prompt;

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Header a client sets to force its own wire format.
pub const API_FORMAT_HEADER: &str = "x-api-format";
/// Header a client sets to override the configured backend format.
pub const BACKEND_FORMAT_HEADER: &str = "x-backend-format";

/// API wire format: OpenAI chat completions or Ollama generate/chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

impl WireFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            WireFormat::OpenAi => "openai",
            WireFormat::Ollama => "ollama",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(WireFormat::OpenAi),
            "ollama" => Some(WireFormat::Ollama),
            _ => None,
        }
    }

    /// Content type of this format's streaming response.
    pub fn stream_content_type(self) -> &'static str {
        match self {
            WireFormat::OpenAi => "text/event-stream",
            WireFormat::Ollama => "application/x-ndjson",
        }
    }
}

impl std::fmt::Display for WireFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which Ollama endpoint shape a payload follows: `/api/generate` carries
/// text in `response`, `/api/chat` carries it in `message.content`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OllamaShape {
    #[default]
    Generate,
    Chat,
}

impl OllamaShape {
    /// Shape of an Ollama response chunk or request body.
    pub fn of(value: &Value) -> Self {
        if value.get("message").is_some_and(Value::is_object)
            || value.get("messages").is_some_and(Value::is_array)
        {
            OllamaShape::Chat
        } else {
            OllamaShape::Generate
        }
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Fields only Ollama requests carry next to `messages`.
const OLLAMA_ONLY_FIELDS: &[&str] = &["options", "template", "system", "format", "keep_alive"];

/// True for payloads shaped like Ollama requests or responses.
pub fn is_ollama_payload(value: &Value) -> bool {
    value.get("prompt").is_some_and(Value::is_string)
        || value.get("response").is_some_and(Value::is_string)
        || value.get("done").is_some_and(Value::is_boolean)
}

/// True for payloads shaped like OpenAI requests or responses.
pub fn is_openai_payload(value: &Value) -> bool {
    value.get("messages").is_some_and(Value::is_array)
        || value.get("choices").is_some_and(Value::is_array)
}

/// Detect the client's wire format: explicit header first, then body shape,
/// then the route, defaulting to OpenAI.
pub fn detect_request_format(headers: &HeaderMap, body: &Value, path: &str) -> WireFormat {
    if let Some(format) = header_format(headers, API_FORMAT_HEADER) {
        return format;
    }
    if is_ollama_payload(body) {
        return WireFormat::Ollama;
    }
    if body.get("messages").is_some_and(Value::is_array) {
        if OLLAMA_ONLY_FIELDS.iter().any(|f| body.get(*f).is_some()) {
            return WireFormat::Ollama;
        }
        if path.starts_with("/api/") {
            return WireFormat::Ollama;
        }
        return WireFormat::OpenAi;
    }
    if path.starts_with("/api/") {
        return WireFormat::Ollama;
    }
    WireFormat::OpenAi
}

/// Backend format: `x-backend-format` header when valid, else `default`.
pub fn detect_backend_format(headers: &HeaderMap, default: WireFormat) -> WireFormat {
    header_format(headers, BACKEND_FORMAT_HEADER).unwrap_or(default)
}

fn header_format(headers: &HeaderMap, name: &str) -> Option<WireFormat> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(WireFormat::parse)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
