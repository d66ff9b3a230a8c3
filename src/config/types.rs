// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

use crate::format::WireFormat;

/// Default OpenAI chat path on the backend.
pub const DEFAULT_CHAT_PATH: &str = "/v1/chat/completions";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Parsed and validated gateway config.
#[derive(Debug, Clone)]
pub struct Config {
    /// Contract version. Always "v1".
    pub version: String,
    pub backend: BackendConfig,
    pub tools: ToolsConfig,
    /// Log at `debug` unless `RUST_LOG` says otherwise.
    pub debug: bool,
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Where requests are forwarded and how to talk to it.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL without a trailing slash.
    pub base_url: String,
    /// Backend wire format unless a request names one in `x-backend-format`.
    pub format: WireFormat,
    /// Sent as `Authorization: Bearer ...` when set.
    pub api_key: Option<String>,
    pub chat_path: String,
    pub timeout_ms: Option<u64>,
    /// `HTTP-Referer` header value.
    pub referer: Option<String>,
    /// `X-Title` header value.
    pub title: Option<String>,
}

impl BackendConfig {
    /// Backend endpoint for a chat request in `format`. Ollama payloads with
    /// `messages` go to `/api/chat`, everything else to `/api/generate`.
    pub fn chat_url(&self, format: WireFormat, has_messages: bool) -> String {
        let path = match format {
            WireFormat::OpenAi => self.chat_path.as_str(),
            WireFormat::Ollama if has_messages => "/api/chat",
            WireFormat::Ollama => "/api/generate",
        };
        format!("{}{}", self.base_url, path)
    }
}

// ---------------------------------------------------------------------------
// Tool handling
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ToolsConfig {
    /// Hold a short narrative lead-in ahead of a tool call.
    pub suppress_preface: bool,
    pub reinjection: ReinjectionConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            suppress_preface: true,
            reinjection: ReinjectionConfig::default(),
        }
    }
}

/// When to repeat the tool instructions late in a long conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReinjectionConfig {
    pub enabled: bool,
    pub kind: ReinjectionKind,
    /// Messages since the last system message that trigger reinjection.
    pub message_count: usize,
    /// Estimated tokens (chars / 4) since the last system message.
    pub token_count: usize,
}

impl Default for ReinjectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            kind: ReinjectionKind::Full,
            message_count: 3,
            token_count: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReinjectionKind {
    /// The complete tool instructions.
    Full,
    /// A one-line reminder naming the tools.
    Reminder,
}
