// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

// Tool call representation shared by the extractor, the stream processors
// and the non-streaming response handler.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Argument values
// ---------------------------------------------------------------------------

/// Typed value of a single tool-call parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentValue {
    String(String),
    Number(f64),
    Bool(bool),
}

impl ArgumentValue {
    /// Coerce raw parameter text.
    ///
    /// `true`/`false` (any case, surrounding whitespace ignored) become
    /// booleans, text that parses fully as a finite number becomes a number,
    /// everything else is kept verbatim.
    pub fn coerce(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("true") {
            return Self::Bool(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Self::Bool(false);
        }
        if !trimmed.is_empty() {
            if let Ok(n) = trimmed.parse::<f64>() {
                if n.is_finite() {
                    return Self::Number(n);
                }
            }
        }
        Self::String(raw.to_string())
    }

    /// JSON form. Integral numbers are emitted as JSON integers.
    pub fn to_json(&self) -> Value {
        match self {
            Self::String(s) => Value::String(s.clone()),
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
                    Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                }
            }
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for ArgumentValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tool call
// ---------------------------------------------------------------------------

/// A tool invocation recovered from model output.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub arguments: BTreeMap<String, ArgumentValue>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: BTreeMap::new(),
        }
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: ArgumentValue) -> Self {
        self.arguments.insert(key.into(), value);
        self
    }

    /// Arguments as a JSON object (Ollama carries them this way).
    pub fn arguments_json(&self) -> Value {
        let map: Map<String, Value> = self
            .arguments
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        Value::Object(map)
    }

    /// Arguments serialized to a JSON string (OpenAI carries them this way).
    pub fn arguments_string(&self) -> String {
        self.arguments_json().to_string()
    }

    /// Render back to the XML form models are prompted to emit.
    pub fn to_xml(&self) -> String {
        let mut out = format!("<{}>\n", self.name);
        for (key, value) in &self.arguments {
            let text = match value {
                ArgumentValue::String(s) => escape_xml(s),
                ArgumentValue::Number(_) => value.to_json().to_string(),
                ArgumentValue::Bool(b) => b.to_string(),
            };
            out.push_str(&format!("<{key}>{text}</{key}>\n"));
        }
        out.push_str(&format!("</{}>", self.name));
        out
    }

    /// Build from a JSON arguments object. Nested values are kept as their
    /// JSON text.
    pub fn from_json_arguments(name: &str, arguments: &Value) -> Self {
        let mut call = Self::new(name);
        if let Value::Object(map) = arguments {
            for (key, value) in map {
                let arg = match value {
                    Value::String(s) => ArgumentValue::String(s.clone()),
                    Value::Bool(b) => ArgumentValue::Bool(*b),
                    Value::Number(n) => n
                        .as_f64()
                        .map(ArgumentValue::Number)
                        .unwrap_or_else(|| ArgumentValue::String(n.to_string())),
                    other => ArgumentValue::String(other.to_string()),
                };
                call.arguments.insert(key.clone(), arg);
            }
        }
        call
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
