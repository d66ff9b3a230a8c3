// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

// Incremental JSON reassembly for OpenAI stream payloads.
//
// Some backends split one chunk object across several `data:` lines or
// emit bare fragments. Fragments accumulate until they parse, either as
// they are or after restoring a known chunk prefix that was cut off.

use serde_json::Value;

/// Accumulated fragments beyond this are abandoned.
pub const MAX_REPAIR_BYTES: usize = 1024 * 1024;

/// Leading text of OpenAI chunk objects. A fragment that starts with a
/// suffix of one of these is completed by prepending the rest.
const CHUNK_PREFIXES: &[&str] = &[
    r#"{"object":"chat.completion.chunk""#,
    r#"{"id":"fragment","object""#,
    r#"{"model":"#,
];

/// Shortest suffix worth matching, to avoid completing on stray punctuation.
const MIN_SUFFIX: usize = 3;

#[derive(Debug, Default)]
pub struct JsonRepairBuffer {
    buffer: String,
}

impl JsonRepairBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Add a fragment. Returns a value once the accumulated text parses.
    pub fn push(&mut self, fragment: &str) -> Option<Value> {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return None;
        }

        // A fragment that stands on its own supersedes stale leftovers.
        if let Ok(value) = serde_json::from_str::<Value>(fragment) {
            if !self.buffer.is_empty() {
                tracing::debug!(
                    bytes = self.buffer.len(),
                    "dropping unparsed fragment superseded by complete chunk"
                );
                self.buffer.clear();
            }
            return Some(value);
        }

        self.buffer.push_str(fragment);
        if let Ok(value) = serde_json::from_str::<Value>(&self.buffer) {
            self.buffer.clear();
            return Some(value);
        }
        if let Some(prefix) = missing_prefix(&self.buffer) {
            let candidate = format!("{prefix}{}", self.buffer);
            if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
                tracing::debug!(prefix, "repaired truncated chunk");
                self.buffer.clear();
                return Some(value);
            }
        }

        if self.buffer.len() > MAX_REPAIR_BYTES {
            tracing::warn!(
                bytes = self.buffer.len(),
                "discarding unparseable stream fragment"
            );
            self.buffer.clear();
        } else {
            tracing::trace!(bytes = self.buffer.len(), "incomplete chunk, waiting for more");
        }
        None
    }

    /// End of stream: leftovers are discarded with a warning.
    pub fn finish(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let preview: String = self.buffer.chars().take(50).collect();
        tracing::warn!(
            bytes = self.buffer.len(),
            preview = %preview,
            "discarding incomplete chunk at end of stream"
        );
        self.buffer.clear();
    }
}

fn missing_prefix(fragment: &str) -> Option<&'static str> {
    CHUNK_PREFIXES.iter().find_map(|template| {
        (MIN_SUFFIX..template.len())
            .rev()
            .map(|len| template.len() - len)
            .find(|&cut| fragment.starts_with(&template[cut..]))
            .map(|cut| &template[..cut])
    })
}
