// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

// Raw YAML deserialization types (internal)
//
// Kept apart from the public Config structs so that `${VAR}` references
// can be resolved and enum-like strings checked before anything typed is
// built.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub toolshim: String,
    pub backend: RawBackendConfig,
    #[serde(default)]
    pub tools: Option<RawToolsConfig>,
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawBackendConfig {
    pub base_url: String,
    pub format: Option<String>,
    pub api_key: Option<String>,
    pub chat_path: Option<String>,
    pub timeout_ms: Option<u64>,
    pub referer: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawToolsConfig {
    #[serde(default = "default_true")]
    pub suppress_preface: bool,
    pub reinjection: Option<RawReinjectionConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawReinjectionConfig {
    #[serde(default)]
    pub enabled: bool,
    pub kind: Option<String>,
    #[serde(default = "default_message_count")]
    pub message_count: usize,
    #[serde(default = "default_token_count")]
    pub token_count: usize,
}

fn default_true() -> bool {
    true
}

fn default_message_count() -> usize {
    3
}

fn default_token_count() -> usize {
    1000
}
