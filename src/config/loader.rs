// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

use crate::format::WireFormat;

use super::error::ConfigError;
use super::interpolation::resolve_variables;
use super::raw;
use super::source::ConfigSource;
use super::types::*;

/// Load and validate a toolshim config from the given source.
///
/// Steps:
/// 1. Read raw YAML from the source
/// 2. Parse into raw deserialization types
/// 3. Validate version and required values
/// 4. Resolve `${VAR}` references in string fields
/// 5. Build the typed Config
pub fn load_config(source: &dyn ConfigSource) -> Result<Config, ConfigError> {
    let raw_yaml = source.load()?;
    let raw: raw::RawConfig = serde_yaml::from_str(&raw_yaml)?;

    if raw.toolshim != "v1" {
        return Err(ConfigError::Validation(format!(
            "unsupported contract version \"{}\", expected \"v1\"",
            raw.toolshim
        )));
    }

    let backend = build_backend_config(raw.backend)?;
    let tools = build_tools_config(raw.tools)?;

    Ok(Config {
        version: raw.toolshim,
        backend,
        tools,
        debug: raw.debug,
    })
}

fn build_backend_config(raw: raw::RawBackendConfig) -> Result<BackendConfig, ConfigError> {
    let base_url = resolve_variables(raw.base_url.trim())?;
    let base_url = base_url.trim().trim_end_matches('/').to_string();
    if base_url.is_empty() {
        return Err(ConfigError::Validation(
            "backend.base_url must not be empty".into(),
        ));
    }
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "backend.base_url \"{base_url}\" must start with http:// or https://"
        )));
    }

    let format = match raw.format.as_deref() {
        None => WireFormat::OpenAi,
        Some(s) => WireFormat::parse(s).ok_or_else(|| {
            ConfigError::Validation(format!(
                "unknown backend.format \"{s}\", expected \"openai\" or \"ollama\""
            ))
        })?,
    };

    let chat_path = match raw.chat_path {
        Some(path) => {
            let path = resolve_variables(&path)?;
            if path.starts_with('/') {
                path
            } else {
                format!("/{path}")
            }
        }
        None => DEFAULT_CHAT_PATH.to_string(),
    };

    if raw.timeout_ms == Some(0) {
        return Err(ConfigError::Validation(
            "backend.timeout_ms must be greater than 0".into(),
        ));
    }

    Ok(BackendConfig {
        base_url,
        format,
        api_key: resolve_optional(raw.api_key)?,
        chat_path,
        timeout_ms: raw.timeout_ms,
        referer: resolve_optional(raw.referer)?,
        title: resolve_optional(raw.title)?,
    })
}

fn build_tools_config(raw: Option<raw::RawToolsConfig>) -> Result<ToolsConfig, ConfigError> {
    let Some(raw) = raw else {
        return Ok(ToolsConfig::default());
    };
    let reinjection = match raw.reinjection {
        None => ReinjectionConfig::default(),
        Some(r) => {
            let kind = match r.kind.as_deref() {
                None | Some("full") => ReinjectionKind::Full,
                Some("reminder") => ReinjectionKind::Reminder,
                Some(other) => {
                    return Err(ConfigError::Validation(format!(
                        "unknown tools.reinjection.kind \"{other}\", expected \"full\" or \"reminder\""
                    )))
                }
            };
            if r.message_count == 0 {
                return Err(ConfigError::Validation(
                    "tools.reinjection.message_count must be at least 1".into(),
                ));
            }
            ReinjectionConfig {
                enabled: r.enabled,
                kind,
                message_count: r.message_count,
                token_count: r.token_count,
            }
        }
    };
    Ok(ToolsConfig {
        suppress_preface: raw.suppress_preface,
        reinjection,
    })
}

/// Resolve an optional string field; blank values count as unset.
fn resolve_optional(value: Option<String>) -> Result<Option<String>, ConfigError> {
    match value {
        None => Ok(None),
        Some(v) => {
            let resolved = resolve_variables(&v)?;
            let trimmed = resolved.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
    }
}
