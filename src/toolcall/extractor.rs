// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

// XML tool-call extraction.
//
// Turns text believed to hold one complete tool invocation into a
// `ToolCall`. Model output is rarely clean XML, so the pipeline peels off
// code fences, comments, XML declarations and leading prose, repairs a
// missing root close tag once, and drops parameters it cannot pair up
// instead of guessing at them.

use std::collections::BTreeMap;

use crate::message::{ArgumentValue, ToolCall};

use super::markup::{
    decode_entities, find_element, has_markup, is_name_char, local_name, unwrap_code_fence,
    CdataGuard, Element,
};

/// Why an extraction attempt gave up. Only ever logged.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub(crate) enum ExtractError {
    #[error("input is empty")]
    Empty,

    #[error("no tool element found")]
    NoElement,

    #[error("root tag <{0}> is not a known tool")]
    UnknownTool(String),

    #[error("root element <{0}> could not be closed")]
    Unclosed(String),
}

/// Extract exactly one tool call from `text`.
///
/// Returns `None` whenever the text cannot confidently be read as a call to
/// one of `known_tools`.
pub fn extract_tool_call(text: &str, known_tools: &[String]) -> Option<ToolCall> {
    match try_extract(text, known_tools) {
        Ok(call) => Some(call),
        Err(e) => {
            tracing::debug!(reason = %e, "tool call extraction gave up");
            None
        }
    }
}

pub(crate) fn try_extract(text: &str, known_tools: &[String]) -> Result<ToolCall, ExtractError> {
    if text.trim().is_empty() {
        return Err(ExtractError::Empty);
    }

    let content = strip_wrappers(unwrap_code_fence(text));
    let Some(lt) = content.find('<') else {
        return Err(ExtractError::NoElement);
    };
    let content = &content[lt..];

    if !content.trim_end().ends_with('>') {
        // Trailing prose after a complete call.
        let (name, element) = scan_known_elements(content, known_tools)
            .ok_or(ExtractError::NoElement)?;
        return Ok(build_call(name, &content[element.inner]));
    }

    let qualified = root_tag_name(content).ok_or(ExtractError::NoElement)?;
    let name = local_name(qualified);
    if !known_tools.iter().any(|tool| tool == name) {
        return Err(ExtractError::UnknownTool(name.to_string()));
    }

    if let Some(element) = find_element(content, qualified, 0) {
        return Ok(build_call(name, &content[element.inner]));
    }

    // One repair: synthesize the missing close tag.
    let repaired = format!("{}</{qualified}>", content.trim_end());
    match find_element(&repaired, qualified, 0) {
        Some(element) => {
            tracing::debug!(tool = name, "closed unterminated tool call root");
            Ok(build_call(name, &repaired[element.inner]))
        }
        None => Err(ExtractError::Unclosed(name.to_string())),
    }
}

/// Unwrap a whole-input XML comment around a tag and skip an XML declaration.
fn strip_wrappers(mut content: &str) -> &str {
    if let Some(inner) = content
        .strip_prefix("<!--")
        .and_then(|rest| rest.strip_suffix("-->"))
    {
        let inner = inner.trim();
        if inner.starts_with('<') && inner.ends_with('>') {
            content = inner;
        }
    }
    if content.starts_with("<?xml") {
        if let Some(end) = content.find("?>") {
            content = content[end + 2..].trim_start();
        }
    }
    content
}

fn root_tag_name(content: &str) -> Option<&str> {
    let rest = content.strip_prefix('<')?;
    let len = rest
        .find(|c: char| !(is_name_char(c) || c == ':'))
        .unwrap_or(rest.len());
    (len > 0).then(|| &rest[..len])
}

/// Earliest complete `<tool>...</tool>` element for any known tool.
pub(crate) fn scan_known_elements<'a>(
    text: &str,
    known_tools: &'a [String],
) -> Option<(&'a str, Element)> {
    known_tools
        .iter()
        .filter_map(|tool| find_element(text, tool, 0).map(|el| (tool.as_str(), el)))
        .min_by_key(|(_, el)| el.start)
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

fn build_call(name: &str, inner: &str) -> ToolCall {
    ToolCall {
        name: name.to_string(),
        arguments: parse_arguments(name, inner),
    }
}

/// First-level child elements of the root become arguments. A root holding
/// only text stores that text under the root's own name.
///
/// Entities are decoded before child elements are located, so escaped
/// parameter tags count as parameters. CDATA is left untouched by both.
fn parse_arguments(root: &str, inner: &str) -> BTreeMap<String, ArgumentValue> {
    let (protected, cdata) = CdataGuard::protect(inner);
    let decoded = decode_entities(&protected);
    let mut arguments = BTreeMap::new();

    let mut pos = 0;
    while let Some(rel) = decoded[pos..].find('<') {
        let start = pos + rel;
        let name_start = start + 1;
        let name_len = decoded[name_start..]
            .find(|c: char| !is_name_char(c))
            .unwrap_or(decoded.len() - name_start);
        if name_len == 0 {
            pos = name_start;
            continue;
        }
        let name = &decoded[name_start..name_start + name_len];
        match find_element(&decoded, name, start) {
            Some(element) if element.start == start => {
                if element.inner.is_empty() && decoded[..element.end].ends_with("/>") {
                    pos = element.end;
                    continue;
                }
                let value = cdata.restore(&decoded[element.inner]);
                arguments.insert(name.to_string(), ArgumentValue::coerce(&value));
                pos = element.end;
            }
            // Unpaired or mismatched tag: dropped.
            _ => pos = name_start,
        }
    }

    if arguments.is_empty() && !decoded.trim().is_empty() && !has_markup(&decoded) {
        let value = cdata.restore(decoded.trim());
        arguments.insert(root.to_string(), ArgumentValue::coerce(&value));
    }

    arguments
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
