// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

// Low-level markup scanning shared by the classifier, the extractor and the
// partial extraction controller. Everything here works on byte offsets into
// `&str` and never allocates unless it has to rewrite text.

use std::borrow::Cow;

/// HTML element names that are never treated as tool calls.
pub(crate) const HTML_TAGS: &[&str] = &[
    "div", "span", "p", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "li", "table", "tr",
    "td", "th", "a", "img", "style", "script", "link", "meta", "title", "head", "body", "html",
    "form", "input", "button", "textarea", "select", "option",
];

pub(crate) fn is_html_tag(name: &str) -> bool {
    HTML_TAGS.iter().any(|tag| tag.eq_ignore_ascii_case(name))
}

pub(crate) fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-'
}

/// Drop an optional `prefix:` namespace from a qualified tag name. Only the
/// part before the first colon is a prefix.
pub(crate) fn local_name(qualified: &str) -> &str {
    match qualified.find(':') {
        Some(idx) => &qualified[idx + 1..],
        None => qualified,
    }
}

// ---------------------------------------------------------------------------
// Text normalization
// ---------------------------------------------------------------------------

/// Unwrap text that is entirely one fenced code block (```` ``` ```` or
/// ```` ```xml ````). Returns the trimmed input otherwise.
pub(crate) fn unwrap_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(body) = trimmed
        .strip_prefix("```")
        .and_then(|rest| rest.strip_suffix("```"))
    else {
        return trimmed;
    };
    // First line is a language tag when it carries no markup.
    let inner = match body.find('\n') {
        Some(idx) if is_fence_language(&body[..idx]) => &body[idx + 1..],
        None if is_fence_language(body) => "",
        _ => body,
    };
    inner.trim()
}

fn is_fence_language(line: &str) -> bool {
    line.trim()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '+' || c == '_')
}

/// Decode the five predefined XML entities. `&amp;` is decoded last so that
/// `&amp;lt;` yields `&lt;` rather than `<`.
pub(crate) fn decode_entities(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }
    Cow::Owned(
        text.replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&apos;", "'")
            .replace("&amp;", "&"),
    )
}

/// True when `text` contains something shaped like an opening or closing tag.
pub(crate) fn has_markup(text: &str) -> bool {
    text.match_indices('<').any(|(idx, _)| {
        text[idx + 1..]
            .chars()
            .next()
            .is_some_and(|c| c == '/' || c.is_ascii_alphabetic() || c == '_')
    })
}

// ---------------------------------------------------------------------------
// CDATA protection
// ---------------------------------------------------------------------------

const CDATA_OPEN: &str = "<![CDATA[";
const CDATA_CLOSE: &str = "]]>";
const PLACEHOLDER_MARK: char = '\u{1}';

/// CDATA sections swapped out for opaque placeholders.
pub(crate) struct CdataGuard {
    sections: Vec<String>,
}

impl CdataGuard {
    /// Replace every complete CDATA section with a placeholder that contains
    /// neither `<` nor `&`.
    pub(crate) fn protect(text: &str) -> (String, Self) {
        let mut sections = Vec::new();
        if !text.contains(CDATA_OPEN) {
            return (text.to_string(), Self { sections });
        }
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find(CDATA_OPEN) {
            let Some(len) = rest[start..].find(CDATA_CLOSE) else {
                break;
            };
            let end = start + len + CDATA_CLOSE.len();
            out.push_str(&rest[..start]);
            out.push(PLACEHOLDER_MARK);
            out.push_str(&sections.len().to_string());
            out.push(PLACEHOLDER_MARK);
            sections.push(rest[start..end].to_string());
            rest = &rest[end..];
        }
        out.push_str(rest);
        (out, Self { sections })
    }

    /// Put the original sections, markers included, back in place.
    pub(crate) fn restore(&self, text: &str) -> String {
        if self.sections.is_empty() {
            return text.to_string();
        }
        let mut out = text.to_string();
        for (idx, section) in self.sections.iter().enumerate() {
            let placeholder = format!("{PLACEHOLDER_MARK}{idx}{PLACEHOLDER_MARK}");
            out = out.replace(&placeholder, section);
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tag location
// ---------------------------------------------------------------------------

/// An opening tag found in text. `end` is one past its `>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OpenTag {
    pub start: usize,
    pub end: usize,
    pub self_closing: bool,
}

/// A located element. `inner` is empty for self-closing tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Element {
    pub start: usize,
    pub end: usize,
    pub inner: std::ops::Range<usize>,
}

/// Find `<name` followed by whitespace, `/` or `>` at or after `from`, up to
/// and including the tag's closing `>`.
pub(crate) fn find_open_tag(text: &str, name: &str, from: usize) -> Option<OpenTag> {
    let pattern = format!("<{name}");
    let mut pos = from;
    while let Some(rel) = text.get(pos..)?.find(&pattern) {
        let start = pos + rel;
        let after = start + pattern.len();
        match text[after..].chars().next() {
            Some(c) if c.is_whitespace() || c == '>' || c == '/' => {
                let gt = after + text[after..].find('>')?;
                return Some(OpenTag {
                    start,
                    end: gt + 1,
                    self_closing: text[..gt].ends_with('/'),
                });
            }
            _ => pos = after,
        }
    }
    None
}

/// Find `</name>` (whitespace allowed before `>`) at or after `from`.
/// Returns the start offset and one past the `>`.
pub(crate) fn find_close_tag(text: &str, name: &str, from: usize) -> Option<(usize, usize)> {
    let pattern = format!("</{name}");
    let mut pos = from;
    while let Some(rel) = text.get(pos..)?.find(&pattern) {
        let start = pos + rel;
        let after = start + pattern.len();
        let rest = &text[after..];
        let trimmed = rest.trim_start();
        if trimmed.starts_with('>') {
            let gt = after + (rest.len() - trimmed.len());
            return Some((start, gt + 1));
        }
        pos = after;
    }
    None
}

/// Locate the first `<name ...>inner</name>` pair, or a self-closing
/// `<name/>`, at or after `from`. The first close tag after the opening tag
/// ends the element.
pub(crate) fn find_element(text: &str, name: &str, from: usize) -> Option<Element> {
    let open = find_open_tag(text, name, from)?;
    if open.self_closing {
        return Some(Element {
            start: open.start,
            end: open.end,
            inner: open.end..open.end,
        });
    }
    let (close_start, close_end) = find_close_tag(text, name, open.end)?;
    Some(Element {
        start: open.start,
        end: close_end,
        inner: open.end..close_start,
    })
}

/// Name of the tag `text` starts with, if it starts with `<name`.
pub(crate) fn leading_tag_name(text: &str) -> Option<&str> {
    let rest = text.trim_start().strip_prefix('<')?;
    let len = rest
        .find(|c: char| !(is_name_char(c) || c == ':'))
        .unwrap_or(rest.len());
    (len > 0).then(|| &rest[..len])
}

/// Advance `idx` to the next char boundary of `text`.
pub(crate) fn ceil_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx.min(text.len())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
