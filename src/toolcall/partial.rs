// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

// Incremental tool-call detection over a growing text buffer.
//
// Callers re-invoke `advance` with the whole accumulated candidate text and
// the state returned by the previous call. The controller decides whether
// the text is still worth holding back, and hands complete spans to the
// extractor.

use crate::message::ToolCall;

use super::classifier::classify_potential_tool_call;
use super::extractor::{extract_tool_call, scan_known_elements};
use super::markup::{ceil_char_boundary, is_html_tag, leading_tag_name};

/// Upper bound on the text inspected and retained per candidate.
pub const MAX_BUFFER_BYTES: usize = 10 * 1024;

/// State carried between successive `advance` calls for one stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialState {
    pub root_tag: Option<String>,
    pub is_potential: bool,
    pub might_be_tool_call: bool,
    /// Text worth keeping for the next call. Empty means "release it".
    pub buffer: String,
    /// Last root tag name seen. Diagnostics only.
    pub identified_tool_name: Option<String>,
}

/// Result of one `advance` call.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialOutcome {
    pub complete: bool,
    pub tool_call: Option<ToolCall>,
    /// Byte offset in the input where the extracted call begins.
    pub span_start: Option<usize>,
    pub state: PartialState,
}

impl PartialOutcome {
    fn pending(state: PartialState) -> Self {
        Self {
            complete: false,
            tool_call: None,
            span_start: None,
            state,
        }
    }

    fn resolved(call: ToolCall, span_start: usize) -> Self {
        Self {
            complete: true,
            tool_call: Some(call),
            span_start: Some(span_start),
            state: PartialState::default(),
        }
    }
}

/// Advance detection over `text`, the full candidate accumulated so far.
pub fn advance(
    text: &str,
    known_tools: &[String],
    previous: Option<&PartialState>,
) -> PartialOutcome {
    let previous_identified = previous.and_then(|p| p.identified_tool_name.clone());
    let was_candidate = previous.is_some_and(|p| p.might_be_tool_call);

    if text.trim().is_empty() || known_tools.is_empty() {
        return PartialOutcome::pending(PartialState {
            identified_tool_name: previous_identified,
            ..PartialState::default()
        });
    }

    // Size guard: only the trailing window is ever classified or retained.
    let offset = if text.len() > MAX_BUFFER_BYTES {
        ceil_char_boundary(text, text.len() - MAX_BUFFER_BYTES)
    } else {
        0
    };
    let window = &text[offset..];

    // Known HTML up front: never buffer it, but a complete tool call further
    // along is still picked up.
    if let Some(tag) = leading_tag_name(window).filter(|tag| is_html_tag(tag)) {
        if let Some((call, start)) = scan_embedded(window, known_tools) {
            return PartialOutcome::resolved(call, offset + start);
        }
        return PartialOutcome::pending(PartialState {
            root_tag: Some(tag.to_string()),
            identified_tool_name: Some(tag.to_string()),
            ..PartialState::default()
        });
    }

    let classification = classify_potential_tool_call(window, known_tools);
    let identified = classification
        .root_tag_name
        .clone()
        .or(previous_identified);

    let rejected = (classification.root_tag_name.is_some() && !classification.might_be_tool_call)
        || (was_candidate && !classification.might_be_tool_call);
    if rejected {
        if offset > 0 {
            tracing::debug!(bytes = text.len(), "tool call buffer tail not tool-shaped, reset");
        }
        return PartialOutcome::pending(PartialState {
            root_tag: classification.root_tag_name,
            identified_tool_name: identified,
            ..PartialState::default()
        });
    }

    if classification.is_complete {
        if let Some(call) = extract_tool_call(window, known_tools) {
            let start = window.find('<').unwrap_or(0);
            return PartialOutcome::resolved(call, offset + start);
        }
    }
    if classification.might_be_tool_call {
        if let Some((call, start)) = scan_embedded(window, known_tools) {
            return PartialOutcome::resolved(call, offset + start);
        }
        return PartialOutcome::pending(PartialState {
            root_tag: classification.root_tag_name,
            is_potential: classification.is_potential,
            might_be_tool_call: true,
            buffer: window.to_string(),
            identified_tool_name: identified,
        });
    }

    PartialOutcome::pending(PartialState {
        identified_tool_name: identified,
        ..PartialState::default()
    })
}

/// Find and extract a complete `<tool>...</tool>` span anywhere in `text`.
fn scan_embedded(text: &str, known_tools: &[String]) -> Option<(ToolCall, usize)> {
    let (_, element) = scan_known_elements(text, known_tools)?;
    let call = extract_tool_call(&text[element.start..element.end], known_tools)?;
    Some((call, element.start))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ArgumentValue;

    fn tools(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    /// Feed fragments the way a stream processor does: accumulate, then
    /// re-run with the previous state.
    fn feed(fragments: &[&str], known: &[String]) -> Vec<PartialOutcome> {
        let mut text = String::new();
        let mut state: Option<PartialState> = None;
        let mut outcomes = Vec::new();
        for fragment in fragments {
            text.push_str(fragment);
            let outcome = advance(&text, known, state.as_ref());
            state = Some(outcome.state.clone());
            outcomes.push(outcome);
        }
        outcomes
    }

    #[test]
    fn streamed_across_fragments() {
        let outcomes = feed(
            &["<sea", "rch><query>q</query></se", "arch>"],
            &tools(&["search"]),
        );
        assert!(!outcomes[0].complete);
        assert!(!outcomes[1].complete);
        assert!(outcomes[1].state.might_be_tool_call);
        assert!(outcomes[2].complete);
        let call = outcomes[2].tool_call.as_ref().unwrap();
        assert_eq!(call.name, "search");
        assert_eq!(call.arguments["query"], ArgumentValue::String("q".into()));
        assert_eq!(outcomes[2].span_start, Some(0));
    }

    #[test]
    fn buffering_keeps_full_text() {
        let text = "<search><query>par";
        let outcome = advance(text, &tools(&["search"]), None);
        assert!(!outcome.complete);
        assert_eq!(outcome.state.buffer, text);
        assert_eq!(outcome.state.identified_tool_name.as_deref(), Some("search"));
    }

    #[test]
    fn unknown_tag_is_released() {
        let outcome = advance("<b>bold</b>", &tools(&["search"]), None);
        assert!(!outcome.complete);
        assert!(outcome.state.buffer.is_empty());
        assert_eq!(outcome.state.root_tag.as_deref(), Some("b"));
    }

    #[test]
    fn html_then_tool_call_is_extracted() {
        let text = "<div>Here is the plan</div>\n<search><query>q</query></search>";
        let outcome = advance(text, &tools(&["search"]), None);
        assert!(outcome.complete);
        assert_eq!(outcome.tool_call.unwrap().name, "search");
        assert_eq!(outcome.span_start, text.find("<search>"));
    }

    #[test]
    fn html_alone_is_never_buffered() {
        let outcome = advance("<div><p>text", &tools(&["search"]), None);
        assert!(outcome.state.buffer.is_empty());
        assert!(!outcome.state.might_be_tool_call);
    }

    #[test]
    fn html_inside_parameter_does_not_break_detection() {
        let outcomes = feed(
            &[
                "<write_file><path>index.html</path><content>",
                "<div class=\"box\"><p>Hello</p></div>",
                "</content></write_file>",
            ],
            &tools(&["write_file"]),
        );
        assert!(!outcomes[0].complete);
        assert!(!outcomes[1].complete);
        assert!(!outcomes[1].state.buffer.is_empty());
        let call = outcomes[2].tool_call.as_ref().unwrap();
        assert_eq!(
            call.arguments["content"],
            ArgumentValue::String("<div class=\"box\"><p>Hello</p></div>".into())
        );
    }

    #[test]
    fn previous_candidate_disproved_resets() {
        let previous = PartialState {
            root_tag: Some("search".into()),
            is_potential: true,
            might_be_tool_call: true,
            buffer: "<search".into(),
            identified_tool_name: Some("search".into()),
        };
        let outcome = advance("<searchx>", &tools(&["search"]), Some(&previous));
        assert!(!outcome.complete);
        assert!(outcome.state.buffer.is_empty());
    }

    #[test]
    fn embedded_call_with_trailing_text() {
        let outcome = advance(
            "<search><query>q</query></search> and then some",
            &tools(&["search"]),
            None,
        );
        assert!(outcome.complete);
    }

    #[test]
    fn late_tool_call_after_long_preamble() {
        let text = format!(
            "{}<search><query>q</query></search>",
            "x".repeat(12 * 1024)
        );
        let outcome = advance(&text, &tools(&["search"]), None);
        assert!(outcome.complete);
        assert_eq!(outcome.span_start, Some(12 * 1024));
    }

    #[test]
    fn oversized_non_tool_text_always_resets() {
        let known = tools(&["search"]);
        let tails = ["plain words ", "<div>html</div>", "<b>x</b> y", "a < b"];
        for n in [MAX_BUFFER_BYTES + 1, MAX_BUFFER_BYTES + 777, 4 * MAX_BUFFER_BYTES] {
            for tail in tails {
                let mut text = String::with_capacity(n + tail.len());
                while text.len() < n {
                    text.push_str(tail);
                }
                let outcome = advance(&text, &known, None);
                assert!(!outcome.complete, "{n} {tail:?}");
                assert!(outcome.state.buffer.is_empty(), "{n} {tail:?}");
            }
        }
    }

    #[test]
    fn oversized_tool_shaped_tail_is_bounded() {
        let text = format!("{}<search><query>{}", "y".repeat(2048), "z".repeat(9000));
        assert!(text.len() > MAX_BUFFER_BYTES);
        let outcome = advance(&text, &tools(&["search"]), None);
        assert!(outcome.state.might_be_tool_call);
        assert!(outcome.state.buffer.len() <= MAX_BUFFER_BYTES);
        assert!(text.ends_with(&outcome.state.buffer));
    }

    #[test]
    fn disproof_stays_reset_while_text_grows() {
        let known = tools(&["search"]);
        let mut text = String::from("<search><query>");
        text.push_str(&"q".repeat(MAX_BUFFER_BYTES));
        let mut state = None;
        let mut seen_reset = false;
        for _ in 0..5 {
            text.push_str("<i>more</i>");
            let outcome = advance(&text, &known, state.as_ref());
            if seen_reset {
                assert!(outcome.state.buffer.is_empty());
            }
            if outcome.state.buffer.is_empty() {
                seen_reset = true;
            }
            state = Some(outcome.state);
        }
        assert!(seen_reset);
    }

    #[test]
    fn identified_name_carries_forward() {
        let known = tools(&["search"]);
        let first = advance("<search>", &known, None);
        let second = advance("", &known, Some(&first.state));
        assert_eq!(second.state.identified_tool_name.as_deref(), Some("search"));
    }
}
