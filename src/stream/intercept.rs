// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

// Tool-call interception over a sequence of text fragments.
//
// Shared by every stream processor. Text without `<` passes straight
// through. From the first `<` on, text is held as a candidate and run
// through the partial extraction controller until it resolves into a tool
// call or is disproved and released as plain text. At most one tool call
// resolves per stream; everything after it is swallowed.

use std::sync::Arc;

use super::heuristics::PrefaceHeuristic;
use crate::message::ToolCall;
use crate::toolcall::{advance, extract_tool_call, is_tool_name_prefix, PartialState};

/// Output of the interceptor, in client order.
#[derive(Debug, Clone, PartialEq)]
pub enum Intercepted {
    Text(String),
    ToolCall(ToolCall),
}

/// What the processor should do with the fragment it just pushed.
#[derive(Debug, Clone, PartialEq)]
pub enum Interception {
    /// Nothing held back; forward the original chunk unchanged.
    PassThrough,
    /// The fragment was consumed; emit these instead (possibly nothing).
    Absorbed(Vec<Intercepted>),
}

pub struct ToolCallInterceptor {
    known_tools: Vec<String>,
    preface: Arc<dyn PrefaceHeuristic>,
    /// Plain text held in front of the candidate.
    pending: String,
    /// Text from a `<` onward under evaluation.
    candidate: String,
    state: Option<PartialState>,
    resolved: bool,
}

impl ToolCallInterceptor {
    pub fn new(known_tools: Vec<String>, preface: Arc<dyn PrefaceHeuristic>) -> Self {
        Self {
            known_tools,
            preface,
            pending: String::new(),
            candidate: String::new(),
            state: None,
            resolved: false,
        }
    }

    /// True once a tool call has been emitted.
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// True while text is held back.
    pub fn is_buffering(&self) -> bool {
        !self.pending.is_empty() || !self.candidate.is_empty()
    }

    pub fn push(&mut self, fragment: &str) -> Interception {
        if self.resolved {
            return Interception::Absorbed(Vec::new());
        }
        if self.known_tools.is_empty() {
            return Interception::PassThrough;
        }
        if self.candidate.is_empty() {
            let Some(lt) = fragment.find('<') else {
                if self.pending.is_empty() && fence_opener_start(fragment).is_none() {
                    return Interception::PassThrough;
                }
                // A trailing fence opener is held until we see what follows it.
                self.pending.push_str(fragment);
                let mut out = Vec::new();
                if fence_opener_start(&self.pending).is_none() {
                    self.flush_pending(&mut out);
                }
                return Interception::Absorbed(out);
            };
            self.pending.push_str(&fragment[..lt]);
            self.candidate.push_str(&fragment[lt..]);
        } else {
            self.candidate.push_str(fragment);
        }

        let mut out = Vec::new();
        self.evaluate(&mut out);
        Interception::Absorbed(out)
    }

    /// The backend finished: one last extraction attempt on whatever is
    /// held, otherwise release it as text.
    pub fn finish(&mut self) -> Vec<Intercepted> {
        let mut out = Vec::new();
        if self.resolved {
            return out;
        }
        if !self.candidate.is_empty() {
            let candidate = std::mem::take(&mut self.candidate);
            self.state = None;
            if let Some(call) = extract_tool_call(&candidate, &self.known_tools) {
                tracing::debug!(tool = %call.name, "tool call recovered at end of stream");
                self.resolve(call, &mut out);
                return out;
            }
            self.pending.push_str(&candidate);
        }
        self.flush_pending(&mut out);
        out
    }

    /// Release everything held as plain text, without extraction.
    pub fn flush_text(&mut self) -> Option<String> {
        self.state = None;
        let mut text = std::mem::take(&mut self.pending);
        text.push_str(&std::mem::take(&mut self.candidate));
        (!text.is_empty()).then_some(text)
    }

    fn evaluate(&mut self, out: &mut Vec<Intercepted>) {
        loop {
            if self.candidate.is_empty() {
                self.flush_pending(out);
                return;
            }

            let outcome = advance(&self.candidate, &self.known_tools, self.state.as_ref());
            if let (Some(call), Some(start)) = (outcome.tool_call, outcome.span_start) {
                let lead: String = self.candidate.drain(..start).collect();
                self.pending.push_str(&lead);
                self.candidate.clear();
                self.state = None;
                self.resolve(call, out);
                return;
            }

            let buffered = outcome.state.buffer.len();
            if buffered > 0 || is_tool_name_prefix(&self.candidate, &self.known_tools) {
                if buffered > 0 && buffered < self.candidate.len() {
                    // Only the retained window stays held.
                    let cut = self.candidate.len() - buffered;
                    let head: String = self.candidate.drain(..cut).collect();
                    self.pending.push_str(&head);
                    self.flush_pending(out);
                }
                self.state = Some(outcome.state);
                if !self.pending.is_empty() && !self.holds_lead() {
                    self.flush_pending(out);
                }
                return;
            }

            // Disproved: release up to the next `<` and try again from there.
            // After a window drain the candidate may start mid-text.
            self.state = None;
            let skip = self.candidate.chars().next().map_or(0, char::len_utf8);
            match self.candidate[skip..].find('<') {
                Some(i) => {
                    let released: String = self.candidate.drain(..skip + i).collect();
                    self.pending.push_str(&released);
                }
                None => {
                    let released = std::mem::take(&mut self.candidate);
                    self.pending.push_str(&released);
                }
            }
        }
    }

    /// Lead text worth holding until the candidate resolves.
    fn holds_lead(&self) -> bool {
        fence_opener_start(&self.pending).is_some() || self.preface.is_preface(&self.pending)
    }

    fn resolve(&mut self, call: ToolCall, out: &mut Vec<Intercepted>) {
        let mut lead = std::mem::take(&mut self.pending);
        if let Some(start) = fence_opener_start(&lead) {
            lead.truncate(start);
        }
        if !lead.trim().is_empty() {
            if self.preface.is_preface(&lead) {
                tracing::debug!(chars = lead.len(), "suppressed tool call preface");
            } else {
                out.push(Intercepted::Text(lead));
            }
        }
        tracing::debug!(tool = %call.name, "tool call resolved");
        out.push(Intercepted::ToolCall(call));
        self.resolved = true;
    }

    fn flush_pending(&mut self, out: &mut Vec<Intercepted>) {
        if !self.pending.is_empty() {
            out.push(Intercepted::Text(std::mem::take(&mut self.pending)));
        }
    }
}

/// Byte offset of a trailing code-fence opener (```` ``` ```` or
/// ```` ```xml ````) at the end of `text`.
fn fence_opener_start(text: &str) -> Option<usize> {
    let trimmed = text.trim_end();
    let start = trimmed.rfind("```")?;
    let language = &trimmed[start + 3..];
    let opener_line = language.is_empty() || language.eq_ignore_ascii_case("xml");
    let at_line_start = trimmed[..start].is_empty() || trimmed[..start].ends_with('\n');
    (opener_line && at_line_start).then_some(start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ArgumentValue;
    use crate::stream::heuristics::{NarrativePreface, NoPreface};

    fn interceptor(names: &[&str]) -> ToolCallInterceptor {
        ToolCallInterceptor::new(
            names.iter().map(|s| s.to_string()).collect(),
            Arc::new(NarrativePreface::default()),
        )
    }

    /// Feed fragments and collect everything emitted, with passthrough
    /// fragments reported as text.
    fn run(ic: &mut ToolCallInterceptor, fragments: &[&str]) -> Vec<Intercepted> {
        let mut out = Vec::new();
        for fragment in fragments {
            match ic.push(fragment) {
                Interception::PassThrough => out.push(Intercepted::Text(fragment.to_string())),
                Interception::Absorbed(items) => out.extend(items),
            }
        }
        out.extend(ic.finish());
        out
    }

    fn text_of(items: &[Intercepted]) -> String {
        items
            .iter()
            .filter_map(|i| match i {
                Intercepted::Text(t) => Some(t.as_str()),
                Intercepted::ToolCall(_) => None,
            })
            .collect()
    }

    #[test]
    fn plain_text_passes_through() {
        let mut ic = interceptor(&["search"]);
        assert_eq!(ic.push("hello world"), Interception::PassThrough);
        assert!(!ic.is_buffering());
    }

    #[test]
    fn no_known_tools_passes_everything() {
        let mut ic = interceptor(&[]);
        assert_eq!(ic.push("<search>"), Interception::PassThrough);
    }

    #[test]
    fn fragmented_call_resolves_once() {
        let mut ic = interceptor(&["search"]);
        let out = run(&mut ic, &["<sea", "rch><query>q</query></se", "arch>", "ignored"]);
        assert_eq!(
            out,
            vec![Intercepted::ToolCall(
                ToolCall::new("search").with_argument("query", ArgumentValue::from("q"))
            )]
        );
        assert!(ic.is_resolved());
    }

    #[test]
    fn angle_brackets_in_prose_survive() {
        let mut ic = interceptor(&["search"]);
        let out = run(&mut ic, &["if a <", " b and c<d then ", "<b>bold</b> done"]);
        assert_eq!(text_of(&out), "if a < b and c<d then <b>bold</b> done");
        assert!(out.iter().all(|i| matches!(i, Intercepted::Text(_))));
    }

    #[test]
    fn html_is_released() {
        let mut ic = interceptor(&["search"]);
        let out = run(&mut ic, &["<div class=\"x\">hi</div>"]);
        assert_eq!(text_of(&out), "<div class=\"x\">hi</div>");
    }

    #[test]
    fn preface_is_suppressed() {
        let mut ic = interceptor(&["search"]);
        let out = run(&mut ic, &["I'll search for that. <search><query>q</query></search>"]);
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Intercepted::ToolCall(_)));
    }

    #[test]
    fn ordinary_lead_text_is_kept_in_order() {
        let mut ic = ToolCallInterceptor::new(vec!["search".into()], Arc::new(NoPreface));
        let out = run(&mut ic, &["Result follows. <search><query>q</query></search>"]);
        assert_eq!(out[0], Intercepted::Text("Result follows. ".into()));
        assert!(matches!(out[1], Intercepted::ToolCall(_)));
    }

    #[test]
    fn fence_opener_is_stripped() {
        let mut ic = ToolCallInterceptor::new(vec!["search".into()], Arc::new(NoPreface));
        let out = run(
            &mut ic,
            &["Calling it:\n```xml\n", "<search><query>q</query></search>\n```"],
        );
        assert_eq!(out[0], Intercepted::Text("Calling it:\n".into()));
        assert!(matches!(out[1], Intercepted::ToolCall(_)));
    }

    #[test]
    fn unfinished_candidate_is_flushed_at_end() {
        let mut ic = interceptor(&["search"]);
        let out = run(&mut ic, &["see <search><query>never closed"]);
        assert_eq!(text_of(&out), "see <search><query>never closed");
    }

    #[test]
    fn end_of_stream_extraction_repairs_missing_close() {
        let mut ic = interceptor(&["search"]);
        let out = run(&mut ic, &["<search><query>q</query>"]);
        assert!(matches!(&out[0], Intercepted::ToolCall(c) if c.name == "search"));
    }

    #[test]
    fn flush_text_returns_held_text() {
        let mut ic = interceptor(&["search"]);
        let pushed = ic.push("a <search><query>");
        assert_eq!(
            pushed,
            Interception::Absorbed(vec![Intercepted::Text("a ".into())])
        );
        assert_eq!(ic.flush_text().as_deref(), Some("<search><query>"));
        assert_eq!(ic.flush_text(), None);
    }

    #[test]
    fn oversized_multibyte_candidate_disproved_after_window_drain() {
        let mut ic = interceptor(&["search"]);
        let first = format!("<search><query>{}<search>", "é".repeat(6000));
        let second = "x".repeat(11_000);
        let out = run(&mut ic, &[first.as_str(), second.as_str()]);
        assert!(out.iter().all(|i| matches!(i, Intercepted::Text(_))));
        assert_eq!(text_of(&out), format!("{first}{second}"));
        assert!(!ic.is_buffering());
    }

    #[test]
    fn fence_opener_detection() {
        assert_eq!(fence_opener_start("x\n```xml\n"), Some(2));
        assert_eq!(fence_opener_start("```"), Some(0));
        assert_eq!(fence_opener_start("use ```rust"), None);
        assert_eq!(fence_opener_start("plain"), None);
    }
}
