// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

use std::sync::LazyLock;

use regex::Regex;

use super::markup::{
    decode_entities, find_close_tag, find_open_tag, is_html_tag, is_name_char, local_name,
    unwrap_code_fence,
};

/// Permissive XML-ish opening tag: `<ns:name attr="v" flag ...>`, `/>`, or a
/// tag still being written at the end of the text.
static TAG_GRAMMAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"<(?P<qname>(?:[A-Za-z0-9_.-]+:)?[A-Za-z0-9_.-]+)(?:\s+[A-Za-z0-9_.:-]+(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'>/]+))?)*\s*(?:/?>|$)"#,
    )
    .expect("tag grammar regex is valid")
});

/// Outcome of sniffing accumulated text for a tool-call opening tag.
///
/// `is_complete` implies `might_be_tool_call`, which implies `is_potential`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationResult {
    pub is_potential: bool,
    pub might_be_tool_call: bool,
    pub is_complete: bool,
    /// First tag name seen, whether or not it names a known tool.
    pub root_tag_name: Option<String>,
}

/// Classify `text` against the known tool names.
///
/// Never fails; malformed input classifies as "not a tool call".
pub fn classify_potential_tool_call(text: &str, known_tools: &[String]) -> ClassificationResult {
    if text.trim().is_empty() {
        return ClassificationResult::default();
    }

    let unwrapped = unwrap_code_fence(text);
    let decoded = decode_entities(unwrapped);
    let Some(lt) = decoded.find('<') else {
        return ClassificationResult::default();
    };

    let Some(caps) = TAG_GRAMMAR.captures(&decoded[lt..]) else {
        return ClassificationResult::default();
    };
    let Some(qname) = caps.name("qname") else {
        return ClassificationResult::default();
    };

    // A name running into the end of the text may still be growing.
    let name_end = lt + qname.end();
    let terminated = decoded[name_end..]
        .chars()
        .next()
        .is_some_and(|c| c.is_whitespace() || c == '/' || c == '>');
    if !terminated {
        return ClassificationResult::default();
    }

    let root = local_name(qname.as_str());
    let mut result = ClassificationResult {
        root_tag_name: Some(root.to_string()),
        ..ClassificationResult::default()
    };

    if is_html_tag(root) {
        return result;
    }
    if !known_tools.iter().any(|tool| tool == root) {
        return result;
    }
    result.is_potential = true;
    result.might_be_tool_call = true;

    let open_from = lt + qname.start() - 1;
    let qualified = qname.as_str();
    result.is_complete = match find_open_tag(&decoded, qualified, open_from) {
        Some(open) if open.self_closing => true,
        Some(open) => {
            find_close_tag(&decoded, qualified, open.end).is_some()
                || (qualified != root && find_close_tag(&decoded, root, open.end).is_some())
        }
        None => false,
    };

    result
}

/// True when `text` is `<` followed by a partial tag name that could still
/// grow into one of the known tool names (`<sea` for `search`).
pub fn is_tool_name_prefix(text: &str, known_tools: &[String]) -> bool {
    let Some(rest) = text.trim_start().strip_prefix('<') else {
        return false;
    };
    if !rest.chars().all(|c| is_name_char(c) || c == ':') {
        return false;
    }
    let partial = local_name(rest);
    known_tools.iter().any(|tool| tool.starts_with(partial))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn tools(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_input_is_all_false() {
        assert_eq!(
            classify_potential_tool_call("", &tools(&["search"])),
            ClassificationResult::default()
        );
        assert_eq!(
            classify_potential_tool_call("   \n", &tools(&["search"])),
            ClassificationResult::default()
        );
    }

    #[test]
    fn text_without_angle_bracket_is_all_false() {
        let known = tools(&["search", "a"]);
        for s in ["hello", "search me", "a > b", "x".repeat(500).as_str(), "&amp;"] {
            assert_eq!(
                classify_potential_tool_call(s, &known),
                ClassificationResult::default(),
                "input {s:?}"
            );
        }
    }

    #[test]
    fn complete_known_tool() {
        let r = classify_potential_tool_call(
            "<search><query>test query</query></search>",
            &tools(&["search"]),
        );
        assert!(r.is_potential && r.might_be_tool_call && r.is_complete);
        assert_eq!(r.root_tag_name.as_deref(), Some("search"));
    }

    #[test]
    fn incomplete_known_tool() {
        let r = classify_potential_tool_call("<search><query>te", &tools(&["search"]));
        assert!(r.might_be_tool_call);
        assert!(!r.is_complete);
    }

    #[test]
    fn self_closing_is_complete() {
        let r = classify_potential_tool_call("<get_time />", &tools(&["get_time"]));
        assert!(r.is_complete);
    }

    #[test]
    fn html_is_rejected_even_if_named_as_tool() {
        let r = classify_potential_tool_call("<div class=\"x\">hi</div>", &tools(&["div"]));
        assert!(!r.might_be_tool_call);
        assert!(!r.is_complete);
        assert_eq!(r.root_tag_name.as_deref(), Some("div"));
    }

    #[test]
    fn deny_list_applies_to_every_html_root() {
        let known = tools(&["search", "div", "p", "TABLE"]);
        for tag in super::super::markup::HTML_TAGS {
            let text = format!("<{tag}>content</{tag}>");
            assert!(!classify_potential_tool_call(&text, &known).might_be_tool_call, "{tag}");
            let upper = format!("<{}>x", tag.to_uppercase());
            assert!(!classify_potential_tool_call(&upper, &known).might_be_tool_call, "{tag}");
        }
    }

    #[test]
    fn unknown_root_reports_name_only() {
        let r = classify_potential_tool_call("<thinking>hmm</thinking>", &tools(&["search"]));
        assert_eq!(r.root_tag_name.as_deref(), Some("thinking"));
        assert!(!r.is_potential);
        assert!(!r.might_be_tool_call);
    }

    #[test]
    fn tool_names_are_case_sensitive() {
        let r = classify_potential_tool_call("<Search></Search>", &tools(&["search"]));
        assert!(!r.might_be_tool_call);
    }

    #[test]
    fn partial_name_has_no_root() {
        let r = classify_potential_tool_call("<sea", &tools(&["search"]));
        assert_eq!(r, ClassificationResult::default());
    }

    #[test]
    fn fenced_and_escaped_calls_are_recognized() {
        let known = tools(&["search"]);
        let fenced = "```xml\n<search><q>x</q></search>\n```";
        assert!(classify_potential_tool_call(fenced, &known).is_complete);
        let generic = "```\n<search><q>x</q></search>\n```";
        assert!(classify_potential_tool_call(generic, &known).is_complete);
        let escaped = "&lt;search&gt;&lt;q&gt;x&lt;/q&gt;&lt;/search&gt;";
        assert!(classify_potential_tool_call(escaped, &known).is_complete);
    }

    #[test]
    fn namespace_prefix_is_stripped() {
        let r = classify_potential_tool_call("<ns:search>q</ns:search>", &tools(&["search"]));
        assert_eq!(r.root_tag_name.as_deref(), Some("search"));
        assert!(r.is_complete);
    }

    #[test]
    fn leading_prose_is_skipped() {
        let r = classify_potential_tool_call("Sure thing. <search>q</search>", &tools(&["search"]));
        assert!(r.is_complete);
    }

    #[test]
    fn completeness_survives_trailing_text() {
        let known = tools(&["search"]);
        let base = "<search><query>q</query></search>";
        assert!(classify_potential_tool_call(base, &known).is_complete);
        for tail in ["", " ", "done.", "<div>", "</search>", "<search>", "\n\n```"] {
            let longer = format!("{base}{tail}");
            assert!(classify_potential_tool_call(&longer, &known).is_complete, "{tail:?}");
        }
    }

    #[test]
    fn invariants_hold_on_assorted_input() {
        let known = tools(&["search", "run_code"]);
        let inputs = [
            "<", "<>", "< search>", "<search", "<search ", "<search>", "<run_code/>",
            "<p>hi", "x < y > z", "<search attr=1>", "<search attr=\"a b\">x</search>",
            "</search>", "<<search>>", "<!-- c -->", "<?xml version=\"1.0\"?>",
        ];
        for input in inputs {
            let r = classify_potential_tool_call(input, &known);
            if r.is_complete {
                assert!(r.might_be_tool_call, "{input:?}");
            }
            if r.might_be_tool_call {
                assert!(r.is_potential, "{input:?}");
            }
        }
    }

    #[test]
    fn tool_name_prefix_detection() {
        let known = tools(&["search", "run_code"]);
        assert!(is_tool_name_prefix("<", &known));
        assert!(is_tool_name_prefix("<sea", &known));
        assert!(is_tool_name_prefix("<search", &known));
        assert!(is_tool_name_prefix("<run_", &known));
        assert!(!is_tool_name_prefix("<searchx", &known));
        assert!(!is_tool_name_prefix("<b", &known));
        assert!(!is_tool_name_prefix("< 3", &known));
        assert!(!is_tool_name_prefix("<search>", &known));
        assert!(!is_tool_name_prefix("<", &[]));
    }
}
