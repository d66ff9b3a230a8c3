// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

// Narrative preface suppression.
//
// Models often announce a tool call ("I'll search for that") right before
// emitting it. When a call resolves, the text held back in front of it is
// offered to a `PrefaceHeuristic`; a match is dropped instead of being sent
// as a separate content chunk. This is an English phrase list, not parsing,
// and can be swapped out or disabled via configuration.

/// Decides whether text preceding a tool call is narration to drop.
pub trait PrefaceHeuristic: Send + Sync {
    fn is_preface(&self, text: &str) -> bool;
}

const PREFACE_PHRASES: &[&str] = &[
    "I'll",
    "I will",
    "Let me",
    "Here's",
    "Here is",
    "I'm going to",
    "Let's",
    "I can",
    "I am going to",
];

/// Text longer than this is content in its own right, never a preface.
const MAX_PREFACE_CHARS: usize = 200;

/// Phrase-list heuristic for short announcement text.
#[derive(Debug, Clone)]
pub struct NarrativePreface {
    phrases: Vec<String>,
    max_chars: usize,
}

impl Default for NarrativePreface {
    fn default() -> Self {
        Self {
            phrases: PREFACE_PHRASES.iter().map(|p| p.to_string()).collect(),
            max_chars: MAX_PREFACE_CHARS,
        }
    }
}

impl NarrativePreface {
    pub fn with_phrases(phrases: Vec<String>) -> Self {
        Self {
            phrases,
            ..Self::default()
        }
    }
}

impl PrefaceHeuristic for NarrativePreface {
    fn is_preface(&self, text: &str) -> bool {
        let text = text.trim();
        !text.is_empty()
            && text.chars().count() <= self.max_chars
            && self.phrases.iter().any(|p| text.contains(p.as_str()))
    }
}

/// Never suppresses anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPreface;

impl PrefaceHeuristic for NoPreface {
    fn is_preface(&self, _text: &str) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announcements_match() {
        let h = NarrativePreface::default();
        assert!(h.is_preface("I'll search for that.\n"));
        assert!(h.is_preface("  Let me check the weather. "));
        assert!(!h.is_preface("The answer is 4."));
        assert!(!h.is_preface("   "));
    }

    #[test]
    fn long_text_is_not_a_preface() {
        let h = NarrativePreface::default();
        let long = format!("I'll explain. {}", "detail ".repeat(60));
        assert!(!h.is_preface(&long));
    }

    #[test]
    fn custom_phrases_and_disabled() {
        let h = NarrativePreface::with_phrases(vec!["Voy a".into()]);
        assert!(h.is_preface("Voy a buscar"));
        assert!(!h.is_preface("I'll search"));
        assert!(!NoPreface.is_preface("I'll search"));
    }
}
