// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

// XML tool-call recovery
//
// Responsibilities:
// - Classify accumulated text: not a tag, foreign/HTML tag, known tool tag
//   still open, known tool tag complete
// - Extract one tool call (name + typed arguments) from complete markup,
//   repairing the common malformations models produce
// - Drive detection incrementally over a growing, size-bounded buffer
//
// Everything here is pure and synchronous. Stream processors own the state.

mod classifier;
mod extractor;
mod markup;
mod partial;

pub use classifier::{classify_potential_tool_call, is_tool_name_prefix, ClassificationResult};
pub use extractor::extract_tool_call;
pub use partial::{advance, PartialOutcome, PartialState, MAX_BUFFER_BYTES};
