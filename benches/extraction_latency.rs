// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

//! Tool call recovery latency.
//!
//! Measures:
//! - Classification of accumulated text
//! - One-shot extraction from complete markup
//! - Incremental detection over a growing buffer
//! - A full OpenAI stream through the processor, token by token
//!
//! Run: cargo bench --bench extraction_latency

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

use toolshim::format::WireFormat;
use toolshim::stream::{StreamOptions, StreamProcessor};
use toolshim::toolcall::{advance, classify_potential_tool_call, extract_tool_call, PartialState};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn known_tools() -> Vec<String> {
    ["search", "read_file", "write_file", "run_command", "list_dir"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

const SIMPLE_CALL: &str = "<search><query>rust async runtimes</query></search>";

const NESTED_CALL: &str = "<write_file><path>/tmp/out.json</path>\
<content>{\"a\": [1, 2, 3], \"b\": {\"c\": true}}</content>\
<options><overwrite>true</overwrite><mode>0644</mode></options></write_file>";

const FENCED_CALL: &str = "Sure, let me check.\n```xml\n<read_file>\n  <path>src/main.rs</path>\n</read_file>\n```";

fn prose(len: usize) -> String {
    "The quick brown fox jumps over the lazy dog. ".repeat(len / 45 + 1)
}

fn sse_stream(text: &str, piece: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut frames: Vec<String> = chars
        .chunks(piece)
        .map(|c| {
            let content: String = c.iter().collect();
            let chunk = json!({
                "id": "chatcmpl-bench",
                "object": "chat.completion.chunk",
                "created": 1_700_000_000,
                "model": "bench",
                "choices": [{"index": 0, "delta": {"content": content}, "finish_reason": null}]
            });
            format!("data: {chunk}\n\n")
        })
        .collect();
    frames.push("data: [DONE]\n\n".to_string());
    frames
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

fn bench_classify(c: &mut Criterion) {
    let tools = known_tools();
    let mut group = c.benchmark_group("classify");

    group.bench_function("plain_text", |b| {
        let text = prose(200);
        b.iter(|| classify_potential_tool_call(black_box(&text), &tools))
    });

    group.bench_function("html_tag", |b| {
        b.iter(|| classify_potential_tool_call(black_box("<div class=\"x\">hello"), &tools))
    });

    group.bench_function("open_tool_tag", |b| {
        b.iter(|| classify_potential_tool_call(black_box("<search><query>rust"), &tools))
    });

    group.bench_function("complete_call", |b| {
        b.iter(|| classify_potential_tool_call(black_box(NESTED_CALL), &tools))
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

fn bench_extract(c: &mut Criterion) {
    let tools = known_tools();
    let mut group = c.benchmark_group("extract");

    group.bench_function("simple", |b| {
        b.iter(|| extract_tool_call(black_box(SIMPLE_CALL), &tools))
    });

    group.bench_function("nested", |b| {
        b.iter(|| extract_tool_call(black_box(NESTED_CALL), &tools))
    });

    group.bench_function("fenced_with_preface", |b| {
        b.iter(|| extract_tool_call(black_box(FENCED_CALL), &tools))
    });

    for len in [1_000, 8_000] {
        let text = format!("{}{SIMPLE_CALL}", prose(len));
        group.bench_with_input(BenchmarkId::new("after_prose", len), &text, |b, text| {
            b.iter(|| extract_tool_call(black_box(text), &tools))
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Incremental detection
// ---------------------------------------------------------------------------

fn bench_advance(c: &mut Criterion) {
    let tools = known_tools();
    let mut group = c.benchmark_group("advance");

    for piece in [1, 8] {
        group.bench_with_input(BenchmarkId::new("nested_call", piece), &piece, |b, &piece| {
            b.iter(|| {
                let mut buffer = String::new();
                let mut state: Option<PartialState> = None;
                for chunk in NESTED_CALL.as_bytes().chunks(piece) {
                    buffer.push_str(std::str::from_utf8(chunk).unwrap_or(""));
                    let outcome = advance(&buffer, &tools, state.as_ref());
                    if outcome.complete {
                        return outcome.tool_call;
                    }
                    state = Some(outcome.state);
                }
                None
            })
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Stream processor
// ---------------------------------------------------------------------------

fn bench_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("openai_stream");

    let cases = [
        ("tool_call", sse_stream(NESTED_CALL, 4)),
        ("plain_text", sse_stream(&prose(2_000), 4)),
    ];
    for (name, frames) in &cases {
        group.bench_with_input(BenchmarkId::new("frames", name), frames, |b, frames| {
            b.iter(|| {
                let mut processor = StreamProcessor::for_formats(
                    WireFormat::OpenAi,
                    WireFormat::OpenAi,
                    StreamOptions::new(known_tools()),
                );
                let mut out = 0usize;
                for frame in frames {
                    processor.feed(frame.as_bytes());
                    out += processor.drain().len();
                    if processor.is_terminated() {
                        break;
                    }
                }
                processor.end();
                out + processor.drain().len()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_classify, bench_extract, bench_advance, bench_stream);
criterion_main!(benches);
