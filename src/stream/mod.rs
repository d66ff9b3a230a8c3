// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

// Streaming tool-call interception
//
// Responsibilities:
// - Pick one processor per streaming request from (client, backend) format
// - Intercept XML tool calls in streamed text and re-emit them as structured
//   tool call events in the client's framing
// - Pass everything else through, reshaped when the formats differ
// - Reassemble split UTF-8 and split JSON chunks
// - Memory-bounded: 10 KiB tool call candidate, 1 MiB JSON repair buffer
// - Terminate the client response exactly once, on end, error, or tool call

mod cross;
mod heuristics;
mod intercept;
mod json_repair;
mod ollama;
mod openai;
mod sse;
mod types;

pub use cross::CrossFormatProcessor;
pub use heuristics::{NarrativePreface, NoPreface, PrefaceHeuristic};
pub use intercept::{Intercepted, Interception, ToolCallInterceptor};
pub use json_repair::{JsonRepairBuffer, MAX_REPAIR_BYTES};
pub use ollama::OllamaProcessor;
pub use openai::OpenAiProcessor;
pub use sse::{parse_sse_line, SseLine, DONE_FRAME, STREAM_ERROR_CODE};
pub use types::{ResponseSink, StreamError, Utf8Decoder};

use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use crate::format::{OllamaShape, WireFormat};

/// Frames buffered between the processor task and the client response.
const CHANNEL_CAPACITY: usize = 64;

/// Per-request inputs shared by every processor variant.
#[derive(Clone)]
pub struct StreamOptions {
    pub known_tools: Vec<String>,
    pub preface: Arc<dyn PrefaceHeuristic>,
    /// Ollama endpoint shape the client expects, when it speaks Ollama.
    pub ollama_shape: OllamaShape,
}

impl StreamOptions {
    pub fn new(known_tools: Vec<String>) -> Self {
        Self {
            known_tools,
            preface: Arc::new(NarrativePreface::default()),
            ollama_shape: OllamaShape::default(),
        }
    }

    pub fn with_preface(mut self, preface: Arc<dyn PrefaceHeuristic>) -> Self {
        self.preface = preface;
        self
    }

    pub fn with_ollama_shape(mut self, shape: OllamaShape) -> Self {
        self.ollama_shape = shape;
        self
    }
}

/// One streaming response's processor, chosen once per request.
pub enum StreamProcessor {
    OpenAi(OpenAiProcessor),
    Ollama(OllamaProcessor),
    CrossFormat(CrossFormatProcessor),
}

impl StreamProcessor {
    /// Processor for a backend speaking `backend` and a client expecting
    /// `client`. Preface suppression only applies to OpenAI clients.
    pub fn for_formats(client: WireFormat, backend: WireFormat, options: StreamOptions) -> Self {
        let preface = match client {
            WireFormat::OpenAi => options.preface,
            WireFormat::Ollama => Arc::new(NoPreface) as Arc<dyn PrefaceHeuristic>,
        };
        match (backend, client) {
            (WireFormat::OpenAi, WireFormat::OpenAi) => {
                StreamProcessor::OpenAi(OpenAiProcessor::new(options.known_tools, preface))
            }
            (WireFormat::Ollama, WireFormat::Ollama) => StreamProcessor::Ollama(
                OllamaProcessor::new(options.known_tools, preface, options.ollama_shape),
            ),
            (source, target) => StreamProcessor::CrossFormat(CrossFormatProcessor::new(
                source,
                target,
                options.known_tools,
                preface,
                options.ollama_shape,
            )),
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        match self {
            StreamProcessor::OpenAi(p) => p.feed(chunk),
            StreamProcessor::Ollama(p) => p.feed(chunk),
            StreamProcessor::CrossFormat(p) => p.feed(chunk),
        }
    }

    pub fn end(&mut self) {
        match self {
            StreamProcessor::OpenAi(p) => p.end(),
            StreamProcessor::Ollama(p) => p.end(),
            StreamProcessor::CrossFormat(p) => p.end(),
        }
    }

    pub fn on_error(&mut self, err: &StreamError) {
        match self {
            StreamProcessor::OpenAi(p) => p.on_error(err),
            StreamProcessor::Ollama(p) => p.on_error(err),
            StreamProcessor::CrossFormat(p) => p.on_error(err),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.sink().is_closed()
    }

    /// Frames written since the last drain, in order.
    pub fn drain(&mut self) -> Vec<Bytes> {
        self.sink_mut().drain()
    }

    fn sink(&self) -> &ResponseSink {
        match self {
            StreamProcessor::OpenAi(p) => &p.sink,
            StreamProcessor::Ollama(p) => &p.sink,
            StreamProcessor::CrossFormat(p) => &p.sink,
        }
    }

    fn sink_mut(&mut self) -> &mut ResponseSink {
        match self {
            StreamProcessor::OpenAi(p) => &mut p.sink,
            StreamProcessor::Ollama(p) => &mut p.sink,
            StreamProcessor::CrossFormat(p) => &mut p.sink,
        }
    }

    /// Run the processor over `source` on its own task. The returned stream
    /// yields client frames and closes when the response is terminated.
    pub fn process<S, E>(self, source: S, span: tracing::Span) -> ReceiverStream<Bytes>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
        tokio::spawn(pipe(self, source, tx).instrument(span));
        ReceiverStream::new(rx)
    }
}

/// Drive `processor` with every item of `source`, forwarding its output to
/// `tx`. Returns once the response is terminated, the source is exhausted,
/// or the client has gone away.
pub async fn pipe<S, E>(mut processor: StreamProcessor, mut source: S, tx: mpsc::Sender<Bytes>)
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    while let Some(item) = source.next().await {
        match item {
            Ok(chunk) => processor.feed(&chunk),
            Err(e) => processor.on_error(&StreamError::Upstream(e.to_string())),
        }
        if !forward(&mut processor, &tx).await {
            tracing::debug!("client disconnected, abandoning stream");
            return;
        }
        if processor.is_terminated() {
            return;
        }
    }
    processor.end();
    forward(&mut processor, &tx).await;
}

async fn forward(processor: &mut StreamProcessor, tx: &mpsc::Sender<Bytes>) -> bool {
    for frame in processor.drain() {
        if tx.send(frame).await.is_err() {
            return false;
        }
    }
    true
}
