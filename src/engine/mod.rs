// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

// Engine integration
//
// Wires formats, prompt injection and tool call recovery together for one
// chat request:
// - Detect the backend format and convert the request to it
// - Describe declared tools in the prompt for backends without native tools
// - Forward to the backend
// - Streaming: run the backend stream through a StreamProcessor
// - Non-streaming: decompress, recover tool calls, convert for the client
// - Everything off the chat routes is passed through untouched

use flate2::read::{DeflateDecoder, GzDecoder};

use crate::config::Config;
use crate::format::convert::convert_request;
use crate::format::prompt::{inject_tool_prompt, tool_specs};
use crate::format::{detect_backend_format, OllamaShape, WireFormat};
use crate::nonstream::complete_response;
use crate::proxy::{ProxyError, ProxyRequest, ProxyResponse, UpstreamClient};
use crate::stream::{NarrativePreface, NoPreface, PrefaceHeuristic, StreamOptions, StreamProcessor};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt};
use futures_util::TryStreamExt;
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Request context for structured logging
// ---------------------------------------------------------------------------

struct RequestContext {
    request_id: String,
    client: WireFormat,
    backend: WireFormat,
    model: String,
}

// ---------------------------------------------------------------------------
// Interfaces
// ---------------------------------------------------------------------------

/// Sends HTTP requests to the backend.
#[async_trait]
pub trait HttpSender: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

// ---------------------------------------------------------------------------
// Transport types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub timeout_ms: Option<u64>,
    pub stream: bool,
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, HttpError>> + Send>>;

pub enum HttpBody {
    Full(Bytes),
    Stream(ByteStream),
}

impl HttpBody {
    fn into_stream(self) -> ByteStream {
        match self {
            HttpBody::Full(bytes) => Box::pin(futures_util::stream::iter([Ok(bytes)])),
            HttpBody::Stream(s) => s,
        }
    }

    fn into_axum_body(self) -> Body {
        match self {
            HttpBody::Full(bytes) => Body::from(bytes),
            HttpBody::Stream(s) => Body::from_stream(s),
        }
    }

    async fn collect(self) -> Result<Bytes, HttpError> {
        match self {
            HttpBody::Full(bytes) => Ok(bytes),
            HttpBody::Stream(mut s) => {
                let mut collected = Vec::new();
                while let Some(chunk) = s.next().await {
                    collected.extend_from_slice(&chunk?);
                }
                Ok(Bytes::from(collected))
            }
        }
    }
}

pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: HttpBody,
}

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("upstream request timed out: {0}")]
    Timeout(String),
}

impl From<HttpError> for ProxyError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Timeout(msg) => ProxyError::UpstreamTimeout(msg),
            HttpError::Transport(msg) => ProxyError::UpstreamFailure(msg),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine dependencies
// ---------------------------------------------------------------------------

pub struct EngineDeps {
    pub config: Arc<Config>,
    pub http: Arc<dyn HttpSender>,
    /// Narrative lead-in detection for streamed tool calls.
    pub preface: Arc<dyn PrefaceHeuristic>,
}

// ---------------------------------------------------------------------------
// EngineUpstreamClient
// ---------------------------------------------------------------------------

/// Upstream client that translates formats and recovers tool calls.
pub struct EngineUpstreamClient {
    deps: EngineDeps,
}

impl EngineUpstreamClient {
    pub fn new_with(deps: EngineDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl UpstreamClient for EngineUpstreamClient {
    async fn chat(
        &self,
        client: WireFormat,
        request: ProxyRequest,
    ) -> Result<ProxyResponse, ProxyError> {
        let body: Value = serde_json::from_slice(&request.body)
            .map_err(|e| ProxyError::MalformedJson(e.to_string()))?;
        let config = &self.deps.config;

        let ctx = RequestContext {
            request_id: Uuid::new_v4().to_string(),
            client,
            backend: detect_backend_format(&request.headers, config.backend.format),
            model: extract_model(&body),
        };
        let stream = is_streaming_request(&body);
        let shape = OllamaShape::of(&body);

        tracing::debug!(
            request_id = %ctx.request_id,
            client_format = %ctx.client,
            backend_format = %ctx.backend,
            model = %ctx.model,
            stream,
            "processing chat request"
        );

        // 1) Tools the client declared; these drive tool call recovery
        let tools = tool_specs(&body);
        let known_tools: Vec<String> = tools.iter().map(|t| t.name.clone()).collect();

        // 2) Backend payload
        let mut payload = convert_request(ctx.client, ctx.backend, &body);
        if !tools.is_empty() {
            inject_tool_prompt(&mut payload, &tools, &config.tools.reinjection);
            tracing::debug!(
                request_id = %ctx.request_id,
                tools = known_tools.len(),
                "tool instructions injected"
            );
        }
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("stream".into(), Value::Bool(stream));
        }
        let has_messages = payload.get("messages").is_some_and(Value::is_array);
        let payload = serde_json::to_vec(&payload)
            .map_err(|e| ProxyError::InvalidRequest(format!("failed to encode backend payload: {e}")))?;

        // 3) Forward
        let http_req = HttpRequest {
            method: Method::POST,
            url: config.backend.chat_url(ctx.backend, has_messages),
            headers: backend_headers(config, ctx.client, &request.headers),
            body: Bytes::from(payload),
            timeout_ms: config.backend.timeout_ms,
            stream,
        };
        tracing::debug!(request_id = %ctx.request_id, url = %http_req.url, "forwarding to backend");

        let upstream = self.deps.http.send(http_req).await.map_err(|e| {
            tracing::warn!(request_id = %ctx.request_id, error = %e, "backend request failed");
            ProxyError::from(e)
        })?;

        if !upstream.status.is_success() {
            tracing::warn!(
                request_id = %ctx.request_id,
                status = upstream.status.as_u16(),
                "backend returned an error status, relaying"
            );
            return Ok(relay(upstream));
        }

        if stream {
            if is_gzip(&upstream.headers) || is_deflate(&upstream.headers) {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    "streaming response has Content-Encoding; passing through without decompression"
                );
            }
            return Ok(self.handle_streaming_response(upstream, known_tools, shape, &ctx));
        }

        let mut resp_headers = upstream.headers;
        let body_bytes = upstream.body.collect().await?;
        let body_bytes = maybe_decompress(&mut resp_headers, body_bytes)?;
        let out = complete_response(&body_bytes, ctx.client, ctx.backend, &known_tools, shape);

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        tracing::info!(
            request_id = %ctx.request_id,
            client_format = %ctx.client,
            backend_format = %ctx.backend,
            model = %ctx.model,
            "chat request completed"
        );
        Ok(ProxyResponse {
            status: upstream.status,
            headers,
            body: Body::from(out),
        })
    }

    async fn passthrough(&self, request: ProxyRequest) -> Result<ProxyResponse, ProxyError> {
        let path_and_query = request
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or(request.uri.path());
        let url = format!("{}{}", self.deps.config.backend.base_url, path_and_query);

        let mut headers = request.headers;
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        tracing::debug!(method = %request.method, url = %url, "passthrough request");
        let upstream = self
            .deps
            .http
            .send(HttpRequest {
                method: request.method,
                url,
                headers,
                body: request.body,
                timeout_ms: self.deps.config.backend.timeout_ms,
                stream: true,
            })
            .await?;
        Ok(relay(upstream))
    }
}

impl EngineUpstreamClient {
    fn handle_streaming_response(
        &self,
        upstream: HttpResponse,
        known_tools: Vec<String>,
        shape: OllamaShape,
        ctx: &RequestContext,
    ) -> ProxyResponse {
        let preface: Arc<dyn PrefaceHeuristic> = if self.deps.config.tools.suppress_preface {
            self.deps.preface.clone()
        } else {
            Arc::new(NoPreface)
        };
        let options = StreamOptions::new(known_tools)
            .with_preface(preface)
            .with_ollama_shape(shape);
        let processor = StreamProcessor::for_formats(ctx.client, ctx.backend, options);

        let span = tracing::info_span!(
            "stream",
            request_id = %ctx.request_id,
            client_format = %ctx.client,
            backend_format = %ctx.backend,
            model = %ctx.model,
        );
        let frames = processor.process(upstream.body.into_stream(), span);
        let body_stream = frames.map(Ok::<Bytes, std::convert::Infallible>);

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(ctx.client.stream_content_type()),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        ProxyResponse {
            status: upstream.status,
            headers,
            body: Body::from_stream(body_stream),
        }
    }
}

// ---------------------------------------------------------------------------
// Reqwest HTTP sender
// ---------------------------------------------------------------------------

pub struct ReqwestHttpSender {
    client: reqwest::Client,
}

impl ReqwestHttpSender {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpSender for ReqwestHttpSender {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let mut req = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers)
            .body(request.body);

        if let Some(timeout_ms) = request.timeout_ms {
            req = req.timeout(std::time::Duration::from_millis(timeout_ms));
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                HttpError::Timeout(e.to_string())
            } else {
                HttpError::Transport(e.to_string())
            }
        })?;

        let status = resp.status();
        let headers = resp.headers().clone();

        if request.stream {
            let stream = resp.bytes_stream().map_err(|e| {
                if e.is_timeout() {
                    HttpError::Timeout(e.to_string())
                } else {
                    HttpError::Transport(e.to_string())
                }
            });
            Ok(HttpResponse {
                status,
                headers,
                body: HttpBody::Stream(Box::pin(stream)),
            })
        } else {
            let body = resp
                .bytes()
                .await
                .map_err(|e| HttpError::Transport(e.to_string()))?;
            Ok(HttpResponse {
                status,
                headers,
                body: HttpBody::Full(body),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Public factory for default engine client
// ---------------------------------------------------------------------------

pub fn build_engine_client(config: Arc<Config>) -> EngineUpstreamClient {
    let deps = EngineDeps {
        config,
        http: Arc::new(ReqwestHttpSender::new(reqwest::Client::new())),
        preface: Arc::new(NarrativePreface::default()),
    };

    EngineUpstreamClient::new_with(deps)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Check if the response has gzip Content-Encoding.
fn is_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("gzip"))
        .unwrap_or(false)
}

/// Check if the response has deflate Content-Encoding.
fn is_deflate(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("deflate"))
        .unwrap_or(false)
}

fn decompress(mut reader: impl std::io::Read, encoding: &str) -> Result<Bytes, ProxyError> {
    let mut decompressed = Vec::new();
    reader
        .read_to_end(&mut decompressed)
        .map_err(|e| ProxyError::UpstreamFailure(format!("{encoding} decompression failed: {e}")))?;
    Ok(Bytes::from(decompressed))
}

/// Decompress body if Content-Encoding is set. Strips Content-Encoding and
/// Content-Length from headers (body size changed after decompression).
fn maybe_decompress(headers: &mut HeaderMap, body: Bytes) -> Result<Bytes, ProxyError> {
    let result = if is_gzip(headers) {
        decompress(GzDecoder::new(&body[..]), "gzip")?
    } else if is_deflate(headers) {
        decompress(DeflateDecoder::new(&body[..]), "deflate")?
    } else {
        return Ok(body);
    };
    headers.remove(header::CONTENT_ENCODING);
    headers.remove(header::CONTENT_LENGTH);
    Ok(result)
}

/// Headers for a backend chat request.
///
/// The configured API key wins; without one an OpenAI client's own
/// `Authorization` is forwarded.
fn backend_headers(config: &Config, client: WireFormat, client_headers: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

    match &config.backend.api_key {
        Some(key) => match HeaderValue::from_str(&format!("Bearer {key}")) {
            Ok(value) => {
                headers.insert(header::AUTHORIZATION, value);
            }
            Err(_) => tracing::warn!("configured api_key is not a valid header value, not sent"),
        },
        None if client == WireFormat::OpenAi => {
            if let Some(auth) = client_headers.get(header::AUTHORIZATION) {
                headers.insert(header::AUTHORIZATION, auth.clone());
            }
        }
        None => {}
    }

    let optional = [
        ("http-referer", config.backend.referer.as_deref()),
        ("x-title", config.backend.title.as_deref()),
    ];
    for (name, value) in optional {
        if let Some(value) = value.and_then(|v| HeaderValue::from_str(v).ok()) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
    headers
}

/// Response relayed to the client as the backend sent it.
fn relay(upstream: HttpResponse) -> ProxyResponse {
    let mut headers = upstream.headers;
    headers.remove(header::TRANSFER_ENCODING);
    headers.remove(header::CONNECTION);
    ProxyResponse {
        status: upstream.status,
        headers,
        body: upstream.body.into_axum_body(),
    }
}

fn extract_model(body: &Value) -> String {
    body.get("model")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_default()
}

fn is_streaming_request(body: &Value) -> bool {
    body.get("stream").and_then(Value::as_bool).unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
