// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

// HTTP server
//
// Responsibilities:
// - Chat routes for both protocols, client format detected per request
// - Request validation with protocol-shaped error bodies
// - Forwarding via injected UpstreamClient trait
// - Health endpoint
// - Generic passthrough for every other path

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::format::{detect_request_format, WireFormat};

/// Largest request body accepted.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// Inbound request data forwarded to the upstream client.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Response handed back to the client.
#[derive(Debug)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

impl ProxyResponse {
    fn into_http(self) -> axum::response::Response {
        let mut response = Response::new(self.body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Errors that can occur while handling a request.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("upstream request failed: {0}")]
    UpstreamFailure(String),

    #[error("upstream request timed out: {0}")]
    UpstreamTimeout(String),

    #[error("request body is not valid JSON: {0}")]
    MalformedJson(String),

    #[error("request body is empty")]
    EmptyBody,

    #[error("request body exceeds {MAX_BODY_BYTES} bytes")]
    BodyTooLarge,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::MalformedJson(_) | ProxyError::EmptyBody | ProxyError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ProxyError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    /// Message safe to show the client. Upstream details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            ProxyError::UpstreamFailure(_) => "upstream request failed".to_string(),
            ProxyError::UpstreamTimeout(_) => "upstream request timed out".to_string(),
            ProxyError::MalformedJson(_) => "request body is not valid JSON".to_string(),
            other => other.to_string(),
        }
    }

    /// Error response shaped the way `format` clients expect.
    pub fn into_response_for(self, format: WireFormat) -> axum::response::Response {
        let status = self.status();
        let message = self.public_message();
        let body = match format {
            WireFormat::OpenAi => {
                let kind = if status.is_server_error() {
                    "upstream_error"
                } else {
                    "invalid_request_error"
                };
                json!({"error": {"message": message, "type": kind, "code": null}})
            }
            WireFormat::Ollama => json!({"error": message}),
        };
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        self.into_response_for(WireFormat::OpenAi)
    }
}

// ---------------------------------------------------------------------------
// Trait: UpstreamClient (dependency injection point)
// ---------------------------------------------------------------------------

/// Abstraction over whatever serves requests behind the router.
///
/// Implementations must be Send + Sync so they can be shared across request
/// handlers via `Arc`.
#[async_trait::async_trait]
pub trait UpstreamClient: Send + Sync {
    /// A validated chat request from a `client`-format caller.
    async fn chat(
        &self,
        client: WireFormat,
        request: ProxyRequest,
    ) -> Result<ProxyResponse, ProxyError>;

    /// Any other request, forwarded as is.
    async fn passthrough(&self, request: ProxyRequest) -> Result<ProxyResponse, ProxyError>;
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check that a chat body carries what its protocol requires.
pub fn validate_chat_request(client: WireFormat, body: &Value) -> Result<(), ProxyError> {
    if !body.is_object() {
        return Err(ProxyError::InvalidRequest(
            "request body must be a JSON object".into(),
        ));
    }
    match client {
        WireFormat::OpenAi if !body.get("messages").is_some_and(Value::is_array) => Err(
            ProxyError::InvalidRequest("missing \"messages\" in OpenAI request body".into()),
        ),
        WireFormat::Ollama if body.get("prompt").is_none() && body.get("messages").is_none() => {
            Err(ProxyError::InvalidRequest(
                "missing \"prompt\" or \"messages\" in Ollama request body".into(),
            ))
        }
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// Shared state injected into axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<dyn UpstreamClient>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /health -> 200 {"status":"ok"}
pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// Chat handler shared by the OpenAI and Ollama routes.
pub async fn chat_handler(State(state): State<AppState>, request: Request<Body>) -> Response<Body> {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();

    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "failed to read request body");
            let format = route_format(&path);
            return ProxyError::BodyTooLarge.into_response_for(format);
        }
    };

    if body.is_empty() {
        return ProxyError::EmptyBody.into_response_for(route_format(&path));
    }
    let json: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            return ProxyError::MalformedJson(e.to_string()).into_response_for(route_format(&path))
        }
    };

    let client = detect_request_format(&parts.headers, &json, &path);
    if let Err(e) = validate_chat_request(client, &json) {
        tracing::debug!(path = %path, client_format = %client, error = %e, "rejected chat request");
        return e.into_response_for(client);
    }

    let request = ProxyRequest {
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
        body,
    };
    match state.upstream.chat(client, request).await {
        Ok(resp) => resp.into_http(),
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "chat request failed");
            e.into_response_for(client)
        }
    }
}

/// Every path without a route of its own.
pub async fn passthrough_handler(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Response<Body> {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(_) => return ProxyError::BodyTooLarge.into_response(),
    };
    let request = ProxyRequest {
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
        body,
    };
    match state.upstream.passthrough(request).await {
        Ok(resp) => resp.into_http(),
        Err(e) => {
            tracing::warn!(error = %e, "passthrough request failed");
            e.into_response()
        }
    }
}

/// Format implied by the route alone, for errors raised before the body is
/// readable.
fn route_format(path: &str) -> WireFormat {
    if path.starts_with("/api/") {
        WireFormat::Ollama
    } else {
        WireFormat::OpenAi
    }
}

// ---------------------------------------------------------------------------
// Router construction
// ---------------------------------------------------------------------------

/// Build the axum router with the chat routes, health and passthrough.
///
/// The upstream client is injected; no side effects, no hard-coded clients.
pub fn build_router(upstream: Arc<dyn UpstreamClient>) -> Router {
    let state = AppState { upstream };

    Router::new()
        .route("/health", get(health))
        .route("/v1/chat/completions", post(chat_handler))
        .route("/chat/completions", post(chat_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/generate", post(chat_handler))
        .fallback(passthrough_handler)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
