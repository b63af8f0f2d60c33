use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::proxy;
use crate::translate::openai_types::{ChatCompletionRequest, ErrorBody};

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, MethodRouter};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub config: ProxyConfig,
    pub client: reqwest::Client,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    // Answers every OPTIONS request itself with permissive headers and an empty 200
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/chat/completions", chat_endpoint())
        .route("/api/openai-to-cohere", chat_endpoint())
        .route("/health", get(handle_health))
        .route("/v1/models", get(handle_models))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn chat_endpoint() -> MethodRouter<Arc<AppState>> {
    post(handle_chat_completions).fallback(handle_method_not_allowed)
}

async fn handle_chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(api_key) = extract_api_key(&headers, &state.config.auth.api_key_header) else {
        return error_response(&ProxyError::unauthorized(format!(
            "Provide 'Authorization: Bearer <key>' or a '{}' header",
            state.config.auth.api_key_header
        )));
    };

    let req = match parse_request(&body) {
        Ok(r) => r,
        Err(e) => {
            info!(error = %e, "Rejected request");
            return error_response(&e);
        }
    };

    info!(
        model = req.model.as_deref().unwrap_or("<default>"),
        stream = req.is_stream(),
        turns = req.messages.len(),
        "Request"
    );

    if req.is_stream() {
        handle_streaming(state, &req, &api_key).await
    } else {
        handle_non_streaming(state, &req, &api_key).await
    }
}

async fn handle_non_streaming(
    state: Arc<AppState>,
    req: &ChatCompletionRequest,
    api_key: &str,
) -> Response {
    match proxy::proxy_non_streaming(req, api_key, &state.config, &state.client).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => {
            error!(error = %e, "Proxy error");
            error_response(&e)
        }
    }
}

async fn handle_streaming(
    state: Arc<AppState>,
    req: &ChatCompletionRequest,
    api_key: &str,
) -> Response {
    let mut outputs =
        match proxy::proxy_streaming(req, api_key, &state.config, &state.client).await {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "Streaming setup error");
                return error_response(&e);
            }
        };

    // Nothing is committed until the first output exists, so an early failure
    // can still become a proper error response.
    let first = match outputs.next().await {
        Some(Err(e)) => {
            error!(error = %e, "Upstream stream failed before any output");
            return error_response(&e);
        }
        first => first,
    };

    // After the headers are out, a failure just ends the stream
    let events = stream::iter(first).chain(outputs).filter_map(|item| {
        let event = item
            .ok()
            .and_then(|output| output.to_sse_data().ok())
            .map(|data| Ok::<_, Infallible>(Event::default().data(data)));
        futures::future::ready(event)
    });

    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn handle_method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "POST, OPTIONS")],
        Json(ErrorBody::new(
            "Method not allowed",
            "Only POST is supported on this endpoint",
        )),
    )
        .into_response()
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let mut names: Vec<&String> = state.config.models.keys().collect();
    names.push(&state.config.defaults.model);
    names.sort();
    names.dedup();

    let models: Vec<serde_json::Value> = names
        .into_iter()
        .map(|name| {
            serde_json::json!({
                "id": name,
                "object": "model",
                "owned_by": "cohere",
            })
        })
        .collect();

    Json(serde_json::json!({ "data": models, "object": "list" }))
}

/// Parse and validate an inbound chat completion body.
pub fn parse_request(body: &[u8]) -> Result<ChatCompletionRequest> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| ProxyError::validation(format!("Invalid JSON body: {}", e)))?;

    if !value.get("messages").is_some_and(serde_json::Value::is_array) {
        return Err(ProxyError::validation("Messages array is required"));
    }

    serde_json::from_value(value)
        .map_err(|e| ProxyError::validation(format!("Invalid request body: {}", e)))
}

/// The caller's upstream key: `Authorization: Bearer <key>`, else the configured key header.
pub fn extract_api_key(headers: &HeaderMap, api_key_header: &str) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|k| !k.is_empty());

    bearer
        .or_else(|| {
            headers
                .get(api_key_header)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|k| !k.is_empty())
        })
        .map(String::from)
}

fn error_response(err: &ProxyError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorBody::new(err.summary(), err.to_string()))).into_response()
}
