//! HTTP surface: `GET /v1/models`, `POST /v1/chat/completions`, JSON 404 fallback.

use crate::gateway::GatewayContext;
use crate::types::RawChatRequest;
use crate::{Error, ErrorContext, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, info_span, warn, Instrument};

pub const HEADER_CACHE: &str = "x-cache";
pub const HEADER_CACHE_TIER: &str = "x-cache-tier";
pub const HEADER_RESPONSE_TIME: &str = "x-response-time";
pub const HEADER_REQUEST_ID: &str = "x-request-id";

pub fn build_router(ctx: Arc<GatewayContext>) -> Router {
    Router::new()
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(chat_completions))
        .fallback(not_found)
        .with_state(ctx)
}

/// Permissive CORS, applied by the binary when `server.cors` is on.
pub fn with_cors(router: Router) -> Router {
    router.layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(Any)
            .max_age(Duration::from_secs(86400)),
    )
}

/// Serve until `shutdown` fires, then finish in-flight responses.
pub async fn serve(listener: TcpListener, app: Router, shutdown: CancellationToken) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "listening");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(Error::Io)
}

async fn list_models(State(ctx): State<Arc<GatewayContext>>) -> Response {
    let data: Vec<_> = ctx
        .models()
        .into_iter()
        .map(|id| json!({ "id": id, "object": "model" }))
        .collect();
    Json(json!({ "data": data, "success": true })).into_response()
}

async fn chat_completions(State(ctx): State<Arc<GatewayContext>>, body: Bytes) -> Response {
    // axum runs connections on their own tasks, so the worker id is attached here.
    let request_id = uuid::Uuid::new_v4().to_string();
    let span = info_span!("request", worker_id = ctx.worker_id, request_id = %request_id);
    respond(ctx, body, request_id).instrument(span).await
}

async fn respond(ctx: Arc<GatewayContext>, body: Bytes, request_id: String) -> Response {
    let started = Instant::now();

    let mut response = match serde_json::from_slice::<RawChatRequest>(&body) {
        Err(e) => error_response(
            &Error::invalid_request_with_context(
                "Invalid JSON body",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("http"),
            ),
            ctx.dev_mode,
        ),
        Ok(raw) => match tokio::time::timeout(ctx.request_timeout, ctx.chat(raw)).await {
            Ok(Ok(outcome)) => {
                let mut resp = (StatusCode::OK, Json(&outcome.response)).into_response();
                let headers = resp.headers_mut();
                headers.insert(
                    HEADER_CACHE,
                    HeaderValue::from_static(outcome.cache.header_value()),
                );
                if let Some(tier) = outcome.cache.tier() {
                    headers.insert(HEADER_CACHE_TIER, HeaderValue::from_static(tier.as_str()));
                }
                resp
            }
            Ok(Err(e)) => error_response(&e, ctx.dev_mode),
            Err(_) => error_response(
                &Error::timeout(format!(
                    "request exceeded {} ms",
                    ctx.request_timeout.as_millis()
                )),
                ctx.dev_mode,
            ),
        },
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    if let Ok(v) = HeaderValue::from_str(&elapsed_ms.to_string()) {
        response.headers_mut().insert(HEADER_RESPONSE_TIME, v);
    }
    if let Ok(v) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(HEADER_REQUEST_ID, v);
    }
    info!(
        status = response.status().as_u16(),
        cache = response
            .headers()
            .get(HEADER_CACHE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-"),
        elapsed_ms,
        "chat completion"
    );
    response
}

async fn not_found() -> Response {
    error_response(&Error::not_found("route"), false)
}

/// JSON error body for `err`. Internal detail is only exposed in dev mode.
pub fn error_response(err: &Error, dev_mode: bool) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = match err {
        Error::Timeout { message } => json!({
            "error": err.public_message(),
            "message": message,
        }),
        Error::InvalidRequest { context, .. } => {
            let mut body = json!({ "error": err.public_message() });
            if let Some(ref field) = context.field_path {
                body["field"] = json!(field);
            }
            body
        }
        _ if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE => {
            error!(error = %err, "request failed");
            if dev_mode {
                json!({ "error": err.public_message(), "details": err.to_string() })
            } else {
                json!({ "error": err.public_message() })
            }
        }
        _ => {
            if status == StatusCode::SERVICE_UNAVAILABLE {
                warn!(error = %err, "request cancelled");
            }
            json!({ "error": err.public_message() })
        }
    };
    (status, Json(body)).into_response()
}
