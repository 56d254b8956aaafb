//! HTTP middleware: access log and failure capture

use axum::body::{Body, Bytes};
use axum::extract::{Query, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use shared::error::{AppError, ErrorCode};
use std::collections::BTreeMap;
use std::time::Instant;

use crate::auth::JwtService;
use crate::core::ServerState;
use crate::observability::FailedRequest;
use crate::observability::alerts::AlertKind;
use crate::observability::replay::REPLAY_HEADER;

/// Largest body kept for capture; larger requests are refused
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

pub async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    tracing::info!(
        target: "http_access",
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        request_id = %request_id,
        "request"
    );
    response
}

fn should_capture(request: &Request) -> bool {
    let path = request.uri().path();
    path.starts_with("/api/")
        && !path.starts_with("/api/observability")
        && !request.headers().contains_key(REPLAY_HEADER)
}

/// Venue of the caller: token claim, else `venue_id` in body or query
fn venue_of(
    state: &ServerState,
    headers: &http::HeaderMap,
    body: &Value,
    query: &BTreeMap<String, String>,
) -> Option<String> {
    headers
        .get(http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(JwtService::extract_from_header)
        .and_then(|token| state.jwt.validate_token(token).ok())
        .map(|claims| claims.venue_id)
        .or_else(|| body.get("venue_id").and_then(Value::as_str).map(str::to_string))
        .or_else(|| query.get("venue_id").cloned())
}

/// Record every API failure in the error inbox
///
/// The response is returned unchanged; a failed capture is only logged.
pub async fn capture_failures(
    State(state): State<ServerState>,
    request: Request,
    next: Next,
) -> Response {
    if !should_capture(&request) {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(_) => {
            return AppError::with_message(ErrorCode::InvalidRequest, "Request body too large")
                .into_response();
        }
    };
    let method = parts.method.to_string();
    let path = parts.uri.path().to_string();
    let query: BTreeMap<String, String> = Query::try_from_uri(&parts.uri)
        .map(|Query(q)| q)
        .unwrap_or_default();
    let headers = parts.headers.clone();

    let response = next
        .run(Request::from_parts(parts, Body::from(bytes.clone())))
        .await;
    let status = response.status();
    if status.as_u16() < 400 {
        return response;
    }

    let (res_parts, res_body) = response.into_parts();
    let res_bytes = axum::body::to_bytes(res_body, MAX_BODY_BYTES)
        .await
        .unwrap_or_else(|_| Bytes::new());

    let body_json = parse_json(&bytes);
    let response_json = parse_json(&res_bytes);
    if response_json.get("code").and_then(Value::as_str) == Some("LEDGER_TAMPERED") {
        state.alerts.raise(
            AlertKind::LedgerTampered,
            path.clone(),
            format!("{method} {path} refused on a broken ledger chain"),
        );
    }

    match venue_of(&state, &headers, &body_json, &query) {
        Some(venue_id) => {
            let failed = FailedRequest {
                venue_id,
                method,
                path,
                query,
                body: body_json,
                status_code: status.as_u16(),
                response: response_json,
            };
            let inbox = state.inbox.clone();
            match tokio::task::spawn_blocking(move || inbox.capture(failed)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Failed to capture request failure"),
                Err(e) => tracing::warn!(error = %e, "Capture task failed"),
            }
        }
        None => tracing::debug!(path = %path, "Failure without venue, not captured"),
    }

    Response::from_parts(res_parts, Body::from(res_bytes))
}

fn parse_json(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes).unwrap_or(Value::Null)
}
