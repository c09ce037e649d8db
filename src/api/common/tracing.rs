//! Request tracing hooks wired into `tower_http::trace::TraceLayer`.

use axum::http::{HeaderMap, Request, Response};
use std::collections::HashMap;
use std::time::Duration;
use tower_http::classify::ServerErrorsFailureClass;
use tracing::{info_span, Span};

fn is_sensitive(name: &str) -> bool {
    let name = name.to_lowercase();
    name.contains("authorization") || name.contains("cookie") || name.contains("token")
}

/// Header map for logging with credentials replaced.
pub fn redacted_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            if is_sensitive(name.as_str()) {
                Some((name.to_string(), "[REDACTED]".to_string()))
            } else {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            }
        })
        .collect()
}

pub fn make_custom_span<B>(request: &Request<B>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    info_span!(
        "http_request",
        method = %request.method(),
        uri = %request.uri().path(),
        query = ?request.uri().query(),
        version = ?request.version(),
        request_id = request_id,
        user_agent = ?request.headers().get("user-agent"),
    )
}

pub fn on_custom_request<B>(request: &Request<B>, _span: &Span) {
    tracing::info!(
        method = %request.method(),
        uri = %request.uri(),
        headers = ?redacted_headers(request.headers()),
        "Incoming HTTP request"
    );
}

pub fn on_custom_response<B>(response: &Response<B>, latency: Duration, _span: &Span) {
    let status = response.status();
    let latency_ms = latency.as_millis();

    match status.as_u16() {
        400..=499 => tracing::warn!(
            status = %status,
            latency_ms = latency_ms,
            "HTTP request completed with client error"
        ),
        500..=599 => tracing::error!(
            status = %status,
            latency_ms = latency_ms,
            "HTTP request completed with server error"
        ),
        _ => tracing::info!(
            status = %status,
            latency_ms = latency_ms,
            "HTTP request completed successfully"
        ),
    }
}

pub fn on_custom_failure(error: ServerErrorsFailureClass, latency: Duration, _span: &Span) {
    let error_type = match &error {
        ServerErrorsFailureClass::StatusCode(code) => format!("HTTP {}", code.as_u16()),
        ServerErrorsFailureClass::Error(_) => "Internal Error".to_string(),
    };

    tracing::error!(
        error = ?error,
        latency_ms = latency.as_millis(),
        error_type = error_type,
        "HTTP request failed"
    );
}
