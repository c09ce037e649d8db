use axum::http::StatusCode;
use axum::response::IntoResponse;

/// Liveness only. Catalog availability is reported through the event stream.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
