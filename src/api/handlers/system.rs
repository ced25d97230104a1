//! System endpoints: health check.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::api::middleware::RequestScope;
use crate::app_state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
    timestamp: String,
    version: String,
}

/// `GET /health` — Service and database health.
///
/// Always answers 200; `status` is `"degraded"` when the database ping
/// fails so load balancers can tell the process is alive. The ping runs on
/// the request's client so it is logged under the request's trace id.
pub async fn health_handler(Extension(scope): Extension<RequestScope>) -> impl IntoResponse {
    let database = match scope.client.query_row::<(i32,)>("SELECT 1", &[]).await {
        Ok(_) => "up",
        Err(_) => "unavailable",
    };
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: if database == "up" { "healthy" } else { "degraded" },
            database,
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// System routes mounted at the root level (not under /api/v1).
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_handler))
}
