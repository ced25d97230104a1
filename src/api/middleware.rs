//! Request-scope middleware.
//!
//! Every request gets a trace id (from `x-request-id` or a fresh UUID v4)
//! and a [`RequestScope`] holding a client and logger derived for that id.
//! Handlers extract the scope with `Extension<RequestScope>`.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use serde_json::json;

use crate::app_state::AppState;
use crate::db::Client;
use crate::error::ErrorDetail;
use crate::logging::Logger;

/// Header carrying the trace id in both directions.
pub const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

const MAX_TRACE_ID_LEN: usize = 128;

/// Typed per-request values passed down the handler chain.
#[derive(Debug, Clone)]
pub struct RequestScope {
    /// Trace id shared by every log line of this request.
    pub trace_id: String,
    /// Client derived for this request: own logger, empty hook queue.
    pub client: Arc<Client>,
    /// Logger tagged with [`RequestScope::trace_id`].
    pub logger: Logger,
}

fn incoming_trace_id(request: &Request) -> Option<String> {
    request
        .headers()
        .get(&REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= MAX_TRACE_ID_LEN)
        .map(str::to_string)
}

/// Attaches a [`RequestScope`] and echoes the trace id on the response.
///
/// Failed requests are logged through the scope's redacting logger with the
/// full error text that the response body hides.
pub async fn request_scope(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let trace_id =
        incoming_trace_id(&request).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let client = state.client.with_trace_id(trace_id.as_str());
    let logger = client.logger().clone();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    request.extensions_mut().insert(RequestScope {
        trace_id: trace_id.clone(),
        client: Arc::new(client),
        logger: logger.clone(),
    });

    let mut response = next.run(request).await;

    if let Some(ErrorDetail(detail)) = response.extensions().get::<ErrorDetail>() {
        let metadata = json!({
            "method": method.as_str(),
            "path": path,
            "status": response.status().as_u16(),
            "error": detail,
        });
        if response.status().is_server_error() {
            logger.error("request failed", Some(&metadata));
        } else {
            logger.info("request rejected", Some(&metadata));
        }
    }

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(REQUEST_ID, value);
    }
    response
}
