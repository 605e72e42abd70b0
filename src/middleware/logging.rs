//! Request logging and request-id generation.

use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use tower_http::request_id::{MakeRequestId, RequestId};
use tracing::{error, info};
use uuid::Uuid;

/// Generates a UUID v4 for the `x-request-id` header on every request.
#[derive(Clone, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &http::Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        http::HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Logs one line per request with method, path, status and latency.
pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let start = Instant::now();
    let response = next.run(request).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;
    let status = response.status().as_u16();

    if response.status().is_server_error() {
        error!(
            %method,
            path = %path,
            status,
            elapsed_ms,
            request_id = %request_id,
            "Request failed"
        );
    } else {
        info!(
            %method,
            path = %path,
            status,
            elapsed_ms,
            request_id = %request_id,
            "Request completed"
        );
    }
    response
}
