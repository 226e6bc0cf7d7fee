//! Request middleware: correlation ids, HTTP metrics, panic recovery.

use std::any::Any;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{MatchedPath, Request};
use axum::http::header::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::metrics;

pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Correlation id attached to every request.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Attach a fresh request id as an extension and echo it on the response.
///
/// Outermost layer: responses synthesised further in (panics, timeouts)
/// still pick up the header here.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = Uuid::new_v4().to_string();
    req.extensions_mut().insert(RequestId(id.clone()));

    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(X_REQUEST_ID.clone(), value);
    }
    response
}

/// Record request count and latency per method, matched route and status.
pub async fn track_metrics(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    // The route template, not the raw path: keeps label cardinality bounded.
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let start = Instant::now();
    let response = next.run(req).await;
    let elapsed = start.elapsed().as_secs_f64();

    let status = response.status().as_u16();
    metrics::record_http_request(&method, &path, status, elapsed);
    info!(
        method,
        path,
        status,
        elapsed_ms = (elapsed * 1000.0) as u64,
        "request completed"
    );

    response
}

/// Convert an unhandled panic into a 500 with the standard error body.
///
/// Wired through `tower_http::catch_panic::CatchPanicLayer::custom`.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    };
    error!("request handler panicked: {detail}");

    let body = json!({
        "error": "INTERNAL_ERROR",
        "message": "An internal error occurred",
    });

    Response::builder()
        .status(500)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_default()
}
