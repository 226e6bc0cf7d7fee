//! HTTP handlers.
//!
//! The only place where domain errors become status codes and client
//! JSON. Every error body carries the request's correlation id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{AppendHeaders, IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::error;
use verusgate_chain::ChainRegistry;
use verusgate_core::error::GatewayError;
use verusgate_core::file::{is_valid_txid, File, FileRequest};

use crate::metrics;
use crate::middleware::RequestId;
use crate::service::{CacheStatus, FileService};

const READINESS_TIMEOUT: Duration = Duration::from_secs(30);

/// State shared across request handlers.
///
/// Cloned per request by axum; everything inside is a shared reference.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FileService>,
    pub registry: Arc<ChainRegistry>,
    pub version: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct FileQuery {
    pub txid: Option<String>,
    pub evk: Option<String>,
    /// Set to skip the cache for this request.
    pub no_cache: Option<bool>,
}

fn error_response(err: &GatewayError, request_id: &str) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    // Internal failures keep their detail in the log, not the body.
    let message = if err.code() == "INTERNAL_ERROR" {
        "An internal error occurred".to_string()
    } else {
        err.to_string()
    };
    error!(request_id, code = err.code(), "request failed: {err}");

    let mut body = json!({
        "error": err.code(),
        "message": message,
        "request_id": request_id,
    });
    let details = err.details();
    if !details.is_null() {
        body["details"] = details;
    }

    (status, Json(body)).into_response()
}

/// Backslash-escape backslashes and quotes for a quoted header value.
fn sanitize_filename(filename: &str) -> String {
    filename.replace('\\', "\\\\").replace('"', "\\\"")
}

fn file_response(file: &File, cache_status: CacheStatus) -> Response {
    let content_type = if file.metadata.content_type.is_empty() {
        "application/octet-stream".to_string()
    } else {
        file.metadata.content_type.clone()
    };

    let mut headers = vec![
        ("Content-Type", content_type),
        (
            "Cache-Control",
            "public, max-age=31536000, immutable".to_string(),
        ),
        ("ETag", format!("\"{}\"", file.txid)),
        ("X-Cache-Status", cache_status.as_str().to_string()),
    ];
    // Metadata can be lost for cached entries; only assert a length we know.
    if file.metadata.size > 0 {
        headers.push(("Content-Length", file.metadata.size.to_string()));
    }
    if !file.metadata.filename.is_empty() {
        headers.push((
            "Content-Disposition",
            format!(
                "inline; filename=\"{}\"",
                sanitize_filename(&file.metadata.filename)
            ),
        ));
    }

    metrics::record_file_served(file.metadata.size);

    (StatusCode::OK, AppendHeaders(headers), file.content.clone()).into_response()
}

/// Derive a [`FileRequest`] from the URL segment and query parameters.
///
/// A 64-hex segment is the transaction id itself; anything else is a
/// filename, with the id expected in `?txid=`.
fn build_file_request(chain: String, segment: String, query: FileQuery) -> FileRequest {
    let use_cache = !query.no_cache.unwrap_or(false);
    let evk = query.evk.unwrap_or_default();

    if is_valid_txid(&segment) {
        FileRequest {
            txid: segment,
            evk,
            chain_id: chain,
            filename: String::new(),
            use_cache,
        }
    } else {
        FileRequest {
            txid: query.txid.unwrap_or_default(),
            evk,
            chain_id: chain,
            filename: segment,
            use_cache,
        }
    }
}

/// GET/HEAD `/c/{chain}/file/{segment}`
pub async fn get_file(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path((chain, segment)): Path<(String, String)>,
    Query(query): Query<FileQuery>,
) -> Response {
    let mut req = build_file_request(chain, segment, query);

    match state.service.get_file(&req).await {
        Ok((mut file, cache_status)) => {
            // The URL-supplied name wins when the stored metadata has none.
            if !req.filename.is_empty() && file.metadata.filename.is_empty() {
                file.metadata.filename = std::mem::take(&mut req.filename);
            }
            file_response(&file, cache_status)
        }
        Err(err) => error_response(&err, &request_id),
    }
}

/// GET `/c/{chain}/meta/{txid}`
pub async fn get_meta(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path((chain, txid)): Path<(String, String)>,
    Query(query): Query<FileQuery>,
) -> Response {
    let req = FileRequest {
        txid: txid.clone(),
        evk: query.evk.unwrap_or_default(),
        chain_id: chain.clone(),
        filename: String::new(),
        use_cache: !query.no_cache.unwrap_or(false),
    };

    match state.service.get_metadata(&req).await {
        Ok(meta) => Json(json!({
            "txid": txid,
            "chain": chain,
            "filename": meta.filename,
            "size": meta.size,
            "content_type": meta.content_type,
            "extension": meta.extension,
            "compressed": meta.compressed,
        }))
        .into_response(),
        Err(err) => error_response(&err, &request_id),
    }
}

/// GET `/health` — liveness; always healthy while the process runs.
pub async fn health(State(state): State<AppState>) -> Response {
    Json(json!({
        "status": "healthy",
        "version": state.version,
    }))
    .into_response()
}

/// GET `/ready` — readiness; 200 iff at least one chain answers `getinfo`.
///
/// Runs under its own deadline, independent of the request timeout.
pub async fn ready(State(state): State<AppState>) -> Response {
    let results =
        match tokio::time::timeout(READINESS_TIMEOUT, state.registry.health_check_all()).await {
            Ok(results) => results,
            Err(_) => HashMap::new(),
        };

    let mut errors = HashMap::new();
    let mut healthy = false;
    for (chain_id, result) in &results {
        match result {
            Ok(_) => healthy = true,
            Err(e) => {
                errors.insert(chain_id.clone(), e.to_string());
            }
        }
    }

    if healthy {
        Json(json!({
            "status": "ready",
            "version": state.version,
        }))
        .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "reason": "no healthy chains available",
                "chains": errors,
            })),
        )
            .into_response()
    }
}

/// GET `/chains`
pub async fn list_chains(State(state): State<AppState>) -> Response {
    let default_chain = state.registry.default_chain_id().to_string();
    let chains: Vec<_> = state
        .registry
        .chain_entries()
        .iter()
        .map(|entry| {
            json!({
                "id": entry.id,
                "name": entry.name,
                "default": entry.id == default_chain,
            })
        })
        .collect();

    Json(json!({
        "count": chains.len(),
        "chains": chains,
    }))
    .into_response()
}

/// GET `/metrics` — Prometheus exposition.
pub async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    // Pull current cache and RPC state into the gauges before rendering.
    if let Ok(stats) = state.service.cache_stats().await {
        metrics::update_cache_stats(&stats);
    }
    for (chain, stats) in state.registry.client_stats() {
        metrics::update_rpc_stats(&chain, stats.requests, stats.errors);
    }

    (
        [("Content-Type", "text/plain; version=0.0.4")],
        metrics::encode(),
    )
        .into_response()
}

/// GET `/admin/cache/stats`
pub async fn cache_stats(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
) -> Response {
    match state.service.cache_stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(err) => error_response(&err, &request_id),
    }
}

/// DELETE `/admin/cache`
pub async fn clear_cache(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
) -> Response {
    match state.service.clear_cache().await {
        Ok(()) => Json(json!({ "message": "cache cleared successfully" })).into_response(),
        Err(err) => error_response(&err, &request_id),
    }
}

/// DELETE `/admin/cache/{key}`
pub async fn delete_cache_entry(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(key): Path<String>,
) -> Response {
    match state.service.delete_from_cache(&key).await {
        Ok(()) => Json(json!({
            "message": format!("cache entry {key} deleted successfully"),
        }))
        .into_response(),
        Err(err) => error_response(&err, &request_id),
    }
}
