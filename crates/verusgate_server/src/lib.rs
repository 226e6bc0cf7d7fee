//! HTTP server for the Verus file gateway.
//!
//! Wires the file service, chain registry and cache behind an axum
//! router, and runs it with signal-driven graceful shutdown.

use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info};

pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod service;

pub use routes::AppState;
pub use service::{CacheStatus, FileService, FileServiceConfig};

const DEFAULT_MAX_REQUEST_SIZE: usize = 32 * 1024 * 1024;

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Per-request deadline.
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub idle_timeout: Duration,
    /// How long a graceful drain may take before the process force-exits.
    pub shutdown_timeout: Duration,
    pub max_request_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(120),
            shutdown_timeout: Duration::from_secs(30),
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
        }
    }
}

/// Build the gateway router with its middleware stack.
pub fn router(state: AppState, config: &ServerConfig) -> Router {
    metrics::register();

    Router::new()
        .route("/health", get(routes::health))
        .route("/ready", get(routes::ready))
        .route("/chains", get(routes::list_chains))
        .route("/metrics", get(routes::prometheus_metrics))
        .route("/c/{chain}/file/{segment}", get(routes::get_file))
        .route("/c/{chain}/meta/{txid}", get(routes::get_meta))
        .route("/admin/cache/stats", get(routes::cache_stats))
        .route("/admin/cache", delete(routes::clear_cache))
        .route("/admin/cache/{key}", delete(routes::delete_cache_entry))
        .layer(DefaultBodyLimit::max(config.max_request_size))
        .layer(TimeoutLayer::new(config.read_timeout))
        .layer(CatchPanicLayer::custom(middleware::handle_panic))
        .layer(axum::middleware::from_fn(middleware::track_metrics))
        .layer(axum::middleware::from_fn(middleware::request_id))
        .with_state(state)
}

/// Bind and serve until SIGINT/SIGTERM, then drain gracefully.
pub async fn run(config: ServerConfig, state: AppState) -> Result<()> {
    let app = router(state, &config);
    let addr = format!("{}:{}", config.host, config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("HTTP server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.shutdown_timeout))
        .await
        .context("HTTP server failed")?;

    info!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal(shutdown_timeout: Duration) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining connections");

    // A drain that outlives shutdown_timeout is force-exited.
    tokio::spawn(async move {
        tokio::time::sleep(shutdown_timeout).await;
        error!("shutdown timeout exceeded, forcing exit");
        std::process::exit(1);
    });
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tempfile::tempdir;
    use tower::ServiceExt;
    use verusgate_cache::{Cache, FilesystemCache, FilesystemCacheConfig};
    use verusgate_chain::client::{ChainInfo, NodeRpc, RpcError, RpcStats};
    use verusgate_chain::registry::{ChainEntry, ChainRegistry};

    use super::*;

    const TXID: &str = "004b2d1e74351bf361f2555e4254481a3aee9f5db173ff2eeff07e6ae540ba47";

    #[derive(Debug)]
    struct MockNode {
        payload_hex: String,
        healthy: bool,
    }

    #[async_trait]
    impl NodeRpc for MockNode {
        async fn decrypt_data(&self, _txid: &str, _evk: &str) -> Result<String, RpcError> {
            Ok(self.payload_hex.clone())
        }

        async fn get_info(&self) -> Result<ChainInfo, RpcError> {
            if !self.healthy {
                return Err(RpcError::Http { status: 502 });
            }
            Ok(ChainInfo {
                name: "VRSCTEST".into(),
                blocks: 10,
                version: 1,
                connections: 2,
                longest_chain: 10,
                testnet: true,
            })
        }

        fn stats(&self) -> RpcStats {
            RpcStats {
                requests: 0,
                errors: 0,
                total_duration: Duration::ZERO,
                average_duration: Duration::ZERO,
                error_rate: 0.0,
            }
        }
    }

    fn evk() -> String {
        format!("zxviews{}", "a1".repeat(50))
    }

    fn state_with(
        payload: &[u8],
        healthy: bool,
        cache: Option<Arc<dyn Cache>>,
    ) -> AppState {
        let mut chains: HashMap<String, Arc<dyn NodeRpc>> = HashMap::new();
        chains.insert(
            "vrsctest".into(),
            Arc::new(MockNode {
                payload_hex: hex::encode(payload),
                healthy,
            }),
        );
        let entries = vec![ChainEntry {
            id: "vrsctest".into(),
            name: "Verus Testnet".into(),
        }];
        let registry =
            Arc::new(ChainRegistry::with_clients(chains, entries, "vrsctest".into()).unwrap());
        let service = Arc::new(FileService::new(
            registry.clone(),
            cache,
            FileServiceConfig::default(),
        ));
        AppState {
            service,
            registry,
            version: "test".into(),
        }
    }

    fn app(state: AppState) -> Router {
        router(state, &ServerConfig::default())
    }

    async fn get(app: &Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();
        (status, headers, body)
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
        let (status, _, body) = get(app, uri).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_is_always_healthy() {
        let app = app(state_with(b"x", true, None));
        let (status, body) = get_json(&app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["version"], "test");
    }

    #[tokio::test]
    async fn every_response_carries_a_request_id() {
        let app = app(state_with(b"x", true, None));
        let (_, headers, _) = get(&app, "/health").await;
        assert!(headers.contains_key("x-request-id"));

        // Error responses too.
        let (_, headers, _) = get(&app, "/c/vrsctest/file/zzz").await;
        assert!(headers.contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn malformed_segment_without_txid_is_invalid_input() {
        let app = app(state_with(b"x", true, None));
        let (status, body) = get_json(&app, "/c/vrsctest/file/zzz").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "INVALID_INPUT");
        assert!(body["request_id"].is_string());
    }

    #[tokio::test]
    async fn missing_viewing_key_is_rejected() {
        let app = app(state_with(b"x", true, None));
        let (status, body) = get_json(&app, &format!("/c/vrsctest/file/{TXID}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "INVALID_INPUT");
        assert_eq!(body["details"]["field"], "evk");
    }

    #[tokio::test]
    async fn unknown_chain_is_a_chain_error() {
        // No evk in the URL: chain resolution fails before the decrypt
        // stage ever demands a key.
        let app = app(state_with(b"x", true, None));
        let (status, body) = get_json(&app, &format!("/c/foo/file/{TXID}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "CHAIN_ERROR");
    }

    #[tokio::test]
    async fn file_by_txid_serves_detected_content() {
        let app = app(state_with(b"Hello, World!", true, None));
        let (status, headers, body) =
            get(&app, &format!("/c/vrsctest/file/{TXID}?evk={}", evk())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"Hello, World!");
        assert_eq!(
            headers.get("content-type").unwrap(),
            "text/plain; charset=utf-8"
        );
        assert_eq!(headers.get("etag").unwrap(), &format!("\"{TXID}\""));
        assert_eq!(
            headers.get("cache-control").unwrap(),
            "public, max-age=31536000, immutable"
        );
        // No cache configured: neither hit nor miss.
        assert_eq!(headers.get("x-cache-status").unwrap(), "BYPASS");
    }

    #[tokio::test]
    async fn cache_status_goes_miss_then_hit() {
        let dir = tempdir().unwrap();
        let cache: Arc<dyn Cache> =
            FilesystemCache::new(FilesystemCacheConfig::new(dir.path())).unwrap();
        let app = app(state_with(b"Hello, World!", true, Some(cache)));
        let uri = format!("/c/vrsctest/file/{TXID}?evk={}", evk());

        let (_, headers, _) = get(&app, &uri).await;
        assert_eq!(headers.get("x-cache-status").unwrap(), "MISS");

        // The cache set is detached from the request.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (_, headers, body) = get(&app, &uri).await;
        assert_eq!(headers.get("x-cache-status").unwrap(), "HIT");
        assert_eq!(body, b"Hello, World!");
    }

    #[tokio::test]
    async fn file_by_filename_sets_disposition_and_mime() {
        let gif = b"GIF89a\x01\x00\x01\x00\x80\x00\x00\x00\x00\x00\xff\xff\xff\x00\x00\x00";
        let app = app(state_with(gif, true, None));
        let (status, headers, _) = get(
            &app,
            &format!("/c/vrsctest/file/lee.gif?txid={TXID}&evk={}", evk()),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get("content-type").unwrap(), "image/gif");
        assert_eq!(
            headers.get("content-disposition").unwrap(),
            "inline; filename=\"lee.gif\""
        );
    }

    #[tokio::test]
    async fn meta_returns_the_metadata_view() {
        let app = app(state_with(b"Hello, World!", true, None));
        let (status, body) =
            get_json(&app, &format!("/c/vrsctest/meta/{TXID}?evk={}", evk())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["txid"], TXID);
        assert_eq!(body["chain"], "vrsctest");
        assert_eq!(body["size"], 13);
        assert_eq!(body["content_type"], "text/plain; charset=utf-8");
        assert_eq!(body["extension"], "txt");
        assert_eq!(body["compressed"], false);
    }

    #[tokio::test]
    async fn chains_lists_configured_chains() {
        let app = app(state_with(b"x", true, None));
        let (status, body) = get_json(&app, "/chains").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["chains"][0]["id"], "vrsctest");
        assert_eq!(body["chains"][0]["default"], true);
    }

    #[tokio::test]
    async fn readiness_follows_chain_health() {
        let healthy_app = app(state_with(b"x", true, None));
        let (status, body) = get_json(&healthy_app, "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");

        let app = app(state_with(b"x", false, None));
        let (status, body) = get_json(&app, "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");
        assert!(body["chains"]["vrsctest"].is_string());
    }

    #[tokio::test]
    async fn ready_with_one_healthy_chain_of_two() {
        let mut chains: HashMap<String, Arc<dyn NodeRpc>> = HashMap::new();
        chains.insert(
            "vrsctest".into(),
            Arc::new(MockNode {
                payload_hex: String::new(),
                healthy: true,
            }),
        );
        chains.insert(
            "vrsc".into(),
            Arc::new(MockNode {
                payload_hex: String::new(),
                healthy: false,
            }),
        );
        let entries = vec![
            ChainEntry {
                id: "vrsctest".into(),
                name: "Verus Testnet".into(),
            },
            ChainEntry {
                id: "vrsc".into(),
                name: "Verus".into(),
            },
        ];
        let registry =
            Arc::new(ChainRegistry::with_clients(chains, entries, "vrsctest".into()).unwrap());
        let service = Arc::new(FileService::new(
            registry.clone(),
            None,
            FileServiceConfig::default(),
        ));
        let app = app(AppState {
            service,
            registry,
            version: "test".into(),
        });

        let (status, body) = get_json(&app, "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
    }

    #[tokio::test]
    async fn metrics_exposition_renders() {
        let app = app(state_with(b"x", true, None));
        let (status, _, body) = get(&app, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("verusgate_"));
    }

    #[tokio::test]
    async fn cache_admin_without_cache_reports_missing_cache() {
        let app = app(state_with(b"x", true, None));
        let (status, body) = get_json(&app, "/admin/cache/stats").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "CACHE_NOT_CONFIGURED");
    }

    #[tokio::test]
    async fn cache_admin_clear_and_delete() {
        let dir = tempdir().unwrap();
        let cache: Arc<dyn Cache> =
            FilesystemCache::new(FilesystemCacheConfig::new(dir.path())).unwrap();
        let app = app(state_with(b"x", true, Some(cache)));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/admin/cache")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(&format!("/admin/cache/vrsctest:{TXID}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let (status, body) = get_json(&app, "/admin/cache/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"], 0);
    }
}
