//! JSON-RPC client for a single chain node.
//!
//! Speaks JSON-RPC 2.0 over HTTPS with basic auth, retries transport and
//! server failures with linear backoff, and keeps per-client request
//! metrics in atomics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

const MAX_IDLE_CONNS_PER_HOST: usize = 100;
const IDLE_CONN_TIMEOUT: Duration = Duration::from_secs(90);

/// The identity address carried in every `decryptdata` descriptor envelope.
const DESCRIPTOR_ADDRESS: &str = "iP3euVSzNcXUrLNHnQnR9G6q8jeYuGSxgw";

#[derive(Debug, Error)]
pub enum RpcError {
    /// Non-200 response from the node. The body goes to the log, not here.
    #[error("http error {status}")]
    Http { status: u16 },

    #[error("http request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode rpc response: {0}")]
    Decode(String),

    /// A JSON-RPC error object returned by the node.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The `decryptdata` result did not have the documented shape.
    #[error("unexpected rpc response shape: {0}")]
    Shape(String),

    #[error("rpc call failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<RpcError>,
    },
}

impl RpcError {
    /// Whether the failure may resolve on a retry.
    ///
    /// JSON-RPC errors in the reserved band `[-32099, -32000]` are standard
    /// method/parameter errors and never retried; everything else is.
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcError::Rpc { code, .. } => !is_reserved_band(*code),
            _ => true,
        }
    }

    /// True when the node itself answered with a JSON-RPC error object,
    /// directly or as the terminal cause of an exhausted retry loop.
    pub fn is_node_error(&self) -> bool {
        match self {
            RpcError::Rpc { .. } => true,
            RpcError::Exhausted { source, .. } => source.is_node_error(),
            _ => false,
        }
    }
}

fn is_reserved_band(code: i64) -> bool {
    (-32099..=-32000).contains(&code)
}

/// Configuration for a single-node RPC client.
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    pub timeout: Duration,
    /// Skip TLS certificate verification. Development use only.
    pub tls_insecure: bool,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl RpcClientConfig {
    pub fn new(url: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user: user.into(),
            password: password.into(),
            timeout: DEFAULT_TIMEOUT,
            tls_insecure: false,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Blockchain info as reported by `getinfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainInfo {
    #[serde(default)]
    pub name: String,
    pub blocks: i64,
    pub version: i64,
    pub connections: i64,
    #[serde(default, rename = "longestchain")]
    pub longest_chain: i64,
    #[serde(default)]
    pub testnet: bool,
}

impl ChainInfo {
    /// Whether the node has caught up with the longest known chain.
    pub fn synced(&self) -> bool {
        self.blocks >= self.longest_chain
    }
}

/// Client statistics derived from the atomic counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RpcStats {
    pub requests: u64,
    pub errors: u64,
    pub total_duration: Duration,
    pub average_duration: Duration,
    pub error_rate: f64,
}

pub(crate) fn compute_stats(requests: u64, errors: u64, total_micros: u64) -> RpcStats {
    let total_duration = Duration::from_micros(total_micros);
    let average_duration = if requests > 0 {
        total_duration / requests as u32
    } else {
        Duration::ZERO
    };
    let error_rate = if requests > 0 {
        errors as f64 / requests as f64
    } else {
        0.0
    };
    RpcStats {
        requests,
        errors,
        total_duration,
        average_duration,
        error_rate,
    }
}

/// The node-facing seam. Lets the registry and the file service run
/// against a mock node in tests.
#[async_trait]
pub trait NodeRpc: Send + Sync + std::fmt::Debug {
    /// Issue `decryptdata` and return the hex-encoded payload string.
    async fn decrypt_data(&self, txid: &str, evk: &str) -> Result<String, RpcError>;

    /// Issue `getinfo`.
    async fn get_info(&self) -> Result<ChainInfo, RpcError>;

    fn stats(&self) -> RpcStats;
}

/// A JSON-RPC client bound to one chain node for the process lifetime.
#[derive(Debug)]
pub struct RpcClient {
    config: RpcClientConfig,
    http: reqwest::Client,

    requests: AtomicU64,
    errors: AtomicU64,
    total_duration_micros: AtomicU64,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

impl RpcClient {
    pub fn new(config: RpcClientConfig) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(MAX_IDLE_CONNS_PER_HOST)
            .pool_idle_timeout(IDLE_CONN_TIMEOUT)
            .danger_accept_invalid_certs(config.tls_insecure)
            .build()?;

        Ok(Self {
            config,
            http,
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            total_duration_micros: AtomicU64::new(0),
        })
    }

    /// Make a JSON-RPC call, retrying transport and server failures with
    /// linear backoff (`retry_delay × attempt`). Dropping the returned
    /// future cancels the in-flight request and any pending backoff wait.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay * attempt).await;
            }

            match self.call_once(method, &params).await {
                Ok(result) => return Ok(result),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    debug!(method, attempt, "rpc attempt failed: {e}");
                    last_err = Some(e);
                }
            }
        }

        let attempts = self.config.max_retries + 1;
        Err(RpcError::Exhausted {
            attempts,
            source: Box::new(last_err.expect("at least one attempt was made")),
        })
    }

    async fn call_once(&self, method: &str, params: &[Value]) -> Result<Value, RpcError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();

        let result = self.send(method, params).await;
        match &result {
            Ok(_) => {
                // Latency is recorded for successful attempts only.
                self.total_duration_micros
                    .fetch_add(start.elapsed().as_micros() as u64, Ordering::Relaxed);
            }
            Err(_) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    async fn send(&self, method: &str, params: &[Value]) -> Result<Value, RpcError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.config.url)
            .basic_auth(&self.config.user, Some(&self.config.password))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;

        if status != reqwest::StatusCode::OK {
            warn!(
                %status,
                body = %String::from_utf8_lossy(&bytes),
                "node returned non-200 response"
            );
            return Err(RpcError::Http {
                status: status.as_u16(),
            });
        }

        let parsed: RpcResponse =
            serde_json::from_slice(&bytes).map_err(|e| RpcError::Decode(e.to_string()))?;

        if let Some(err) = parsed.error {
            return Err(RpcError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        Ok(parsed.result.unwrap_or(Value::Null))
    }
}

/// Build the `decryptdata` parameter object with its descriptor envelope.
///
/// The envelope shape is part of the node's wire contract: a versioned
/// `datadescriptor` keyed by the well-known identity address, with a
/// zeroed output reference.
pub(crate) fn decrypt_params(txid: &str, evk: &str) -> Value {
    json!({
        "datadescriptor": {
            "version": 1,
            "flags": 0,
            "objectdata": {
                DESCRIPTOR_ADDRESS: {
                    "type": 0,
                    "version": 1,
                    "flags": 1,
                    "output": { "txid": "0".repeat(64), "voutnum": 0 },
                    "objectnum": 0,
                    "subobject": 0,
                }
            }
        },
        "txid": txid,
        "retrieve": true,
        "evk": evk,
    })
}

#[async_trait]
impl NodeRpc for RpcClient {
    async fn decrypt_data(&self, txid: &str, evk: &str) -> Result<String, RpcError> {
        let result = self
            .call("decryptdata", vec![decrypt_params(txid, evk)])
            .await?;

        // The node replies with an array of objects whose first element
        // carries the hex payload in `objectdata`.
        let array = result
            .as_array()
            .ok_or_else(|| RpcError::Shape("decryptdata result is not an array".into()))?;
        let first = array
            .first()
            .ok_or_else(|| RpcError::Shape("decryptdata returned empty result".into()))?;
        let object_data = first
            .get("objectdata")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::Shape("objectdata field not found or not a string".into()))?;

        Ok(object_data.to_string())
    }

    async fn get_info(&self) -> Result<ChainInfo, RpcError> {
        let result = self.call("getinfo", vec![]).await?;
        serde_json::from_value(result).map_err(|e| RpcError::Decode(e.to_string()))
    }

    fn stats(&self) -> RpcStats {
        compute_stats(
            self.requests.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
            self.total_duration_micros.load(Ordering::Relaxed),
        )
    }
}
