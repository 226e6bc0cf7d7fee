//! Domain errors.
//!
//! Every failure the gateway can surface to a client is one of these
//! variants. Each carries a stable machine-readable code and a suggested
//! HTTP status; only the HTTP layer turns them into wire responses.
//! Messages never contain viewing keys or RPC credentials.

use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid input: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    #[error("chain error: {reason}")]
    ChainError { chain_id: String, reason: String },

    #[error("{resource} not found")]
    NotFound { resource: &'static str, id: String },

    #[error("rpc call failed: {method}")]
    RpcFailed { method: &'static str, detail: String },

    #[error("failed to decrypt data: {reason}")]
    DecryptionFailed { txid: String, reason: String },

    #[error("decompression failed: {reason}")]
    DecompressionFailed { reason: String },

    #[error("cache not configured")]
    CacheNotConfigured,

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable error code, written into client-facing JSON bodies.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InvalidInput { .. } => "INVALID_INPUT",
            GatewayError::ChainError { .. } => "CHAIN_ERROR",
            GatewayError::NotFound { .. } => "NOT_FOUND",
            GatewayError::RpcFailed { .. } => "RPC_ERROR",
            GatewayError::DecryptionFailed { .. } => "DECRYPTION_FAILED",
            GatewayError::DecompressionFailed { .. } => "DECOMPRESSION_FAILED",
            GatewayError::CacheNotConfigured => "CACHE_NOT_CONFIGURED",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Suggested HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            GatewayError::InvalidInput { .. } | GatewayError::ChainError { .. } => 400,
            GatewayError::NotFound { .. } => 404,
            GatewayError::RpcFailed { .. } => 502,
            GatewayError::DecryptionFailed { .. }
            | GatewayError::DecompressionFailed { .. }
            | GatewayError::CacheNotConfigured
            | GatewayError::Internal(_) => 500,
        }
    }

    /// Additional machine-readable context for the error body.
    ///
    /// Returns `Value::Null` when there is nothing beyond code and message.
    pub fn details(&self) -> Value {
        match self {
            GatewayError::InvalidInput { field, reason } => {
                json!({ "field": field, "reason": reason })
            }
            GatewayError::ChainError { chain_id, reason } => {
                json!({ "chain_id": chain_id, "reason": reason })
            }
            GatewayError::NotFound { resource, id } => {
                json!({ "resource": resource, "id": id })
            }
            GatewayError::RpcFailed { method, .. } => json!({ "method": method }),
            GatewayError::DecryptionFailed { txid, .. } => json!({ "txid": txid }),
            GatewayError::DecompressionFailed { reason } => json!({ "reason": reason }),
            _ => Value::Null,
        }
    }

    pub fn invalid_input(field: &'static str, reason: impl Into<String>) -> Self {
        GatewayError::InvalidInput {
            field,
            reason: reason.into(),
        }
    }

    pub fn chain_error(chain_id: impl Into<String>, reason: impl Into<String>) -> Self {
        GatewayError::ChainError {
            chain_id: chain_id.into(),
            reason: reason.into(),
        }
    }
}

/// Render a short masked hint for a secret, e.g. `zx****f3`.
///
/// Debug logging only; never enough to reconstruct the value.
pub fn mask_secret(secret: &str) -> String {
    if secret.len() < 8 {
        return "****".to_string();
    }
    format!("{}****{}", &secret[..2], &secret[secret.len() - 2..])
}
