//! Decryption adapter over the node's `decryptdata` RPC.

use std::sync::Arc;

use verusgate_core::error::GatewayError;
use verusgate_core::file::{validate_evk, validate_txid};

use crate::client::{NodeRpc, RpcError};

/// Drives `decryptdata` for one request and decodes the returned hex.
pub struct Decryptor {
    client: Arc<dyn NodeRpc>,
}

impl Decryptor {
    pub fn new(client: Arc<dyn NodeRpc>) -> Self {
        Self { client }
    }

    /// Fetch and decode the decrypted payload for a transaction.
    ///
    /// Txid and viewing key are validated here as preconditions; an invalid
    /// value never reaches the node.
    pub async fn decrypt_data(&self, txid: &str, evk: &str) -> Result<Vec<u8>, GatewayError> {
        validate_txid(txid)?;
        validate_evk(evk)?;

        let hex_data = self
            .client
            .decrypt_data(txid, evk)
            .await
            .map_err(|e| classify_rpc_failure(txid, e))?;

        // The node's contract is to return well-formed hex; a decode
        // failure means the payload shape is broken, not the transport.
        hex::decode(hex_data.trim()).map_err(|e| GatewayError::DecryptionFailed {
            txid: txid.to_string(),
            reason: format!("failed to decode hex data: {e}"),
        })
    }
}

/// Map an RPC failure out of `decryptdata` to a domain error.
///
/// A JSON-RPC error object means the node answered and knows no
/// decryptable payload for the transaction; transport-level failures are
/// gateway-to-node problems.
fn classify_rpc_failure(txid: &str, err: RpcError) -> GatewayError {
    if err.is_node_error() {
        return GatewayError::NotFound {
            resource: "transaction",
            id: txid.to_string(),
        };
    }
    match err {
        RpcError::Shape(reason) => GatewayError::DecryptionFailed {
            txid: txid.to_string(),
            reason,
        },
        other => GatewayError::RpcFailed {
            method: "decryptdata",
            detail: other.to_string(),
        },
    }
}
