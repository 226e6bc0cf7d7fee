//! File model and request validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// A file retrieved from the blockchain.
///
/// Immutable once produced; the cache stores exactly this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    /// Transaction ID containing the file.
    pub txid: String,

    /// Blockchain identifier the file was fetched from.
    pub chain_id: String,

    /// Delivered file content (post-decompression).
    pub content: Vec<u8>,

    pub metadata: FileMetadata,

    /// When the file was retrieved from the node or cache.
    pub retrieved_at: DateTime<Utc>,
}

/// Metadata about a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Original filename, may be empty.
    pub filename: String,

    /// Size of the delivered bytes.
    pub size: u64,

    /// Detected MIME type.
    pub content_type: String,

    /// File extension without the leading dot.
    pub extension: String,

    /// SHA-256 of the delivered content, hex encoded.
    pub hash: String,

    /// Whether the on-chain payload was gzip compressed.
    pub compressed: bool,

    /// Whether the payload required a viewing key.
    pub encrypted: bool,

    /// When the file was stored on chain, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A request to retrieve a file.
#[derive(Debug, Clone, Default)]
pub struct FileRequest {
    /// Transaction ID, 64 hex characters.
    pub txid: String,

    /// Encryption viewing key. Required by the node's decrypt envelope.
    pub evk: String,

    /// Blockchain identifier; empty selects the default chain.
    pub chain_id: String,

    /// Expected filename when the URL addressed the file by name.
    pub filename: String,

    pub use_cache: bool,
}

const MAX_FILENAME_LEN: usize = 255;
const MAX_CHAIN_ID_LEN: usize = 32;
const EVK_MIN_LEN: usize = 95;
const EVK_MAX_LEN: usize = 500;
const EVK_PREFIX: &str = "zxviews";

/// True iff `s` is a well-formed transaction id: exactly 64 hex characters.
pub fn is_valid_txid(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn is_valid_chain_id(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_CHAIN_ID_LEN
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn is_safe_filename_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '(' | ')' | ' ' | '[' | ']')
}

/// Validate a viewing key: `zxviews` prefix, 95-500 chars, base36-ish tail.
pub fn validate_evk(evk: &str) -> Result<(), GatewayError> {
    if evk.len() < EVK_MIN_LEN || evk.len() > EVK_MAX_LEN {
        return Err(GatewayError::invalid_input(
            "evk",
            "viewing key has invalid length (must be 95-500 characters)",
        ));
    }
    let tail = match evk.strip_prefix(EVK_PREFIX) {
        Some(tail) => tail,
        None => {
            return Err(GatewayError::invalid_input(
                "evk",
                "viewing key has invalid format (must start with 'zxviews')",
            ))
        }
    };
    if !tail
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    {
        return Err(GatewayError::invalid_input(
            "evk",
            "viewing key contains invalid characters",
        ));
    }
    Ok(())
}

/// Validate a transaction id.
pub fn validate_txid(txid: &str) -> Result<(), GatewayError> {
    if txid.is_empty() {
        return Err(GatewayError::invalid_input("txid", "txid is required"));
    }
    if txid.len() != 64 {
        return Err(GatewayError::invalid_input(
            "txid",
            "txid must be exactly 64 characters",
        ));
    }
    if !is_valid_txid(txid) {
        return Err(GatewayError::invalid_input(
            "txid",
            "txid must be valid hex (0-9, a-f)",
        ));
    }
    Ok(())
}

/// Validate a filename: bounded length, no path traversal, safe characters.
pub fn validate_filename(filename: &str) -> Result<(), GatewayError> {
    if filename.len() > MAX_FILENAME_LEN {
        return Err(GatewayError::invalid_input(
            "filename",
            "filename too long (max 255 characters)",
        ));
    }
    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        return Err(GatewayError::invalid_input(
            "filename",
            "filename contains invalid path characters",
        ));
    }
    if filename.is_empty() || !filename.chars().all(is_safe_filename_char) {
        return Err(GatewayError::invalid_input(
            "filename",
            "filename contains invalid characters",
        ));
    }
    Ok(())
}

impl FileRequest {
    /// Validate the whole request.
    ///
    /// Must pass before any downstream component is called. The viewing key
    /// is only format-checked here when present; the decrypt stage demands
    /// one, after chain and cache resolution.
    pub fn validate(&self) -> Result<(), GatewayError> {
        validate_txid(&self.txid)?;

        if self.chain_id.is_empty() {
            return Err(GatewayError::invalid_input(
                "chain_id",
                "chain_id is required",
            ));
        }
        if !is_valid_chain_id(&self.chain_id) {
            return Err(GatewayError::invalid_input(
                "chain_id",
                "chain_id contains invalid characters (max 32 of [A-Za-z0-9_-])",
            ));
        }

        if !self.filename.is_empty() {
            validate_filename(&self.filename)?;
        }

        if !self.evk.is_empty() {
            validate_evk(&self.evk)?;
        }

        Ok(())
    }

    /// Cache key for this request.
    ///
    /// The viewing key itself never appears in the key; any non-empty key
    /// collapses to a single `:encrypted` suffix.
    pub fn cache_key(&self) -> String {
        if self.evk.is_empty() {
            format!("{}:{}", self.chain_id, self.txid)
        } else {
            format!("{}:{}:encrypted", self.chain_id, self.txid)
        }
    }
}
