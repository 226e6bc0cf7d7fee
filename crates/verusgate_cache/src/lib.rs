//! File cache interface and its realisations.
//!
//! The gateway treats the cache as a keyed store of complete [`File`]
//! values with a TTL. A miss is a normal outcome, not an error. Two
//! backends exist: a local filesystem store with LRU eviction and a size
//! ceiling, and a Redis store with native TTLs.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use verusgate_core::file::File;

pub mod filesystem;
pub mod redis;

pub use filesystem::{FilesystemCache, FilesystemCacheConfig};
pub use redis::{RedisCache, RedisCacheConfig};

/// Default entry lifetime shared by both backends.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache serialization error: {0}")]
    Serialization(String),

    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Total stored bytes; 0 when the backend cannot report it.
    pub size: u64,
    pub items: u64,
    /// `hits / (hits + misses)`, 0 when nothing was looked up yet.
    pub hit_rate: f64,
}

impl CacheStats {
    pub(crate) fn with_rate(hits: u64, misses: u64, size: u64, items: u64) -> Self {
        let total = hits + misses;
        let hit_rate = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };
        Self {
            hits,
            misses,
            size,
            items,
            hit_rate,
        }
    }
}

/// Keyed store of files with a TTL.
///
/// Implementations are shared behind `Arc` and must be safe for
/// concurrent use. Dropping a pending call cancels it.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch an entry. `None` is a miss; expired entries are misses and
    /// are removed.
    async fn get(&self, key: &str) -> Result<Option<File>, CacheError>;

    /// Store an entry, overwriting any previous value for the key.
    async fn set(&self, key: &str, file: &File, ttl: Duration) -> Result<(), CacheError>;

    /// Remove an entry. Removing an absent key is a no-op.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Remove all entries.
    async fn clear(&self) -> Result<(), CacheError>;

    async fn stats(&self) -> Result<CacheStats, CacheError>;

    /// Stop background work. Idempotent.
    async fn close(&self);
}

/// Split a `{chain}:{txid}[:encrypted]` cache key back into its parts.
///
/// Returns empty strings for keys that do not follow the format; such
/// entries still round-trip their content and metadata.
pub(crate) fn parse_key(key: &str) -> (String, String) {
    let mut parts = key.splitn(3, ':');
    let chain = parts.next().unwrap_or_default().to_string();
    let txid = parts.next().unwrap_or_default().to_string();
    (chain, txid)
}
