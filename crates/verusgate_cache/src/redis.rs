//! Redis cache backend.
//!
//! Stores a JSON envelope `{content, metadata, retrieved_at}` under the
//! raw cache key with a server-side TTL. The connection is verified at
//! construction; a backend that cannot be reached fails fast.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use verusgate_core::file::{File, FileMetadata};

use crate::{parse_key, Cache, CacheError, CacheStats, DEFAULT_TTL};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_POOL_SIZE: u32 = 10;

#[derive(Debug, Clone)]
pub struct RedisCacheConfig {
    /// Backend addresses as `host:port`; single-instance mode uses the
    /// first entry.
    pub addresses: Vec<String>,
    pub password: String,
    pub db: i64,
    pub max_retries: u32,
    /// Kept for configuration compatibility; the async connection is
    /// multiplexed rather than pooled.
    pub pool_size: u32,
    /// Dial, read and write timeout.
    pub timeout: Duration,
    pub ttl: Duration,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            addresses: vec!["localhost:6379".to_string()],
            password: String::new(),
            db: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            pool_size: DEFAULT_POOL_SIZE,
            timeout: DEFAULT_TIMEOUT,
            ttl: DEFAULT_TTL,
        }
    }
}

/// The JSON shape stored under each key.
#[derive(Serialize, Deserialize)]
struct CacheEnvelope {
    content: Vec<u8>,
    metadata: FileMetadata,
    retrieved_at: DateTime<Utc>,
}

pub struct RedisCache {
    conn: ConnectionManager,
    default_ttl: Duration,

    hits: AtomicU64,
    misses: AtomicU64,
}

fn connection_url(config: &RedisCacheConfig) -> String {
    let address = config
        .addresses
        .first()
        .map(String::as_str)
        .unwrap_or("localhost:6379");
    if config.password.is_empty() {
        format!("redis://{}/{}", address, config.db)
    } else {
        format!("redis://:{}@{}/{}", config.password, address, config.db)
    }
}

impl RedisCache {
    /// Connect and ping the backend. Construction fails when the ping does.
    pub async fn new(config: RedisCacheConfig) -> Result<Self, CacheError> {
        let client = redis::Client::open(connection_url(&config))
            .map_err(|e| CacheError::Backend(format!("invalid redis address: {e}")))?;

        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(config.timeout)
            .set_response_timeout(config.timeout)
            .set_number_of_retries(config.max_retries as usize);

        let mut conn = ConnectionManager::new_with_config(client, manager_config)
            .await
            .map_err(|e| CacheError::Backend(format!("failed to connect to redis: {e}")))?;

        let _: () = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(format!("redis ping failed: {e}")))?;

        Ok(Self {
            conn,
            default_ttl: config.ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<File>, CacheError> {
        let mut conn = self.conn.clone();
        let data: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| CacheError::Backend(format!("redis get failed: {e}")))?;

        let Some(data) = data else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        let envelope: CacheEnvelope = serde_json::from_slice(&data).map_err(|e| {
            self.misses.fetch_add(1, Ordering::Relaxed);
            CacheError::Serialization(format!("failed to decode cache entry: {e}"))
        })?;

        self.hits.fetch_add(1, Ordering::Relaxed);

        let (chain_id, txid) = parse_key(key);
        Ok(Some(File {
            txid,
            chain_id,
            content: envelope.content,
            metadata: envelope.metadata,
            retrieved_at: envelope.retrieved_at,
        }))
    }

    async fn set(&self, key: &str, file: &File, ttl: Duration) -> Result<(), CacheError> {
        let ttl = if ttl.is_zero() { self.default_ttl } else { ttl };

        let envelope = CacheEnvelope {
            content: file.content.clone(),
            metadata: file.metadata.clone(),
            retrieved_at: Utc::now(),
        };
        let data = serde_json::to_vec(&envelope)
            .map_err(|e| CacheError::Serialization(format!("failed to encode cache entry: {e}")))?;

        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, data, ttl.as_secs())
            .await
            .map_err(|e| CacheError::Backend(format!("redis set failed: {e}")))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| CacheError::Backend(format!("redis del failed: {e}")))
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let result: Result<(), _> = redis::cmd("FLUSHDB").query_async(&mut conn).await;
        result.map_err(|e| CacheError::Backend(format!("redis flushdb failed: {e}")))
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let mut conn = self.conn.clone();
        let items: u64 = redis::cmd("DBSIZE")
            .query_async(&mut conn)
            .await
            .unwrap_or(0);

        // The backend does not report total payload size; hits and misses
        // are process-local.
        Ok(CacheStats::with_rate(
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            0,
            items,
        ))
    }

    async fn close(&self) {
        // The multiplexed connection shuts down when the manager drops.
    }
}
