//! File service: orchestrates cache, chain RPC, decompression and
//! type detection for one request.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};
use verusgate_cache::{Cache, CacheStats};
use verusgate_chain::{ChainRegistry, Decryptor};
use verusgate_core::decompress::Decompressor;
use verusgate_core::detect::Detector;
use verusgate_core::error::GatewayError;
use verusgate_core::file::{File, FileMetadata, FileRequest};

use crate::metrics;

const CACHE_SET_TIMEOUT: Duration = Duration::from_secs(5);
const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_MAX_DECOMPRESSED_SIZE: u64 = 100 * 1024 * 1024;

/// Where the served bytes came from, for the `X-Cache-Status` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    /// Caching was disabled for the request or not configured at all.
    Bypass,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileServiceConfig {
    /// Decompressed-size ceiling for gzip payloads.
    pub max_decompressed_size: u64,
    /// Serve the raw payload instead of failing when decompression errors.
    pub decompress_fallback: bool,
}

impl Default for FileServiceConfig {
    fn default() -> Self {
        Self {
            max_decompressed_size: DEFAULT_MAX_DECOMPRESSED_SIZE,
            decompress_fallback: true,
        }
    }
}

pub struct FileService {
    registry: Arc<ChainRegistry>,
    cache: Option<Arc<dyn Cache>>,
    decompressor: Decompressor,
    detector: Detector,
    decompress_fallback: bool,
}

impl FileService {
    pub fn new(
        registry: Arc<ChainRegistry>,
        cache: Option<Arc<dyn Cache>>,
        config: FileServiceConfig,
    ) -> Self {
        Self {
            registry,
            cache,
            decompressor: Decompressor::new(config.max_decompressed_size),
            detector: Detector::new(),
            decompress_fallback: config.decompress_fallback,
        }
    }

    /// Retrieve a file: cache, then node RPC, decrypt, decompress, detect.
    ///
    /// The trailing cache population runs on a detached task with its own
    /// timeout so client-side cancellation cannot void it.
    pub async fn get_file(&self, req: &FileRequest) -> Result<(File, CacheStatus), GatewayError> {
        req.validate()?;
        let cache_key = req.cache_key();

        let mut status = CacheStatus::Bypass;
        if req.use_cache {
            if let Some(cache) = &self.cache {
                match cache.get(&cache_key).await {
                    Ok(Some(file)) => {
                        debug!(key = %cache_key, "cache hit");
                        metrics::record_cache_hit();
                        return Ok((file, CacheStatus::Hit));
                    }
                    Ok(None) => {
                        metrics::record_cache_miss();
                        status = CacheStatus::Miss;
                    }
                    // A broken cache is a miss, not a request failure.
                    Err(e) => {
                        warn!(key = %cache_key, "cache lookup failed: {e}");
                        status = CacheStatus::Miss;
                    }
                }
            }
        }

        let chain_id = (!req.chain_id.is_empty()).then_some(req.chain_id.as_str());
        let client = self.registry.resolve(chain_id)?;

        let decryptor = Decryptor::new(client);
        let raw = decryptor.decrypt_data(&req.txid, &req.evk).await?;

        let content = if self.decompress_fallback {
            self.decompressor.try_decompress(&raw)
        } else {
            self.decompressor.decompress(&raw)?
        };

        let mut metadata = self.detector.detect(&content, &req.filename);
        // `compressed` describes the on-chain payload, not the delivered bytes.
        metadata.compressed = Decompressor::is_gzipped(&raw);
        metadata.encrypted = !req.evk.is_empty();

        let file = File {
            txid: req.txid.clone(),
            chain_id: req.chain_id.clone(),
            content,
            metadata,
            retrieved_at: Utc::now(),
        };

        if req.use_cache {
            if let Some(cache) = self.cache.clone() {
                let stored = file.clone();
                tokio::spawn(async move {
                    let result =
                        tokio::time::timeout(CACHE_SET_TIMEOUT, cache.set(&cache_key, &stored, CACHE_TTL))
                            .await;
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!(key = %cache_key, "failed to cache file: {e}"),
                        Err(_) => warn!(key = %cache_key, "cache population timed out"),
                    }
                });
            }
        }

        Ok((file, status))
    }

    /// Metadata for a file. Costs a full retrieval: the metadata comes from
    /// inspecting the decrypted bytes.
    pub async fn get_metadata(&self, req: &FileRequest) -> Result<FileMetadata, GatewayError> {
        let (file, _) = self.get_file(req).await?;
        Ok(file.metadata)
    }

    pub async fn clear_cache(&self) -> Result<(), GatewayError> {
        let cache = self.cache.as_ref().ok_or(GatewayError::CacheNotConfigured)?;
        cache
            .clear()
            .await
            .map_err(|e| GatewayError::Internal(format!("failed to clear cache: {e}")))
    }

    pub async fn cache_stats(&self) -> Result<CacheStats, GatewayError> {
        let cache = self.cache.as_ref().ok_or(GatewayError::CacheNotConfigured)?;
        cache
            .stats()
            .await
            .map_err(|e| GatewayError::Internal(format!("failed to get cache stats: {e}")))
    }

    pub async fn delete_from_cache(&self, key: &str) -> Result<(), GatewayError> {
        let cache = self.cache.as_ref().ok_or(GatewayError::CacheNotConfigured)?;
        cache
            .delete(key)
            .await
            .map_err(|e| GatewayError::Internal(format!("failed to delete cache entry: {e}")))
    }
}
