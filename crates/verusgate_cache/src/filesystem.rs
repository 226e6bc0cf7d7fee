//! Local filesystem cache.
//!
//! Entries are stored under `SHA256(key)[0..2]/SHA256(key)` as a `.bin`
//! payload plus a best-effort `.meta` metadata JSON. The `.bin` file is
//! authoritative; a `.meta` without a `.bin` is ignorable garbage.
//! Expiry is driven by the `.bin` mtime, a background sweeper removes
//! expired entries, and oldest-first eviction keeps the store under its
//! size ceiling.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use verusgate_core::file::{File, FileMetadata};

use crate::{parse_key, Cache, CacheError, CacheStats, DEFAULT_TTL};

const DEFAULT_MAX_SIZE: u64 = 1024 * 1024 * 1024;
const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
pub struct FilesystemCacheConfig {
    pub base_dir: PathBuf,
    /// Total payload-byte ceiling.
    pub max_size: u64,
    pub ttl: Duration,
    pub cleanup_interval: Duration,
}

impl FilesystemCacheConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            max_size: DEFAULT_MAX_SIZE,
            ttl: DEFAULT_TTL,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

struct BinEntry {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

pub struct FilesystemCache {
    base_dir: PathBuf,
    max_size: u64,
    ttl: Duration,

    hits: AtomicU64,
    misses: AtomicU64,
    size: AtomicI64,
    items: AtomicI64,

    // Guards directory-level invariants; the counters are atomic.
    dir_lock: tokio::sync::RwLock<()>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl FilesystemCache {
    /// Create the cache, scanning any pre-existing entries to seed the
    /// size counters, and start the background sweeper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: FilesystemCacheConfig) -> Result<Arc<Self>, CacheError> {
        std::fs::create_dir_all(&config.base_dir)?;
        let (size, items) = scan(&config.base_dir);

        let cache = Arc::new(Self {
            base_dir: config.base_dir,
            max_size: config.max_size,
            ttl: config.ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            size: AtomicI64::new(size),
            items: AtomicI64::new(items),
            dir_lock: tokio::sync::RwLock::new(()),
            sweeper: Mutex::new(None),
        });

        let handle = spawn_sweeper(Arc::downgrade(&cache), config.cleanup_interval);
        *cache.sweeper.lock().expect("sweeper lock poisoned") = Some(handle);

        Ok(cache)
    }

    fn paths(&self, key: &str) -> (PathBuf, PathBuf) {
        let hash = hex::encode(Sha256::digest(key.as_bytes()));
        let shard = self.base_dir.join(&hash[..2]);
        (
            shard.join(format!("{hash}.bin")),
            shard.join(format!("{hash}.meta")),
        )
    }

    fn expired(&self, modified: SystemTime) -> bool {
        modified
            .elapsed()
            .map(|age| age > self.ttl)
            .unwrap_or(false)
    }

    async fn remove_entry(&self, content_path: &Path, size: u64) {
        let _ = tokio::fs::remove_file(content_path).await;
        let _ = tokio::fs::remove_file(content_path.with_extension("meta")).await;
        self.size.fetch_sub(size as i64, Ordering::Relaxed);
        self.items.fetch_sub(1, Ordering::Relaxed);
    }

    /// All live `.bin` entries, unordered.
    async fn collect_entries(&self) -> Vec<BinEntry> {
        let mut entries = Vec::new();
        let Ok(mut shards) = tokio::fs::read_dir(&self.base_dir).await else {
            return entries;
        };
        while let Ok(Some(shard)) = shards.next_entry().await {
            if !shard.path().is_dir() {
                continue;
            }
            let Ok(mut files) = tokio::fs::read_dir(shard.path()).await else {
                continue;
            };
            while let Ok(Some(file)) = files.next_entry().await {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some("bin") {
                    continue;
                }
                if let Ok(md) = file.metadata().await {
                    entries.push(BinEntry {
                        path,
                        size: md.len(),
                        modified: md.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                    });
                }
            }
        }
        entries
    }

    /// Evict oldest entries until `incoming` more bytes fit under the
    /// ceiling. Caller holds the write lock.
    async fn evict_oldest(&self, incoming: u64) {
        let current = self.size.load(Ordering::Relaxed).max(0) as u64;
        let target = current.saturating_add(incoming).saturating_sub(self.max_size);
        if target == 0 {
            return;
        }

        let mut entries = self.collect_entries().await;
        entries.sort_by_key(|e| e.modified);

        let mut freed: u64 = 0;
        for entry in entries {
            if freed >= target {
                break;
            }
            debug!(path = %entry.path.display(), "evicting cache entry");
            self.remove_entry(&entry.path, entry.size).await;
            freed += entry.size;
        }
    }

    /// Remove every expired entry. Runs under the write lock.
    async fn sweep(&self) {
        let _guard = self.dir_lock.write().await;
        let entries = self.collect_entries().await;
        for entry in entries {
            if self.expired(entry.modified) {
                self.remove_entry(&entry.path, entry.size).await;
            }
        }
    }
}

fn spawn_sweeper(cache: Weak<FilesystemCache>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; nothing can have expired yet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match cache.upgrade() {
                Some(cache) => cache.sweep().await,
                None => break,
            }
        }
    })
}

/// Seed size/items counters from whatever survived the last run.
fn scan(base_dir: &Path) -> (i64, i64) {
    let mut size: i64 = 0;
    let mut items: i64 = 0;
    let Ok(shards) = std::fs::read_dir(base_dir) else {
        return (0, 0);
    };
    for shard in shards.flatten() {
        if !shard.path().is_dir() {
            continue;
        }
        let Ok(files) = std::fs::read_dir(shard.path()) else {
            continue;
        };
        for file in files.flatten() {
            let path = file.path();
            if path.extension().and_then(|e| e.to_str()) != Some("bin") {
                continue;
            }
            if let Ok(md) = file.metadata() {
                size += md.len() as i64;
                items += 1;
            }
        }
    }
    (size, items)
}

#[async_trait]
impl Cache for FilesystemCache {
    async fn get(&self, key: &str) -> Result<Option<File>, CacheError> {
        let _guard = self.dir_lock.read().await;
        let (content_path, meta_path) = self.paths(key);

        let md = match tokio::fs::metadata(&content_path).await {
            Ok(md) => md,
            Err(_) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };

        // An entry older than its TTL is logically absent.
        if self.expired(md.modified().unwrap_or(SystemTime::UNIX_EPOCH)) {
            self.misses.fetch_add(1, Ordering::Relaxed);
            self.remove_entry(&content_path, md.len()).await;
            return Ok(None);
        }

        let content = match tokio::fs::read(&content_path).await {
            Ok(content) => content,
            Err(_) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };

        // Metadata is optional; losing it is tolerated.
        let metadata = match tokio::fs::read(&meta_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => FileMetadata::default(),
        };

        self.hits.fetch_add(1, Ordering::Relaxed);

        let (chain_id, txid) = parse_key(key);
        Ok(Some(File {
            txid,
            chain_id,
            content,
            metadata,
            retrieved_at: Utc::now(),
        }))
    }

    /// Store an entry. The backend applies its configured TTL; the per-call
    /// value is accepted for interface compatibility.
    async fn set(&self, key: &str, file: &File, _ttl: Duration) -> Result<(), CacheError> {
        let _guard = self.dir_lock.write().await;
        let (content_path, meta_path) = self.paths(key);

        // Idempotent overwrite: retire the previous entry first so the
        // counters and the eviction scan stay consistent.
        if let Ok(md) = tokio::fs::metadata(&content_path).await {
            self.remove_entry(&content_path, md.len()).await;
        }

        let incoming = file.content.len() as u64;
        if (self.size.load(Ordering::Relaxed).max(0) as u64).saturating_add(incoming)
            > self.max_size
        {
            self.evict_oldest(incoming).await;
        }

        if let Some(shard) = content_path.parent() {
            tokio::fs::create_dir_all(shard).await?;
        }
        tokio::fs::write(&content_path, &file.content).await?;

        match serde_json::to_vec(&file.metadata) {
            Ok(meta_bytes) => {
                if let Err(e) = tokio::fs::write(&meta_path, meta_bytes).await {
                    warn!(key, "failed to write cache metadata: {e}");
                }
            }
            Err(e) => warn!(key, "failed to serialize cache metadata: {e}"),
        }

        self.size.fetch_add(incoming as i64, Ordering::Relaxed);
        self.items.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let _guard = self.dir_lock.write().await;
        let (content_path, _) = self.paths(key);
        if let Ok(md) = tokio::fs::metadata(&content_path).await {
            self.remove_entry(&content_path, md.len()).await;
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let _guard = self.dir_lock.write().await;
        tokio::fs::remove_dir_all(&self.base_dir).await?;
        tokio::fs::create_dir_all(&self.base_dir).await?;
        self.size.store(0, Ordering::Relaxed);
        self.items.store(0, Ordering::Relaxed);
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(CacheStats::with_rate(
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.size.load(Ordering::Relaxed).max(0) as u64,
            self.items.load(Ordering::Relaxed).max(0) as u64,
        ))
    }

    async fn close(&self) {
        if let Some(handle) = self.sweeper.lock().expect("sweeper lock poisoned").take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn sample_file(content: &[u8]) -> File {
        File {
            txid: "ab".repeat(32),
            chain_id: "vrsctest".into(),
            content: content.to_vec(),
            metadata: FileMetadata {
                filename: "hello.txt".into(),
                size: content.len() as u64,
                content_type: "text/plain; charset=utf-8".into(),
                extension: "txt".into(),
                ..Default::default()
            },
            retrieved_at: Utc::now(),
        }
    }

    fn small_cache(dir: &Path, max_size: u64, ttl: Duration) -> Arc<FilesystemCache> {
        let mut config = FilesystemCacheConfig::new(dir);
        config.max_size = max_size;
        config.ttl = ttl;
        FilesystemCache::new(config).unwrap()
    }

    #[tokio::test]
    async fn set_get_roundtrip() {
        let dir = tempdir().unwrap();
        let cache = small_cache(dir.path(), 1024 * 1024, Duration::from_secs(60));

        let file = sample_file(b"Hello, World!");
        cache.set("vrsctest:key1", &file, DEFAULT_TTL).await.unwrap();

        let got = cache.get("vrsctest:key1").await.unwrap().unwrap();
        assert_eq!(got.content, file.content);
        assert_eq!(got.metadata.filename, "hello.txt");
        assert_eq!(got.chain_id, "vrsctest");
        assert_eq!(got.txid, "key1");
        cache.close().await;
    }

    #[tokio::test]
    async fn miss_is_none_not_error() {
        let dir = tempdir().unwrap();
        let cache = small_cache(dir.path(), 1024, Duration::from_secs(60));

        assert!(cache.get("vrsctest:nope").await.unwrap().is_none());
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
        cache.close().await;
    }

    #[tokio::test]
    async fn entries_are_sharded_by_hash_prefix() {
        let dir = tempdir().unwrap();
        let cache = small_cache(dir.path(), 1024, Duration::from_secs(60));
        cache
            .set("vrsctest:key1", &sample_file(b"x"), DEFAULT_TTL)
            .await
            .unwrap();

        let hash = hex::encode(Sha256::digest(b"vrsctest:key1"));
        let expected = dir.path().join(&hash[..2]).join(format!("{hash}.bin"));
        assert!(expected.exists());
        assert!(expected.with_extension("meta").exists());
        cache.close().await;
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss_and_is_removed() {
        let dir = tempdir().unwrap();
        let cache = small_cache(dir.path(), 1024, Duration::from_millis(80));

        cache
            .set("vrsctest:ttl", &sample_file(b"short lived"), DEFAULT_TTL)
            .await
            .unwrap();
        assert!(cache.get("vrsctest:ttl").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(cache.get("vrsctest:ttl").await.unwrap().is_none());

        // The files are gone, not just hidden.
        let hash = hex::encode(Sha256::digest(b"vrsctest:ttl"));
        assert!(!dir.path().join(&hash[..2]).join(format!("{hash}.bin")).exists());

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.items, 0);
        cache.close().await;
    }

    #[tokio::test]
    async fn delete_is_noop_on_absent_key() {
        let dir = tempdir().unwrap();
        let cache = small_cache(dir.path(), 1024, Duration::from_secs(60));

        cache.delete("vrsctest:absent").await.unwrap();

        cache
            .set("vrsctest:key", &sample_file(b"data"), DEFAULT_TTL)
            .await
            .unwrap();
        cache.delete("vrsctest:key").await.unwrap();
        assert!(cache.get("vrsctest:key").await.unwrap().is_none());
        assert_eq!(cache.stats().await.unwrap().items, 0);
        cache.close().await;
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let dir = tempdir().unwrap();
        let cache = small_cache(dir.path(), 1024 * 1024, Duration::from_secs(60));

        for i in 0..4 {
            cache
                .set(&format!("vrsctest:k{i}"), &sample_file(b"data"), DEFAULT_TTL)
                .await
                .unwrap();
        }
        cache.clear().await.unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.items, 0);
        assert_eq!(stats.size, 0);
        assert!(cache.get("vrsctest:k0").await.unwrap().is_none());
        cache.close().await;
    }

    #[tokio::test]
    async fn overwrite_is_idempotent_for_counters() {
        let dir = tempdir().unwrap();
        let cache = small_cache(dir.path(), 1024 * 1024, Duration::from_secs(60));

        cache
            .set("vrsctest:key", &sample_file(b"first"), DEFAULT_TTL)
            .await
            .unwrap();
        cache
            .set("vrsctest:key", &sample_file(b"second version"), DEFAULT_TTL)
            .await
            .unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.items, 1);
        assert_eq!(stats.size, b"second version".len() as u64);
        cache.close().await;
    }

    #[tokio::test]
    async fn size_ceiling_evicts_oldest_first() {
        let dir = tempdir().unwrap();
        // Room for three 100-byte entries.
        let cache = small_cache(dir.path(), 300, Duration::from_secs(60));

        for i in 0..3 {
            cache
                .set(
                    &format!("vrsctest:k{i}"),
                    &sample_file(&vec![b'x'; 100]),
                    DEFAULT_TTL,
                )
                .await
                .unwrap();
            // Distinct mtimes so the eviction order is deterministic.
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        cache
            .set("vrsctest:k3", &sample_file(&vec![b'y'; 100]), DEFAULT_TTL)
            .await
            .unwrap();

        let stats = cache.stats().await.unwrap();
        assert!(stats.size <= 300, "size {} exceeds the ceiling", stats.size);
        assert!(cache.get("vrsctest:k0").await.unwrap().is_none());
        assert!(cache.get("vrsctest:k3").await.unwrap().is_some());
        cache.close().await;
    }

    #[tokio::test]
    async fn startup_scan_seeds_counters() {
        let dir = tempdir().unwrap();
        {
            let cache = small_cache(dir.path(), 1024 * 1024, Duration::from_secs(60));
            cache
                .set("vrsctest:persisted", &sample_file(b"still here"), DEFAULT_TTL)
                .await
                .unwrap();
            cache.close().await;
        }

        let reopened = small_cache(dir.path(), 1024 * 1024, Duration::from_secs(60));
        let stats = reopened.stats().await.unwrap();
        assert_eq!(stats.items, 1);
        assert_eq!(stats.size, b"still here".len() as u64);
        assert!(reopened.get("vrsctest:persisted").await.unwrap().is_some());
        reopened.close().await;
    }

    #[tokio::test]
    async fn hit_rate_tracks_lookups() {
        let dir = tempdir().unwrap();
        let cache = small_cache(dir.path(), 1024, Duration::from_secs(60));

        cache
            .set("vrsctest:key", &sample_file(b"data"), DEFAULT_TTL)
            .await
            .unwrap();
        cache.get("vrsctest:key").await.unwrap();
        cache.get("vrsctest:key").await.unwrap();
        cache.get("vrsctest:missing").await.unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
        cache.close().await;
    }
}
