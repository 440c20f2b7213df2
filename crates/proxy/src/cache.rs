//! Backend-type cache
//!
//! Maps routing keys to backend-class strings with a per-entry TTL. Reads
//! never fail: an unreachable cache is a miss. Writes are best effort.

use crate::error::Result;
use async_trait::async_trait;
use config::CacheConfig;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Minimum pause between failed connection attempts
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// TTL-aware key-value store holding backend-class strings
#[async_trait]
pub trait BackendCache: Send + Sync {
    /// Cached value for `key`; `None` on miss or cache failure
    async fn get(&self, key: &str) -> Option<String>;

    /// Store `value` for `ttl`. Failures are logged and dropped.
    async fn set(&self, key: &str, value: &str, ttl: Duration);
}

/// Build the cache described by the configuration.
///
/// A Redis cache gets one connection attempt here; if it fails the proxy
/// starts anyway and reconnects in the background.
pub async fn from_config(config: &CacheConfig) -> Result<Arc<dyn BackendCache>> {
    match &config.url {
        Some(url) => {
            info!("Using Redis backend-type cache");
            let cache = RedisBackendCache::new(url)?;
            cache.connect().await;
            Ok(Arc::new(cache))
        }
        None => {
            info!("No cache URL configured, using in-process backend-type cache");
            Ok(Arc::new(MemoryBackendCache::new()))
        }
    }
}

/// Redis-backed cache.
///
/// Reads and writes never wait for a connection: while disconnected they
/// are a miss or a dropped write, and a reconnect runs in the background at
/// most once per [`RECONNECT_BACKOFF`].
pub struct RedisBackendCache {
    client: redis::Client,
    state: Arc<ConnectionState>,
}

#[derive(Default)]
struct ConnectionState {
    conn: RwLock<Option<ConnectionManager>>,
    connecting: AtomicBool,
    last_failure: Mutex<Option<Instant>>,
}

impl RedisBackendCache {
    /// Parse the connection URL. No connection is made here.
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
            state: Arc::default(),
        })
    }

    /// Connect in the foreground. Returns whether a connection is up.
    pub async fn connect(&self) -> bool {
        if self.is_connected() {
            return true;
        }
        if self.state.connecting.swap(true, Ordering::AcqRel) {
            return false;
        }
        establish(self.client.clone(), &self.state).await
    }

    pub fn is_connected(&self) -> bool {
        self.state.conn.read().is_some()
    }

    fn connection(&self) -> Option<ConnectionManager> {
        if let Some(conn) = self.state.conn.read().as_ref() {
            return Some(conn.clone());
        }
        self.reconnect_in_background();
        None
    }

    fn reconnect_in_background(&self) {
        let backing_off = self
            .state
            .last_failure
            .lock()
            .is_some_and(|at| at.elapsed() < RECONNECT_BACKOFF);
        if backing_off || self.state.connecting.swap(true, Ordering::AcqRel) {
            return;
        }

        let client = self.client.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            establish(client, &state).await;
        });
    }
}

/// One connection attempt. The caller must have set `connecting`.
async fn establish(client: redis::Client, state: &ConnectionState) -> bool {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(CONNECT_TIMEOUT)
        .set_response_timeout(RESPONSE_TIMEOUT);

    let connected = match ConnectionManager::new_with_config(client, config).await {
        Ok(conn) => {
            *state.conn.write() = Some(conn);
            *state.last_failure.lock() = None;
            info!("Connected to Redis backend-type cache");
            true
        }
        Err(e) => {
            *state.last_failure.lock() = Some(Instant::now());
            warn!(error = %e, "Redis unavailable, bypassing cache until reconnect");
            false
        }
    };
    state.connecting.store(false, Ordering::Release);
    connected
}

#[async_trait]
impl BackendCache for RedisBackendCache {
    async fn get(&self, key: &str) -> Option<String> {
        let Some(mut conn) = self.connection() else {
            debug!(key = %key, "Cache disconnected, treating as miss");
            return None;
        };

        match conn.get::<_, Option<String>>(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) {
        let Some(mut conn) = self.connection() else {
            debug!(key = %key, "Cache disconnected, dropping write");
            return;
        };

        if let Err(e) = conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await {
            warn!(key = %key, error = %e, "Cache write failed");
        }
    }
}

/// In-process cache with passive expiry
#[derive(Default)]
pub struct MemoryBackendCache {
    entries: DashMap<String, MemoryEntry>,
}

struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

impl MemoryBackendCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until next read
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remaining TTL of a live entry
    pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        self.entries
            .get(key)
            .map(|e| e.expires_at.saturating_duration_since(Instant::now()))
            .filter(|ttl| !ttl.is_zero())
    }
}

#[async_trait]
impl BackendCache for MemoryBackendCache {
    async fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Some(entry.value.clone());
            }
        }

        if self.entries.remove_if(key, |_, e| e.expires_at <= now).is_some() {
            debug!(key = %key, "Cache entry expired");
        }
        None
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_set_and_get() {
        let cache = MemoryBackendCache::new();
        assert_eq!(cache.get("alice").await, None);

        cache.set("alice", "static", Duration::from_secs(60)).await;
        assert_eq!(cache.get("alice").await.as_deref(), Some("static"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_overwrite_is_last_writer_wins() {
        let cache = MemoryBackendCache::new();
        cache.set("alice", "static", Duration::from_secs(600)).await;
        cache.set("alice", "serverless", Duration::from_secs(31_536_000)).await;

        assert_eq!(cache.get("alice").await.as_deref(), Some("serverless"));
        let ttl = cache.remaining_ttl("alice").unwrap();
        assert!(ttl > Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_memory_entry_expires() {
        let cache = MemoryBackendCache::new();
        cache.set("alice", "static", Duration::from_millis(20)).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(cache.get("alice").await, None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_redis_unreachable_is_miss() {
        // Nothing listens on port 1; reads degrade to a miss and writes are dropped.
        let cache = RedisBackendCache::new("redis://127.0.0.1:1/").unwrap();
        assert!(!cache.connect().await);
        assert!(!cache.is_connected());
        assert_eq!(cache.get("alice").await, None);
        cache.set("alice", "static", Duration::from_secs(60)).await;
    }

    #[tokio::test]
    async fn test_redis_outage_does_not_queue_requests() {
        // Non-routable address: a connection attempt hangs until its timeout
        let cache = Arc::new(RedisBackendCache::new("redis://10.255.255.1:6379/").unwrap());
        let started = Instant::now();

        let reads: Vec<_> = (0..10)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get(&format!("key{}", i)).await })
            })
            .collect();
        for read in reads {
            assert_eq!(read.await.unwrap(), None);
        }
        cache.set("alice", "static", Duration::from_secs(60)).await;

        assert!(started.elapsed() < CONNECT_TIMEOUT / 2);
    }

    #[test]
    fn test_redis_invalid_url() {
        assert!(RedisBackendCache::new("not a url").is_err());
    }

    #[tokio::test]
    async fn test_from_config_without_url() {
        let config = CacheConfig::default();
        assert!(from_config(&config).await.is_ok());
    }

    #[tokio::test]
    async fn test_from_config_with_unreachable_redis() {
        let config = CacheConfig {
            url: Some("redis://127.0.0.1:1/".to_string()),
            ..CacheConfig::default()
        };
        let cache = from_config(&config).await.unwrap();
        assert_eq!(cache.get("alice").await, None);
    }
}
