//! Cache-aside resolution of routing keys to backend classes

use crate::backend::BackendClass;
use crate::cache::BackendCache;
use crate::metrics::metrics;
use crate::registry::BackendRegistry;
use config::CacheConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// TTL of entries written by the startup preload
pub const PRELOAD_TTL: Duration = Duration::from_secs(600);

/// TTL of entries written after an on-demand registry lookup
pub const RESOLVED_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Resolves routing keys through the cache, falling back to the registry.
///
/// Unknown keys are never cached, so each request for one triggers a
/// registry fetch. Concurrent misses for the same key may each fetch and
/// write; the writes carry the same value.
#[derive(Clone)]
pub struct RouteResolver {
    cache: Arc<dyn BackendCache>,
    registry: Arc<dyn BackendRegistry>,
    preload_ttl: Duration,
    resolved_ttl: Duration,
}

impl RouteResolver {
    pub fn new(cache: Arc<dyn BackendCache>, registry: Arc<dyn BackendRegistry>) -> Self {
        Self {
            cache,
            registry,
            preload_ttl: PRELOAD_TTL,
            resolved_ttl: RESOLVED_TTL,
        }
    }

    /// Take TTLs from configuration
    pub fn with_ttls(mut self, config: &CacheConfig) -> Self {
        self.preload_ttl = Duration::from_secs(config.preload_ttl);
        self.resolved_ttl = Duration::from_secs(config.resolved_ttl);
        self
    }

    /// Backend class for `key`, or `None` when neither the cache nor the
    /// registry knows it.
    pub async fn resolve(&self, key: &str) -> Option<BackendClass> {
        // An empty class string names no backend, cached or not
        if let Some(value) = self.cache.get(key).await.filter(|v| !v.is_empty()) {
            metrics().cache_hits.inc();
            debug!(key = %key, class = %value, "Backend type cache hit");
            return Some(BackendClass::from(value.as_str()));
        }
        metrics().cache_misses.inc();

        metrics().registry_fetches.inc();
        let value = self
            .registry
            .fetch_all()
            .await?
            .remove(key)
            .filter(|v| !v.is_empty());
        match value {
            Some(value) => {
                debug!(key = %key, class = %value, "Backend type resolved from registry");
                self.cache.set(key, &value, self.resolved_ttl).await;
                Some(BackendClass::from(value.as_str()))
            }
            None => {
                debug!(key = %key, "Routing key unknown to registry");
                None
            }
        }
    }

    /// Warm the cache with the full registry snapshot.
    ///
    /// Returns the number of entries written, or `None` if the registry
    /// could not be read. Never fails startup.
    pub async fn preload_all(&self) -> Option<usize> {
        info!("Preloading app types from registry");
        metrics().registry_fetches.inc();
        let Some(mapping) = self.registry.fetch_all().await else {
            error!("Failed to preload app types, serving with a cold cache");
            return None;
        };

        let mut written = 0;
        for (key, value) in &mapping {
            if value.is_empty() {
                debug!(key = %key, "Skipping registry entry without a backend type");
                continue;
            }
            self.cache.set(key, value, self.preload_ttl).await;
            written += 1;
        }

        info!(entries = written, "App types preloaded into cache");
        Some(written)
    }
}
