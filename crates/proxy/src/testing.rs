//! Call-counting fakes for the cache and registry seams

use crate::cache::{BackendCache, MemoryBackendCache};
use crate::registry::{AuthoritativeMapping, BackendRegistry};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Memory cache that records every call
#[derive(Default)]
pub struct CountingCache {
    inner: MemoryBackendCache,
    gets: AtomicUsize,
    writes: Mutex<Vec<(String, String, Duration)>>,
}

impl CountingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.writes.lock().len()
    }

    pub fn writes(&self) -> Vec<(String, String, Duration)> {
        self.writes.lock().clone()
    }

    /// Seed an entry without counting it as a write
    pub async fn seed(&self, key: &str, value: &str) {
        self.inner.set(key, value, Duration::from_secs(60)).await;
    }
}

#[async_trait]
impl BackendCache for CountingCache {
    async fn get(&self, key: &str) -> Option<String> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) {
        self.writes
            .lock()
            .push((key.to_string(), value.to_string(), ttl));
        self.inner.set(key, value, ttl).await;
    }
}

/// Registry serving a fixed snapshot, or failing when none is set
pub struct StaticRegistry {
    mapping: Option<AuthoritativeMapping>,
    fetches: AtomicUsize,
}

impl StaticRegistry {
    pub fn new(entries: &[(&str, &str)]) -> Self {
        Self {
            mapping: Some(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            mapping: None,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendRegistry for StaticRegistry {
    async fn fetch_all(&self) -> Option<AuthoritativeMapping> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.mapping.clone()
    }
}
