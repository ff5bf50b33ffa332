use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::{CacheStats, CacheStore};
use crate::error::ResolveError;
use crate::model::CachedWeather;

#[derive(Debug)]
struct Entry {
    value: CachedWeather,
    stored_at: DateTime<Utc>,
    expires_at: Instant,
    reaper: JoinHandle<()>,
}

/// In-process cache: a map plus one expiry reaper task per key. `set`
/// replaces any existing reaper; the reaper deletes the entry when the TTL
/// elapses. `get` double-checks the deadline so a lagging reaper can never
/// serve a stale entry.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn set(
        &self,
        key: &str,
        value: CachedWeather,
        ttl: Duration,
    ) -> Result<(), ResolveError> {
        let mut entries = self.entries.write().await;

        if let Some(old) = entries.remove(key) {
            old.reaper.abort();
        }

        let expires_at = Instant::now() + ttl;
        let reaper = tokio::spawn({
            let entries = Arc::clone(&self.entries);
            let key = key.to_string();
            async move {
                tokio::time::sleep(ttl).await;
                let mut entries = entries.write().await;
                // Replacement aborts the previous reaper under the write
                // lock, so reaching this point means our entry is current.
                if entries.get(&key).is_some_and(|e| e.expires_at <= Instant::now()) {
                    debug!(key = %key, "cache entry expired");
                    entries.remove(&key);
                }
            }
        });

        entries.insert(
            key.to_string(),
            Entry { value, stored_at: Utc::now(), expires_at, reaper },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Option<CachedWeather> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value.clone())
    }

    async fn has(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }

    async fn delete(&self, key: &str) -> bool {
        let mut entries = self.entries.write().await;
        match entries.remove(key) {
            Some(entry) => {
                entry.reaper.abort();
                true
            }
            None => false,
        }
    }

    async fn clear(&self) {
        let mut entries = self.entries.write().await;
        for (_, entry) in entries.drain() {
            entry.reaper.abort();
        }
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        CacheStats {
            size: entries.len(),
            keys: entries.keys().cloned().collect(),
            timestamps: entries.values().map(|e| e.stored_at).collect(),
            connected: None,
        }
    }
}
