use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cache::memory::MemoryCache;
use crate::cache::remote::RemoteCache;
use crate::config::{CacheSettings, CacheStrategy};
use crate::error::ResolveError;
use crate::model::CachedWeather;

pub mod memory;
pub mod remote;

/// Default entry lifetime when the caller does not override it.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Point-in-time view of a cache backend, for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub size: usize,
    pub keys: Vec<String>,
    pub timestamps: Vec<DateTime<Utc>>,
    /// `None` for backends without a connection (in-process).
    pub connected: Option<bool>,
}

/// Uniform asynchronous cache contract. The resolver holds an
/// `Arc<dyn CacheStore>` and must not be able to tell which backend is
/// behind it.
///
/// Read-side operations never fail: a backend that cannot answer returns the
/// empty value (`None`/`false`/`0`). Only `set` surfaces errors.
#[async_trait]
pub trait CacheStore: Send + Sync + Debug {
    async fn set(
        &self,
        key: &str,
        value: CachedWeather,
        ttl: Duration,
    ) -> Result<(), ResolveError>;

    async fn get(&self, key: &str) -> Option<CachedWeather>;

    async fn has(&self, key: &str) -> bool;

    async fn delete(&self, key: &str) -> bool;

    async fn clear(&self);

    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn stats(&self) -> CacheStats;
}

/// Construct the configured backend. This is the single place the
/// memory-vs-remote decision is made; everything downstream sees the trait.
pub async fn cache_from_config(settings: &CacheSettings) -> Result<Arc<dyn CacheStore>, ResolveError> {
    match settings.strategy {
        CacheStrategy::Memory => Ok(Arc::new(MemoryCache::new())),
        CacheStrategy::Remote => {
            let remote = settings.remote.clone().ok_or_else(|| {
                ResolveError::Cache(
                    "cache.strategy = \"remote\" requires a [cache.remote] section".to_string(),
                )
            })?;
            Ok(Arc::new(RemoteCache::connect(remote).await))
        }
    }
}
