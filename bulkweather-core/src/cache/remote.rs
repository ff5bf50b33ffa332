use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{CacheStats, CacheStore};
use crate::config::RemoteCacheSettings;
use crate::error::ResolveError;
use crate::model::CachedWeather;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// What the remote store actually persists: the value plus its write time.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    value: CachedWeather,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct KeyListing {
    keys: Vec<KeyInfo>,
}

#[derive(Debug, Deserialize)]
struct KeyInfo {
    key: String,
    timestamp: DateTime<Utc>,
}

/// Network-backed cache speaking to a KV HTTP service. Every key is
/// namespaced with the configured prefix; enumeration only ever sees
/// prefixed keys. When the service is unreachable, reads degrade to the
/// empty value and writes raise.
#[derive(Debug)]
pub struct RemoteCache {
    http: Client,
    base_url: String,
    prefix: String,
    connected: AtomicBool,
}

impl RemoteCache {
    /// Build a client without probing the service. Starts disconnected.
    pub fn new(settings: RemoteCacheSettings) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            prefix: settings.key_prefix,
            connected: AtomicBool::new(false),
        }
    }

    /// Build a client and probe the service once. A failed probe leaves the
    /// cache in degraded (disconnected) mode rather than failing startup.
    pub async fn connect(settings: RemoteCacheSettings) -> Self {
        let cache = Self::new(settings);
        cache.probe().await;
        cache
    }

    pub async fn probe(&self) {
        let url = format!("{}/ping", self.base_url);
        match self.http.get(&url).send().await {
            Ok(res) if res.status().is_success() => {
                self.connected.store(true, Ordering::Relaxed);
                info!(url = %self.base_url, "remote cache connected");
            }
            Ok(res) => {
                self.connected.store(false, Ordering::Relaxed);
                warn!(status = %res.status(), "remote cache ping rejected");
            }
            Err(e) => {
                self.connected.store(false, Ordering::Relaxed);
                warn!(error = %e, "remote cache unreachable, running degraded");
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn entry_url(&self, key: &str) -> String {
        format!("{}/kv/{}", self.base_url, self.namespaced(key))
    }

    async fn list_keys(&self) -> Vec<KeyInfo> {
        if !self.is_connected() {
            return Vec::new();
        }

        let url = format!("{}/kv", self.base_url);
        let res = self
            .http
            .get(&url)
            .query(&[("prefix", self.prefix.as_str())])
            .send()
            .await;

        match res {
            Ok(res) if res.status().is_success() => match res.json::<KeyListing>().await {
                Ok(listing) => listing.keys,
                Err(e) => {
                    warn!(error = %e, "remote cache returned malformed key listing");
                    Vec::new()
                }
            },
            Ok(res) => {
                warn!(status = %res.status(), "remote cache key listing failed");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "remote cache key listing failed");
                Vec::new()
            }
        }
    }
}

/// Whole seconds for the store's TTL parameter, rounding up so an entry is
/// never dropped before its requested lifetime.
fn whole_seconds(ttl: Duration) -> u64 {
    ttl.as_millis().div_ceil(1000) as u64
}

#[async_trait]
impl CacheStore for RemoteCache {
    async fn set(
        &self,
        key: &str,
        value: CachedWeather,
        ttl: Duration,
    ) -> Result<(), ResolveError> {
        if !self.is_connected() {
            return Err(ResolveError::Cache("remote cache not connected".to_string()));
        }

        let envelope = Envelope { value, timestamp: Utc::now() };
        let res = self
            .http
            .put(self.entry_url(key))
            .query(&[("ttl", whole_seconds(ttl).to_string())])
            .json(&envelope)
            .send()
            .await
            .map_err(|e| ResolveError::Cache(e.to_string()))?;

        if !res.status().is_success() {
            return Err(ResolveError::Cache(format!(
                "remote cache write failed with status {}",
                res.status()
            )));
        }

        Ok(())
    }

    async fn get(&self, key: &str) -> Option<CachedWeather> {
        if !self.is_connected() {
            return None;
        }

        let res = match self.http.get(self.entry_url(key)).send().await {
            Ok(res) => res,
            Err(e) => {
                warn!(key = %key, error = %e, "remote cache read failed, treating as miss");
                return None;
            }
        };

        if !res.status().is_success() {
            debug!(key = %key, status = %res.status(), "remote cache miss");
            return None;
        }

        match res.json::<Envelope>().await {
            Ok(envelope) => Some(envelope.value),
            Err(e) => {
                warn!(key = %key, error = %e, "remote cache entry malformed, treating as miss");
                None
            }
        }
    }

    async fn has(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }

    async fn delete(&self, key: &str) -> bool {
        if !self.is_connected() {
            return false;
        }

        match self.http.delete(self.entry_url(key)).send().await {
            Ok(res) => res.status().is_success(),
            Err(e) => {
                warn!(key = %key, error = %e, "remote cache delete failed");
                false
            }
        }
    }

    async fn clear(&self) {
        for info in self.list_keys().await {
            let url = format!("{}/kv/{}", self.base_url, info.key);
            if let Err(e) = self.http.delete(&url).send().await {
                warn!(key = %info.key, error = %e, "remote cache clear: delete failed");
            }
        }
    }

    async fn len(&self) -> usize {
        self.list_keys().await.len()
    }

    async fn stats(&self) -> CacheStats {
        let keys = self.list_keys().await;
        CacheStats {
            size: keys.len(),
            keys: keys.iter().map(|k| k.key.clone()).collect(),
            timestamps: keys.iter().map(|k| k.timestamp).collect(),
            connected: Some(self.is_connected()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Coordinates, ResolvedLocation, ResolvedWeather, UNIT_CELSIUS};

    fn settings() -> RemoteCacheSettings {
        RemoteCacheSettings {
            base_url: "http://127.0.0.1:7700/".to_string(),
            key_prefix: "bulkweather:".to_string(),
        }
    }

    fn record() -> CachedWeather {
        CachedWeather {
            location: ResolvedLocation {
                name: "London".to_string(),
                country: "GB".to_string(),
                country_code: "GB".to_string(),
                coordinates: Coordinates { lat: Some(51.5), lon: Some(-0.1) },
            },
            weather: ResolvedWeather {
                temperature: 15,
                unit: UNIT_CELSIUS.to_string(),
                condition: "Clear sky".to_string(),
                icon: "01d".to_string(),
                timestamp: "2025-07-04T10:30:00.000Z".to_string(),
            },
        }
    }

    #[test]
    fn keys_are_namespaced_with_the_prefix() {
        let cache = RemoteCache::new(settings());
        assert_eq!(cache.namespaced("london-gb"), "bulkweather:london-gb");
        assert_eq!(
            cache.entry_url("london-gb"),
            "http://127.0.0.1:7700/kv/bulkweather:london-gb"
        );
    }

    #[test]
    fn ttl_rounds_up_to_whole_seconds() {
        assert_eq!(whole_seconds(Duration::from_millis(1)), 1);
        assert_eq!(whole_seconds(Duration::from_millis(999)), 1);
        assert_eq!(whole_seconds(Duration::from_millis(1000)), 1);
        assert_eq!(whole_seconds(Duration::from_millis(1001)), 2);
        assert_eq!(whole_seconds(Duration::from_secs(300)), 300);
    }

    #[tokio::test]
    async fn disconnected_reads_return_the_empty_value() {
        let cache = RemoteCache::new(settings());
        assert!(!cache.is_connected());
        assert!(cache.get("london-gb").await.is_none());
        assert!(!cache.has("london-gb").await);
        assert!(!cache.delete("london-gb").await);
        assert_eq!(cache.len().await, 0);

        let stats = cache.stats().await;
        assert_eq!(stats.size, 0);
        assert_eq!(stats.connected, Some(false));
    }

    #[tokio::test]
    async fn disconnected_writes_raise() {
        let cache = RemoteCache::new(settings());
        let err = cache.set("london-gb", record(), Duration::from_secs(300)).await.unwrap_err();
        assert!(matches!(err, ResolveError::Cache(_)));
        assert!(err.to_string().contains("not connected"));
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let envelope = Envelope { value: record(), timestamp: Utc::now() };
        let json = serde_json::to_string(&envelope).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value, record());
    }
}
