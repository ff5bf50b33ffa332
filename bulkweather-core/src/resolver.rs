//! The bulk resolution pipeline: validate each request, consult the cache,
//! fall back to gated provider calls with name variations, and assemble a
//! per-item, partial-failure-tolerant batch response.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::config::WEATHER_PROVIDER_GATE;
use crate::error::{ErrorCode, ResolveError};
use crate::gate::GateRegistry;
use crate::model::{
    BatchResult, BatchSummary, CachedWeather, CityRequest, CityResult, ResolutionStatus,
    ResultMeta, ResultSource,
};
use crate::normalize;
use crate::provider::WeatherApi;

pub struct BulkWeatherResolver {
    cache: Arc<dyn CacheStore>,
    provider: Arc<dyn WeatherApi>,
    gates: Arc<GateRegistry>,
    ttl: Duration,
}

impl BulkWeatherResolver {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        provider: Arc<dyn WeatherApi>,
        gates: Arc<GateRegistry>,
        ttl: Duration,
    ) -> Self {
        Self { cache, provider, gates, ttl }
    }

    /// Resolve a whole batch. Items are processed concurrently and settled
    /// individually: one bad city never fails its siblings. The only error
    /// this returns is the empty-batch precondition, raised before any I/O.
    pub async fn execute(&self, requests: Vec<CityRequest>) -> Result<BatchResult, ResolveError> {
        if requests.is_empty() {
            return Err(ResolveError::EmptyBatch);
        }

        let started = Instant::now();
        info!(total = requests.len(), "bulk weather resolution started");

        let tasks = requests
            .into_iter()
            .enumerate()
            .map(|(index, request)| self.resolve_item(index, request));
        let mut cities = join_all(tasks).await;

        // Completion order is nondeterministic; restore input order.
        cities.sort_by_key(|r| r.search_index);

        let mut summary = BatchSummary::default();
        for result in &cities {
            summary.record(result);
        }

        let processing_time_ms = started.elapsed().as_millis() as u64;
        info!(
            found = summary.found,
            failed = summary.failed,
            cached = summary.cached,
            elapsed_ms = processing_time_ms,
            "bulk weather resolution finished"
        );

        Ok(BatchResult { cities, summary, processing_time_ms })
    }

    async fn resolve_item(&self, index: usize, request: CityRequest) -> CityResult {
        if let Some(id) = request.city_id.clone() {
            self.resolve_by_id(index, request, id.as_string()).await
        } else if let Some(city) = request.city.clone() {
            self.resolve_by_name(index, request, city).await
        } else {
            CityResult::failure(
                index,
                request,
                ResolutionStatus::Error,
                ErrorCode::InvalidCityName,
                "Request must contain either a city name or a cityId",
                ResultMeta::default(),
            )
        }
    }

    async fn resolve_by_id(&self, index: usize, request: CityRequest, id: String) -> CityResult {
        if !is_digit_string(&id) {
            return CityResult::failure(
                index,
                request,
                ResolutionStatus::Error,
                ErrorCode::InvalidCityName,
                format!("Invalid city id: {id}"),
                ResultMeta::default(),
            );
        }

        let cache_key = format!("cityid_{id}");
        if let Some(hit) = self.cache.get(&cache_key).await {
            debug!(index, %cache_key, "cache hit");
            return CityResult::found(index, request, hit, cached_meta(cache_key));
        }

        match self.guarded(self.provider.current_by_id(&id)).await {
            Ok(payload) => match CachedWeather::from_payload(&payload) {
                Some(record) => {
                    self.store(&cache_key, &record).await;
                    CityResult::found(index, request, record, api_meta(cache_key, None, None))
                }
                None => CityResult::failure(
                    index,
                    request,
                    ResolutionStatus::NotFound,
                    ErrorCode::CityNotFound,
                    format!("Provider returned no data for city id {id}"),
                    miss_meta(cache_key),
                ),
            },
            Err(error) => {
                warn!(index, city_id = %id, error = %error, "city id lookup failed");
                CityResult::failure(
                    index,
                    request,
                    ResolutionStatus::NotFound,
                    ErrorCode::CityNotFound,
                    error.to_string(),
                    miss_meta(cache_key),
                )
            }
        }
    }

    async fn resolve_by_name(
        &self,
        index: usize,
        request: CityRequest,
        city: String,
    ) -> CityResult {
        let country = request.country.clone().unwrap_or_default();

        if !normalize::is_valid(&city) {
            return CityResult::failure(
                index,
                request,
                ResolutionStatus::Error,
                ErrorCode::InvalidCityName,
                format!("Invalid city name: {city}"),
                ResultMeta::default(),
            );
        }

        let normalized = normalize::normalize(&city);
        let cache_key = normalize::cache_key(&normalized, &country);

        if let Some(hit) = self.cache.get(&cache_key).await {
            debug!(index, %cache_key, "cache hit");
            return CityResult::found(index, request, hit, cached_meta(cache_key));
        }

        // Variations come from the original string, not the normalized one;
        // the provider matches diacritics the canonical form throws away.
        let variations = normalize::fallback_names(&city);
        let mut attempted = Vec::with_capacity(variations.len());
        let mut last_error: Option<ResolveError> = None;

        for variation in &variations {
            attempted.push(variation.clone());
            let query = normalize::clean_for_api(variation);
            debug!(index, variation = %variation, "trying name variation");

            match self.guarded(self.provider.current_by_name(&query, &country)).await {
                Ok(payload) => match CachedWeather::from_payload(&payload) {
                    Some(record) => {
                        self.store(&cache_key, &record).await;
                        return CityResult::found(
                            index,
                            request,
                            record,
                            api_meta(
                                cache_key,
                                Some(attempted),
                                Some(variation.clone()),
                            ),
                        );
                    }
                    None => {
                        last_error = Some(ResolveError::CityNotFound(format!(
                            "Provider returned no data for '{variation}'"
                        )));
                    }
                },
                Err(error) => {
                    debug!(index, variation = %variation, error = %error, "variation failed");
                    last_error = Some(error);
                }
            }
        }

        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| format!("No weather data found for '{city}'"));
        warn!(index, city = %city, "all name variations exhausted");

        CityResult::failure(
            index,
            request,
            ResolutionStatus::NotFound,
            ErrorCode::CityNotFound,
            message,
            ResultMeta {
                cache_key: Some(cache_key),
                attempted_variations: Some(attempted),
                ..Default::default()
            },
        )
    }

    /// Every provider call goes through the weather-provider circuit gate.
    async fn guarded<T, F>(&self, fut: F) -> Result<T, ResolveError>
    where
        F: Future<Output = Result<T, ResolveError>>,
    {
        let gate = self.gates.gate(WEATHER_PROVIDER_GATE)?;
        gate.call(fut).await
    }

    /// Best-effort cache write: a failing cache degrades to uncached
    /// operation, never to a user-facing error.
    async fn store(&self, key: &str, record: &CachedWeather) {
        if let Err(error) = self.cache.set(key, record.clone(), self.ttl).await {
            warn!(key, error = %error, "cache write failed, returning result uncached");
        }
    }
}

fn is_digit_string(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_digit())
}

fn cached_meta(cache_key: String) -> ResultMeta {
    ResultMeta {
        cached: true,
        cache_key: Some(cache_key),
        source: Some(ResultSource::Cache),
        ..Default::default()
    }
}

fn api_meta(
    cache_key: String,
    attempted_variations: Option<Vec<String>>,
    successful_variation: Option<String>,
) -> ResultMeta {
    ResultMeta {
        cached: false,
        cache_key: Some(cache_key),
        attempted_variations,
        successful_variation,
        source: Some(ResultSource::Api),
    }
}

fn miss_meta(cache_key: String) -> ResultMeta {
    ResultMeta { cache_key: Some(cache_key), ..Default::default() }
}
