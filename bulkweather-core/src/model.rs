use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::provider::ProviderPayload;

/// Temperature unit attached to every resolved weather record.
pub const UNIT_CELSIUS: &str = "°C";

/// One city request within a bulk call. Exactly one of the two shapes is
/// expected: name form (`city` + optional `country`) or ID form (`cityId`).
/// The resolver branches on `city_id` presence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CityRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city_id: Option<CityId>,
}

impl CityRequest {
    pub fn by_name(city: impl Into<String>, country: Option<&str>) -> Self {
        Self {
            city: Some(city.into()),
            country: country.map(str::to_string),
            city_id: None,
        }
    }

    pub fn by_id(id: impl Into<CityId>) -> Self {
        Self { city: None, country: None, city_id: Some(id.into()) }
    }
}

/// Provider city ID, accepted as either a JSON string or number.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CityId {
    Number(u64),
    Text(String),
}

impl CityId {
    /// Coerced string form, as used for validation and cache keys.
    pub fn as_string(&self) -> String {
        match self {
            CityId::Number(n) => n.to_string(),
            CityId::Text(s) => s.clone(),
        }
    }
}

impl From<u64> for CityId {
    fn from(n: u64) -> Self {
        CityId::Number(n)
    }
}

impl From<&str> for CityId {
    fn from(s: &str) -> Self {
        CityId::Text(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

/// Geographic record derived from the provider payload. Missing fields
/// degrade to explicit sentinels, never to omitted keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedLocation {
    pub name: String,
    pub country: String,
    pub country_code: String,
    pub coordinates: Coordinates,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedWeather {
    pub temperature: i64,
    pub unit: String,
    pub condition: String,
    pub icon: String,
    pub timestamp: String,
}

/// The cache-worthy subset of a result. Per-request diagnostics (`ResultMeta`)
/// are never written to the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedWeather {
    pub location: ResolvedLocation,
    pub weather: ResolvedWeather,
}

impl CachedWeather {
    /// Transform a raw provider payload into the cacheable record.
    ///
    /// Returns `None` when the payload carries no usable data (no `main`
    /// block), which the resolver treats identically to a provider error.
    pub fn from_payload(payload: &ProviderPayload) -> Option<Self> {
        let main = payload.main.as_ref()?;

        let country_code = payload.sys.as_ref().and_then(|s| s.country.clone());

        let location = ResolvedLocation {
            name: payload.name.clone().unwrap_or_default(),
            country: country_code.clone().unwrap_or_else(|| "Unknown".to_string()),
            country_code: country_code.unwrap_or_default(),
            coordinates: payload
                .coord
                .as_ref()
                .map(|c| Coordinates { lat: c.lat, lon: c.lon })
                .unwrap_or_default(),
        };

        let condition = payload
            .weather
            .as_ref()
            .and_then(|w| w.first())
            .and_then(|w| w.description.clone())
            .unwrap_or_else(|| "Unknown".to_string());

        let icon = payload
            .weather
            .as_ref()
            .and_then(|w| w.first())
            .and_then(|w| w.icon.clone())
            .unwrap_or_default();

        let weather = ResolvedWeather {
            temperature: round_half_up(main.temp),
            unit: UNIT_CELSIUS.to_string(),
            condition,
            icon,
            timestamp: payload
                .dt
                .and_then(unix_to_utc)
                .unwrap_or_else(Utc::now)
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        };

        Some(Self { location, weather })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStatus {
    Found,
    NotFound,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Api,
    Cache,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultError {
    pub code: ErrorCode,
    pub message: String,
}

/// Diagnostic metadata attached to every per-item result.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMeta {
    pub cached: bool,
    pub cache_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempted_variations: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub successful_variation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ResultSource>,
}

/// Per-item outcome. `location`/`weather` are populated iff `status` is
/// `found`; `error` is populated iff it is not.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CityResult {
    pub search_index: usize,
    pub input: CityRequest,
    pub status: ResolutionStatus,
    pub location: Option<ResolvedLocation>,
    pub weather: Option<ResolvedWeather>,
    pub error: Option<ResultError>,
    pub meta: ResultMeta,
}

impl CityResult {
    pub fn found(
        search_index: usize,
        input: CityRequest,
        record: CachedWeather,
        meta: ResultMeta,
    ) -> Self {
        Self {
            search_index,
            input,
            status: ResolutionStatus::Found,
            location: Some(record.location),
            weather: Some(record.weather),
            error: None,
            meta,
        }
    }

    pub fn failure(
        search_index: usize,
        input: CityRequest,
        status: ResolutionStatus,
        code: ErrorCode,
        message: impl Into<String>,
        meta: ResultMeta,
    ) -> Self {
        Self {
            search_index,
            input,
            status,
            location: None,
            weather: None,
            error: Some(ResultError { code, message: message.into() }),
            meta,
        }
    }

    pub fn is_found(&self) -> bool {
        self.status == ResolutionStatus::Found
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub found: usize,
    pub failed: usize,
    pub cached: usize,
}

impl BatchSummary {
    /// Fold one settled item into the running counts.
    pub fn record(&mut self, result: &CityResult) {
        self.total += 1;
        if result.is_found() {
            self.found += 1;
            if result.meta.cached {
                self.cached += 1;
            }
        } else {
            self.failed += 1;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub cities: Vec<CityResult>,
    pub summary: BatchSummary,
    pub processing_time_ms: u64,
}

/// Round to the nearest whole degree, halves towards positive infinity:
/// 20.5 → 21, −5.5 → −5, −5.7 → −6.
pub fn round_half_up(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}

pub fn unix_to_utc(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(ts, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{PayloadCondition, PayloadCoord, PayloadMain, PayloadSys};

    fn payload(temp: f64) -> ProviderPayload {
        ProviderPayload {
            id: Some(2_643_743),
            name: Some("London".to_string()),
            dt: Some(1_751_625_000),
            coord: Some(PayloadCoord { lat: Some(51.5085), lon: Some(-0.1257) }),
            weather: Some(vec![PayloadCondition {
                main: Some("Clouds".to_string()),
                description: Some("Overcast clouds".to_string()),
                icon: Some("04d".to_string()),
            }]),
            main: Some(PayloadMain { temp }),
            sys: Some(PayloadSys { country: Some("GB".to_string()) }),
        }
    }

    #[test]
    fn rounding_vectors() {
        assert_eq!(round_half_up(20.5), 21);
        assert_eq!(round_half_up(-5.5), -5);
        assert_eq!(round_half_up(-5.7), -6);
        assert_eq!(round_half_up(15.4), 15);
        assert_eq!(round_half_up(0.0), 0);
        assert_eq!(round_half_up(-0.5), 0);
    }

    #[test]
    fn payload_transforms_to_cached_record() {
        let record = CachedWeather::from_payload(&payload(15.4)).unwrap();

        assert_eq!(record.location.name, "London");
        assert_eq!(record.location.country_code, "GB");
        assert_eq!(record.location.coordinates.lat, Some(51.5085));
        assert_eq!(record.weather.temperature, 15);
        assert_eq!(record.weather.unit, UNIT_CELSIUS);
        assert_eq!(record.weather.condition, "Overcast clouds");
        assert_eq!(record.weather.icon, "04d");
        assert_eq!(record.weather.timestamp, "2025-07-04T10:30:00.000Z");
    }

    #[test]
    fn missing_fields_degrade_to_sentinels() {
        let mut p = payload(10.0);
        p.sys = None;
        p.coord = None;
        p.weather = Some(vec![]);

        let record = CachedWeather::from_payload(&p).unwrap();
        assert_eq!(record.location.country, "Unknown");
        assert_eq!(record.location.country_code, "");
        assert_eq!(record.location.coordinates, Coordinates { lat: None, lon: None });
        assert_eq!(record.weather.condition, "Unknown");
        assert_eq!(record.weather.icon, "");
    }

    #[test]
    fn payload_without_main_block_is_unusable() {
        let mut p = payload(10.0);
        p.main = None;
        assert!(CachedWeather::from_payload(&p).is_none());
    }

    #[test]
    fn city_id_deserializes_from_string_or_number() {
        let by_number: CityRequest = serde_json::from_str(r#"{"cityId": 2643743}"#).unwrap();
        let by_text: CityRequest = serde_json::from_str(r#"{"cityId": "2643743"}"#).unwrap();

        assert_eq!(by_number.city_id.unwrap().as_string(), "2643743");
        assert_eq!(by_text.city_id.unwrap().as_string(), "2643743");
    }

    #[test]
    fn request_deserializes_name_form() {
        let req: CityRequest =
            serde_json::from_str(r#"{"city": "London", "country": "GB"}"#).unwrap();
        assert_eq!(req.city.as_deref(), Some("London"));
        assert_eq!(req.country.as_deref(), Some("GB"));
        assert!(req.city_id.is_none());
    }

    #[test]
    fn result_serializes_with_camel_case_and_null_slots() {
        let result = CityResult::failure(
            3,
            CityRequest::by_name("???", None),
            ResolutionStatus::NotFound,
            ErrorCode::CityNotFound,
            "no match",
            ResultMeta { cache_key: Some("x".into()), ..Default::default() },
        );

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["searchIndex"], 3);
        assert_eq!(json["status"], "not-found");
        assert!(json["location"].is_null());
        assert!(json["weather"].is_null());
        assert_eq!(json["error"]["code"], "CITY_NOT_FOUND");
        assert_eq!(json["meta"]["cacheKey"], "x");
        // absent variations are omitted, not null
        assert!(json["meta"].get("attemptedVariations").is_none());
    }

    #[test]
    fn summary_counts_are_mutually_consistent() {
        let mut summary = BatchSummary::default();

        let hit = CityResult::found(
            0,
            CityRequest::by_name("London", Some("GB")),
            CachedWeather::from_payload(&payload(15.4)).unwrap(),
            ResultMeta { cached: true, source: Some(ResultSource::Cache), ..Default::default() },
        );
        let miss = CityResult::failure(
            1,
            CityRequest::by_name("Atlantis", None),
            ResolutionStatus::NotFound,
            ErrorCode::CityNotFound,
            "no match",
            ResultMeta::default(),
        );

        summary.record(&hit);
        summary.record(&miss);

        assert_eq!(summary.total, 2);
        assert_eq!(summary.found + summary.failed, summary.total);
        assert!(summary.cached <= summary.found);
        assert_eq!(summary.cached, 1);
    }
}
