use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::ProviderSettings;
use crate::error::ResolveError;
use crate::provider::openweather::OpenWeatherClient;

pub mod openweather;

/// Raw current-weather payload as the upstream endpoint returns it. Every
/// block is optional; deciding whether the payload is usable is the
/// resolver's job, not this layer's.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderPayload {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub dt: Option<i64>,
    pub coord: Option<PayloadCoord>,
    pub weather: Option<Vec<PayloadCondition>>,
    pub main: Option<PayloadMain>,
    pub sys: Option<PayloadSys>,
}

impl ProviderPayload {
    /// A payload without the main metrics block carries nothing worth
    /// resolving; it is treated like a provider failure upstream.
    pub fn has_data(&self) -> bool {
        self.main.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayloadCoord {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayloadCondition {
    pub main: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayloadMain {
    pub temp: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayloadSys {
    pub country: Option<String>,
}

/// Thin seam over the external weather endpoint: look up current weather by
/// name (+ optional country) or by provider city ID. API key, units and
/// language are fixed configuration, never per-call inputs.
#[async_trait]
pub trait WeatherApi: Send + Sync + Debug {
    async fn current_by_name(
        &self,
        city: &str,
        country: &str,
    ) -> Result<ProviderPayload, ResolveError>;

    async fn current_by_id(&self, city_id: &str) -> Result<ProviderPayload, ResolveError>;
}

/// Construct the provider client from config.
pub fn provider_from_config(settings: &ProviderSettings) -> anyhow::Result<Arc<dyn WeatherApi>> {
    let api_key = settings.api_key()?.to_owned();
    Ok(Arc::new(OpenWeatherClient::new(settings, api_key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_deserializes_from_provider_json() {
        let json = r#"{
            "coord": {"lon": -0.1257, "lat": 51.5085},
            "weather": [{"id": 804, "main": "Clouds", "description": "Overcast clouds", "icon": "04d"}],
            "main": {"temp": 15.4, "feels_like": 14.9, "humidity": 72},
            "dt": 1751625000,
            "sys": {"country": "GB"},
            "id": 2643743,
            "name": "London"
        }"#;

        let payload: ProviderPayload = serde_json::from_str(json).unwrap();
        assert!(payload.has_data());
        assert_eq!(payload.name.as_deref(), Some("London"));
        assert_eq!(payload.main.unwrap().temp, 15.4);
        assert_eq!(payload.sys.unwrap().country.as_deref(), Some("GB"));
    }

    #[test]
    fn empty_object_parses_but_has_no_data() {
        let payload: ProviderPayload = serde_json::from_str("{}").unwrap();
        assert!(!payload.has_data());
    }

    #[test]
    fn provider_from_config_errors_when_missing_api_key() {
        let settings = ProviderSettings::default();
        let err = provider_from_config(&settings).unwrap_err();
        assert!(err.to_string().contains("No API key configured"));
    }

    #[test]
    fn provider_from_config_works_when_key_is_set() {
        let settings = ProviderSettings { api_key: Some("KEY".to_string()), ..Default::default() };
        assert!(provider_from_config(&settings).is_ok());
    }
}
