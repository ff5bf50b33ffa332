use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::ProviderSettings;
use crate::error::ResolveError;
use crate::retry::{RetryPolicy, send_with_retry};

use super::{ProviderPayload, WeatherApi};

/// Client for an OpenWeather-compatible current-weather endpoint.
#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    base_url: String,
    api_key: String,
    units: String,
    lang: String,
    http: Client,
    retry: RetryPolicy,
}

/// Error body the endpoint returns alongside non-2xx statuses.
#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
}

impl OpenWeatherClient {
    pub fn new(settings: &ProviderSettings, api_key: String) -> Self {
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            units: settings.units.clone(),
            lang: settings.lang.clone(),
            http: Client::new(),
            retry: RetryPolicy::default(),
        }
    }

    /// `"{city},{country}"` when a country is given, bare `{city}` otherwise.
    fn location_query(city: &str, country: &str) -> String {
        if country.is_empty() {
            city.to_string()
        } else {
            format!("{city},{country}")
        }
    }

    async fn fetch(&self, lookup: (&str, &str)) -> Result<ProviderPayload, ResolveError> {
        let url = format!("{}/weather", self.base_url);

        let res = send_with_retry(&self.retry, || {
            self.http
                .get(&url)
                .query(&[
                    lookup,
                    ("appid", self.api_key.as_str()),
                    ("units", self.units.as_str()),
                    ("lang", self.lang.as_str()),
                ])
                .send()
        })
        .await?;

        let status = res.status();
        let body = res.text().await?;

        if status == reqwest::StatusCode::NOT_FOUND {
            let message = serde_json::from_str::<ApiError>(&body)
                .ok()
                .and_then(|e| e.message)
                .unwrap_or_else(|| "city not found".to_string());
            return Err(ResolveError::CityNotFound(message));
        }

        if !status.is_success() {
            return Err(ResolveError::Internal(format!(
                "Provider request failed with status {}: {}",
                status,
                truncate_body(&body),
            )));
        }

        debug!(query = lookup.1, "provider payload received");
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl WeatherApi for OpenWeatherClient {
    async fn current_by_name(
        &self,
        city: &str,
        country: &str,
    ) -> Result<ProviderPayload, ResolveError> {
        let location = Self::location_query(city, country);
        self.fetch(("q", location.as_str())).await
    }

    async fn current_by_id(&self, city_id: &str) -> Result<ProviderPayload, ResolveError> {
        self.fetch(("id", city_id)).await
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        format!("{}...", &body[..MAX])
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_query_joins_city_and_country() {
        assert_eq!(OpenWeatherClient::location_query("London", "GB"), "London,GB");
        assert_eq!(OpenWeatherClient::location_query("London", ""), "London");
    }

    #[test]
    fn truncate_body_caps_long_payloads() {
        let long = "x".repeat(500);
        let short = truncate_body(&long);
        assert!(short.len() <= 203);
        assert!(short.ends_with("..."));
        assert_eq!(truncate_body("short"), "short");
    }

    #[test]
    fn client_strips_trailing_slash_from_base_url() {
        let settings = ProviderSettings {
            base_url: "https://api.openweathermap.org/data/2.5/".to_string(),
            ..Default::default()
        };
        let client = OpenWeatherClient::new(&settings, "KEY".to_string());
        assert_eq!(client.base_url, "https://api.openweathermap.org/data/2.5");
    }

    #[test]
    fn api_error_body_parses() {
        let err: ApiError = serde_json::from_str(r#"{"cod":"404","message":"city not found"}"#)
            .unwrap();
        assert_eq!(err.message.as_deref(), Some("city not found"));
    }
}
