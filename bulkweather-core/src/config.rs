use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::PathBuf};

/// Gate name guarding calls to the weather provider. Must appear in
/// `gates.services`; the registry rejects lookups for anything else.
pub const WEATHER_PROVIDER_GATE: &str = "weather_provider";

/// Which cache backend the process runs with. Decided once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStrategy {
    #[default]
    Memory,
    Remote,
}

/// Settings for the network-backed cache. Only required when
/// `cache.strategy = "remote"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCacheSettings {
    /// Base URL of the KV service, e.g. `http://127.0.0.1:7700`.
    pub base_url: String,
    /// Namespace prefix prepended to every key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_key_prefix() -> String {
    "bulkweather:".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub strategy: CacheStrategy,
    /// Entry lifetime in seconds.
    pub ttl_secs: u64,
    pub remote: Option<RemoteCacheSettings>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { strategy: CacheStrategy::Memory, ttl_secs: 300, remote: None }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Upstream weather provider settings. The query parameters here are fixed
/// per process, never per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub units: String,
    pub lang: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openweathermap.org/data/2.5".to_string(),
            units: "metric".to_string(),
            lang: "en".to_string(),
        }
    }
}

impl ProviderSettings {
    pub fn api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            anyhow!(
                "No API key configured for the weather provider.\n\
                 Hint: run `bulkweather configure` and enter your API key."
            )
        })
    }
}

/// Circuit gate tuning plus the closed set of service names gates exist for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateSettings {
    /// Valid gate names. Looking up anything else is a usage error.
    pub services: Vec<String>,
    pub window_secs: u64,
    pub error_threshold_pct: f64,
    pub reset_timeout_secs: u64,
    pub call_timeout_secs: u64,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            services: vec![WEATHER_PROVIDER_GATE.to_string()],
            window_secs: 10,
            error_threshold_pct: 80.0,
            reset_timeout_secs: 10,
            call_timeout_secs: 4,
        }
    }
}

/// Top-level configuration stored on disk, loaded once at process start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheSettings,
    pub provider: ProviderSettings,
    pub gates: GateSettings,
}

impl Config {
    /// Load config from disk, or return defaults if the file doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, return defaults.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "bulkweather", "bulkweather")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_memory_cache_with_five_minute_ttl() {
        let cfg = Config::default();
        assert_eq!(cfg.cache.strategy, CacheStrategy::Memory);
        assert_eq!(cfg.cache.ttl(), Duration::from_secs(300));
        assert!(cfg.cache.remote.is_none());
    }

    #[test]
    fn default_gate_set_contains_the_weather_provider() {
        let cfg = Config::default();
        assert!(cfg.gates.services.iter().any(|s| s == WEATHER_PROVIDER_GATE));
        assert_eq!(cfg.gates.call_timeout_secs, 4);
        assert_eq!(cfg.gates.window_secs, 10);
    }

    #[test]
    fn api_key_errors_when_not_set() {
        let cfg = Config::default();
        let err = cfg.provider.api_key().unwrap_err();
        assert!(err.to_string().contains("No API key configured"));
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [provider]
            api_key = "KEY"

            [cache]
            strategy = "remote"

            [cache.remote]
            base_url = "http://127.0.0.1:7700"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.provider.api_key().unwrap(), "KEY");
        assert_eq!(cfg.provider.units, "metric");
        assert_eq!(cfg.cache.strategy, CacheStrategy::Remote);
        assert_eq!(cfg.cache.remote.unwrap().key_prefix, "bulkweather:");
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut cfg = Config::default();
        cfg.provider.api_key = Some("SECRET".to_string());
        cfg.cache.ttl_secs = 60;
        cfg.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.provider.api_key.as_deref(), Some("SECRET"));
        assert_eq!(loaded.cache.ttl_secs, 60);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let cfg = Config::load_from(&path).unwrap();
        assert_eq!(cfg.cache.strategy, CacheStrategy::Memory);
    }
}
