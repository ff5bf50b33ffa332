use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};

use bulkweather_core::config::RemoteCacheSettings;
use bulkweather_core::model::{BatchResult, CityRequest, ResultSource};
use bulkweather_core::{
    BulkWeatherResolver, CacheStrategy, Config, GateRegistry, ResolveError, cache_from_config,
    provider_from_config,
};

/// Batch-size cap enforced at this boundary; the resolver itself imposes
/// none.
pub const MAX_BATCH_SIZE: usize = 15;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "bulkweather", version, about = "Bulk weather resolution CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure provider credentials and the cache strategy.
    Configure,

    /// Resolve current weather for a batch of cities.
    Resolve {
        /// Cities as `Name`, `Name,CC`, or `#<cityId>`.
        cities: Vec<String>,

        /// Read the batch from a JSON file (array of request objects).
        #[arg(long, conflicts_with = "cities")]
        file: Option<PathBuf>,

        /// Print the raw JSON batch result instead of the table.
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Configure => configure(),
            Command::Resolve { cities, file, json } => resolve(cities, file, json).await,
        }
    }
}

fn configure() -> anyhow::Result<()> {
    let mut config = Config::load()?;

    let api_key = inquire::Password::new("Weather provider API key:")
        .without_confirmation()
        .prompt()
        .context("API key entry cancelled")?;
    config.provider.api_key = Some(api_key);

    let strategy = inquire::Select::new("Cache strategy:", vec!["memory", "remote"])
        .prompt()
        .context("Cache strategy selection cancelled")?;

    if strategy == "remote" {
        let base_url = inquire::Text::new("Remote cache base URL:")
            .with_default("http://127.0.0.1:7700")
            .prompt()
            .context("Remote cache URL entry cancelled")?;
        config.cache.strategy = CacheStrategy::Remote;
        config.cache.remote =
            Some(RemoteCacheSettings { base_url, key_prefix: "bulkweather:".to_string() });
    } else {
        config.cache.strategy = CacheStrategy::Memory;
        config.cache.remote = None;
    }

    config.save()?;
    println!("Configuration saved to {}", Config::config_file_path()?.display());
    Ok(())
}

async fn resolve(cities: Vec<String>, file: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let requests = match file {
        Some(path) => {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read batch file: {}", path.display()))?;
            serde_json::from_str::<Vec<CityRequest>>(&contents)
                .with_context(|| format!("Failed to parse batch file: {}", path.display()))?
        }
        None => cities.iter().map(|arg| parse_city_arg(arg)).collect(),
    };

    if requests.is_empty() {
        bail!("Provide at least one city, or --file with a JSON batch.");
    }
    if requests.len() > MAX_BATCH_SIZE {
        bail!("{}", ResolveError::BatchTooLarge { got: requests.len(), max: MAX_BATCH_SIZE });
    }

    // Composition root: one cache, one provider, one gate set per process.
    let config = Config::load()?;
    let cache = cache_from_config(&config.cache).await?;
    let provider = provider_from_config(&config.provider)?;
    let gates = Arc::new(GateRegistry::from_settings(&config.gates));
    let resolver = BulkWeatherResolver::new(cache, provider, gates, config.cache.ttl());

    let batch = resolver.execute(requests).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&batch)?);
    } else {
        print_batch(&batch);
    }
    Ok(())
}

/// `#123` is an ID lookup, `Name,CC` a name with country, anything else a
/// bare name.
fn parse_city_arg(arg: &str) -> CityRequest {
    let trimmed = arg.trim();
    if let Some(id) = trimmed.strip_prefix('#') {
        return CityRequest::by_id(id);
    }
    match trimmed.split_once(',') {
        Some((city, country)) => CityRequest::by_name(city.trim(), Some(country.trim())),
        None => CityRequest::by_name(trimmed, None),
    }
}

fn describe_input(request: &CityRequest) -> String {
    if let Some(id) = &request.city_id {
        format!("#{}", id.as_string())
    } else {
        request.city.clone().unwrap_or_default()
    }
}

fn print_batch(batch: &BatchResult) {
    for result in &batch.cities {
        let label = describe_input(&result.input);
        match (&result.location, &result.weather) {
            (Some(location), Some(weather)) => {
                let source = match result.meta.source {
                    Some(ResultSource::Cache) => "cache",
                    _ => "api",
                };
                println!(
                    "{label}: {}{} {} in {}, {} [{source}]",
                    weather.temperature,
                    weather.unit,
                    weather.condition,
                    location.name,
                    location.country,
                );
            }
            _ => {
                let message = result
                    .error
                    .as_ref()
                    .map(|e| e.message.as_str())
                    .unwrap_or("unknown error");
                println!("{label}: failed ({message})");
            }
        }
    }

    println!(
        "\n{} of {} resolved ({} from cache, {} failed) in {} ms",
        batch.summary.found,
        batch.summary.total,
        batch.summary.cached,
        batch.summary.failed,
        batch.processing_time_ms,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bare_name() {
        let req = parse_city_arg("London");
        assert_eq!(req.city.as_deref(), Some("London"));
        assert!(req.country.is_none());
        assert!(req.city_id.is_none());
    }

    #[test]
    fn parse_name_with_country() {
        let req = parse_city_arg("London, GB");
        assert_eq!(req.city.as_deref(), Some("London"));
        assert_eq!(req.country.as_deref(), Some("GB"));
    }

    #[test]
    fn parse_id_form() {
        let req = parse_city_arg("#2643743");
        assert_eq!(req.city_id.unwrap().as_string(), "2643743");
    }
}
