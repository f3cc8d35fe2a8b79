//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::time::Duration;

use crate::data::openweather::DEFAULT_BASE_URL;
use crate::engine::scheduler::SchedulerConfig;
use crate::types::City;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    pub upstream: UpstreamConfig,
    pub ingestion: IngestionConfig,
    pub api: ApiConfig,
    /// Static city table (replaces a geocoding bootstrap).
    #[serde(default)]
    pub cities: Vec<CityConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// SQLite URL, e.g. `sqlite://forecasts.db`.
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_units")]
    pub units: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    pub interval_secs: u64,
    /// Directory for per-city snapshot files. In-memory cache when absent.
    #[serde(default)]
    pub snapshot_dir: Option<String>,
    #[serde(default = "default_persist_retries")]
    pub persist_retries: u32,
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    pub tracked_cities: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CityConfig {
    pub name: String,
    pub country: String,
    pub lat: f64,
    pub lon: f64,
}

fn default_max_connections() -> u32 {
    5
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_units() -> String {
    "metric".to_string()
}

fn default_persist_retries() -> u32 {
    1
}

fn default_fetch_concurrency() -> usize {
    1
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service can't run with.
    pub fn validate(&self) -> Result<()> {
        if self.ingestion.interval_secs == 0 {
            bail!("ingestion.interval_secs must be greater than zero");
        }
        if self.ingestion.fetch_concurrency == 0 {
            bail!("ingestion.fetch_concurrency must be greater than zero");
        }
        if self.database.max_connections == 0 {
            bail!("database.max_connections must be greater than zero");
        }

        let mut seen = HashSet::new();
        for city in &self.cities {
            if !seen.insert(city.name.as_str()) {
                bail!("duplicate city in city table: {}", city.name);
            }
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// The configured city table.
    pub fn city_table(&self) -> Vec<City> {
        self.cities
            .iter()
            .map(|c| City::new(&c.name, &c.country, c.lat, c.lon))
            .collect()
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.ingestion.interval_secs),
            tracked_cities: self.ingestion.tracked_cities.clone(),
            persist_retries: self.ingestion.persist_retries,
            fetch_concurrency: self.ingestion.fetch_concurrency,
        }
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.timeout_secs)
    }
}
