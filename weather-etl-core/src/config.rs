use anyhow::{Context, Result, anyhow, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{batch::FailurePolicy, model::City};

/// Environment variable that overrides the API key stored on disk.
pub const API_KEY_ENV: &str = "WEATHER_API_KEY";

const DEFAULT_CITIES: &[&str] = &["Paris", "Seoul", "Tokyo", "Seattle", "Antananarivo"];

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// cities = ["Paris", "Seoul"]
///
/// [run]
/// failure_policy = "lenient"
///
/// [storage]
/// bucket = "weather-data-etl-s3"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// OpenWeather API key. `WEATHER_API_KEY` takes precedence when set.
    pub api_key: Option<String>,

    /// Ordered city list; drives fan-out and row order.
    pub cities: Vec<City>,

    pub source: SourceConfig,
    pub fetch: FetchConfig,
    pub run: RunConfig,
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            cities: DEFAULT_CITIES.iter().copied().map(City::from).collect(),
            source: SourceConfig::default(),
            fetch: FetchConfig::default(),
            run: RunConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self { base_url: "https://api.openweathermap.org".to_string(), request_timeout_secs: 30 }
    }
}

impl SourceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Per-city retry budget for the readiness + fetch unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { max_attempts: 3, retry_delay_secs: 5 }
    }
}

impl FetchConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub timeout_secs: u64,
    pub failure_policy: FailurePolicy,

    /// Additional whole-run attempts after a failed run.
    pub retries: u32,
    pub retry_delay_secs: u64,

    /// Cadence for whatever scheduler triggers the runs; not interpreted here.
    pub schedule: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            failure_policy: FailurePolicy::Strict,
            retries: 2,
            retry_delay_secs: 120,
            schedule: "@daily".to_string(),
        }
    }
}

impl RunConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub bucket: String,

    /// Filesystem root backing the local object store.
    pub root_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { bucket: "weather-data-etl-s3".to_string(), root_dir: None }
    }
}

impl StorageConfig {
    /// Configured root, or the platform data directory.
    pub fn resolved_root(&self) -> Result<PathBuf> {
        if let Some(root) = &self.root_dir {
            return Ok(root.clone());
        }

        Ok(project_dirs()?.data_dir().join("objects"))
    }
}

impl Config {
    /// Load config from disk, or return defaults if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, use defaults.
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

    pub fn save_to(&self, path: &Path) -> Result<()> {
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
        Ok(project_dirs()?.config_dir().join("config.toml"))
    }

    /// API key from the environment, falling back to the config file.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_with_override(std::env::var(API_KEY_ENV).ok())
    }

    fn api_key_with_override(&self, env_value: Option<String>) -> Option<String> {
        env_value
            .filter(|key| !key.trim().is_empty())
            .or_else(|| self.api_key.clone())
    }

    /// API key required for a run, with a hint when it is missing.
    pub fn require_api_key(&self) -> Result<String> {
        self.api_key().ok_or_else(|| {
            anyhow!(
                "No API key configured.\n\
                 Hint: run `weather-etl configure` or set {API_KEY_ENV}."
            )
        })
    }

    pub fn set_api_key(&mut self, api_key: String) {
        self.api_key = Some(api_key);
    }

    /// Replace the city list from a comma separated string.
    pub fn set_cities_from_list(&mut self, list: &str) {
        self.cities = list
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(City::from)
            .collect();
    }

    /// Check the settings a run depends on.
    pub fn validate(&self) -> Result<()> {
        if self.cities.is_empty() {
            bail!("City list is empty; configure at least one city.");
        }

        let mut seen = HashSet::new();
        for city in &self.cities {
            if !seen.insert(city.name().to_lowercase()) {
                bail!("City '{city}' is listed more than once.");
            }
        }

        if self.fetch.max_attempts == 0 {
            bail!("fetch.max_attempts must be at least 1.");
        }

        if self.storage.bucket.trim().is_empty() {
            bail!("storage.bucket must not be empty.");
        }

        Ok(())
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("dev", "weather-etl", "weather-etl")
        .ok_or_else(|| anyhow!("Could not determine platform config directory"))
}
