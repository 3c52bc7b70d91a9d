use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};

use crate::model::Units;

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";

/// Remote weather API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    /// Language code passed as `lang`, e.g. "en" or "vi".
    pub lang: String,
    pub units: Units,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            lang: "en".to_string(),
            units: Units::Metric,
            request_timeout_secs: 15,
        }
    }
}

/// Where "current location" comes from on this host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Upper bound on a single location request.
    pub timeout_secs: u64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self { latitude: None, longitude: None, timeout_secs: 30 }
    }
}

impl LocationConfig {
    pub fn fixed_coordinates(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Refresh chain cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Delay before the next chain after a successful save.
    pub success_delay_minutes: u64,
    /// Delay before the next chain after any failure.
    pub failure_delay_minutes: u64,
    pub stage_timeout_secs: u64,
    pub max_concurrent_chains: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            success_delay_minutes: 15,
            failure_delay_minutes: 45,
            stage_timeout_secs: 120,
            max_concurrent_chains: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Defaults to `weather.db` in the platform data directory.
    pub database_path: Option<PathBuf>,
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// log_level = "info"
///
/// [api]
/// api_key = "..."
/// units = "metric"
/// lang = "en"
///
/// [location]
/// latitude = 21.02
/// longitude = 105.84
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Fallback tracing filter when `RUST_LOG` is not set.
    pub log_level: String,
    pub api: ApiConfig,
    pub location: LocationConfig,
    pub schedule: ScheduleConfig,
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            api: ApiConfig::default(),
            location: LocationConfig::default(),
            schedule: ScheduleConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Load config from disk, or return defaults if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            // First run: no config file.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(contents)?;
        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_file_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(&path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("dev", "weather-sync", "weather")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Snapshot database path: configured, or `weather.db` in the data directory.
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.storage.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::project_dirs()?.data_dir().join("weather.db")),
        }
    }

    /// Set or replace the API key.
    pub fn set_api_key(&mut self, api_key: String) {
        self.api.api_key = Some(api_key);
    }

    /// Returns the API key, if one is configured and non-empty.
    pub fn api_key(&self) -> Option<&str> {
        self.api.api_key.as_deref().filter(|key| !key.trim().is_empty())
    }

    pub fn is_configured(&self) -> bool {
        self.api_key().is_some()
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let schedule = &self.schedule;
        if schedule.success_delay_minutes == 0 || schedule.failure_delay_minutes == 0 {
            return Err(anyhow!("Schedule delays must be at least one minute"));
        }
        if schedule.success_delay_minutes > schedule.failure_delay_minutes {
            return Err(anyhow!(
                "success_delay_minutes ({}) must not exceed failure_delay_minutes ({})",
                schedule.success_delay_minutes,
                schedule.failure_delay_minutes
            ));
        }
        if schedule.stage_timeout_secs == 0
            || self.location.timeout_secs == 0
            || self.api.request_timeout_secs == 0
        {
            return Err(anyhow!("Timeouts must be at least one second"));
        }
        if schedule.max_concurrent_chains == 0 {
            return Err(anyhow!("max_concurrent_chains must be at least 1"));
        }

        if let Some(lat) = self.location.latitude.filter(|lat| !(-90.0..=90.0).contains(lat)) {
            return Err(anyhow!("Latitude {lat} is out of range"));
        }
        if let Some(lon) = self.location.longitude.filter(|lon| !(-180.0..=180.0).contains(lon)) {
            return Err(anyhow!("Longitude {lon} is out of range"));
        }

        Ok(())
    }
}
