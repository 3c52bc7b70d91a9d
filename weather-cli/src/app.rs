//! Composition root: builds the store, client, repository and scheduler from config.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::{path::PathBuf, sync::Arc};

use weather_core::{
    CityId, Config, Connectivity, FixedLocationProvider, LocationProvider, SqliteWeatherStore,
    UnavailableLocationProvider, WeatherError, WeatherProvider, WeatherRepository, WeatherResult,
    WeatherSnapshot,
    pipeline::{ChainRunner, RunnerOptions, Scheduler, SqliteScheduleStore, Stages},
    provider_from_config,
};

pub struct App {
    config: Config,
    db_path: PathBuf,
    provider: Arc<dyn WeatherProvider>,
    location: Arc<dyn LocationProvider>,
    repository: WeatherRepository,
}

impl App {
    pub fn open(config: Config) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let db_path = config.database_path()?;
        let store = SqliteWeatherStore::open(&db_path)
            .with_context(|| format!("Failed to open weather store: {}", db_path.display()))?;

        let provider: Arc<dyn WeatherProvider> = if config.is_configured() {
            Arc::new(provider_from_config(&config)?)
        } else {
            Arc::new(NotConfigured)
        };

        let location: Arc<dyn LocationProvider> = match config.location.fixed_coordinates() {
            Some((lat, lon)) => Arc::new(FixedLocationProvider::new(lat, lon)),
            None => Arc::new(UnavailableLocationProvider),
        };

        let repository =
            WeatherRepository::new(Arc::new(store), provider.clone(), location.clone())
                .with_location_timeout(config.location.timeout());

        tracing::debug!(db = %db_path.display(), configured = config.is_configured(), "App opened");
        Ok(Self { config, db_path, provider, location, repository })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Fail with a setup hint unless an API key is configured.
    pub fn require_api_key(&self) -> Result<()> {
        if !self.config.is_configured() {
            bail!(
                "No API key configured for OpenWeather.\n\
                 Hint: run `weather configure` and enter your API key."
            );
        }
        Ok(())
    }

    /// Clones share one change feed, so subscribers see pipeline writes too.
    pub fn repository(&self) -> WeatherRepository {
        self.repository.clone()
    }

    pub fn schedule(&self) -> Result<Arc<SqliteScheduleStore>> {
        let schedule = SqliteScheduleStore::open(&self.db_path).with_context(|| {
            format!("Failed to open schedule table: {}", self.db_path.display())
        })?;
        Ok(Arc::new(schedule))
    }

    pub fn scheduler(&self) -> Result<Scheduler> {
        let schedule = self.schedule()?;
        let stages = Stages::new(
            self.location.clone(),
            self.config.location.timeout(),
            self.provider.clone(),
            self.repository(),
        );
        let runner = ChainRunner::new(
            schedule.clone(),
            stages,
            Connectivity::online(),
            RunnerOptions::from_config(&self.config.schedule),
        );
        Ok(Scheduler::new(schedule, runner, self.config.schedule.max_concurrent_chains))
    }
}

/// Stands in for the remote client until an API key is configured, so the
/// local-only commands still work.
#[derive(Debug)]
struct NotConfigured;

impl NotConfigured {
    fn error() -> WeatherError {
        WeatherError::Api { status: 401, message: "no API key configured".to_string() }
    }
}

#[async_trait]
impl WeatherProvider for NotConfigured {
    async fn fetch_by_coordinates(&self, _lat: f64, _lon: f64) -> WeatherResult<WeatherSnapshot> {
        Err(Self::error())
    }

    async fn fetch_by_city_id(&self, _id: CityId) -> WeatherResult<WeatherSnapshot> {
        Err(Self::error())
    }

    async fn fetch_by_city_name(&self, _name: &str) -> WeatherResult<WeatherSnapshot> {
        Err(Self::error())
    }
}
