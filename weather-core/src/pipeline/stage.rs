//! The units of work a refresh chain is made of.

use async_trait::async_trait;
use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use super::payload::{JobData, keys};
use crate::{
    error::{WeatherError, WeatherResult},
    location::{LocationProvider, request_location},
    model::WeatherSnapshot,
    provider::{WeatherProvider, validate_coordinates},
    repository::WeatherRepository,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Locate,
    Fetch,
    Persist,
    Reschedule,
}

impl StageKind {
    pub const ALL: [StageKind; 4] =
        [StageKind::Locate, StageKind::Fetch, StageKind::Persist, StageKind::Reschedule];

    /// Name stored in the schedule table.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Locate => "locate",
            StageKind::Fetch => "fetch",
            StageKind::Persist => "persist",
            StageKind::Reschedule => "reschedule",
        }
    }

    /// `None` after the terminal stage.
    pub fn next(self) -> Option<StageKind> {
        match self {
            StageKind::Locate => Some(StageKind::Fetch),
            StageKind::Fetch => Some(StageKind::Persist),
            StageKind::Persist => Some(StageKind::Reschedule),
            StageKind::Reschedule => None,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = WeatherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| WeatherError::malformed(format!("unknown stage '{s}'")))
    }
}

/// One step of a chain: consumes the previous stage's output, produces its own.
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    async fn run(&self, input: &JobData) -> WeatherResult<JobData>;
}

/// Emits `{lat, lon, location_time}` from a bounded location request.
pub struct LocateStage {
    location: Arc<dyn LocationProvider>,
    timeout: Duration,
}

impl LocateStage {
    pub fn new(location: Arc<dyn LocationProvider>, timeout: Duration) -> Self {
        Self { location, timeout }
    }
}

#[async_trait]
impl Stage for LocateStage {
    fn kind(&self) -> StageKind {
        StageKind::Locate
    }

    async fn run(&self, _input: &JobData) -> WeatherResult<JobData> {
        let fix = request_location(self.location.as_ref(), self.timeout).await?;
        validate_coordinates(fix.latitude, fix.longitude)?;

        Ok(JobData::new()
            .with(keys::LAT, fix.latitude)
            .with(keys::LON, fix.longitude)
            .with(keys::LOCATION_TIME, fix.time.timestamp_millis()))
    }
}

/// Fetches weather for `{lat, lon}` and emits the snapshot as JSON.
pub struct FetchStage {
    provider: Arc<dyn WeatherProvider>,
}

impl FetchStage {
    pub fn new(provider: Arc<dyn WeatherProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Stage for FetchStage {
    fn kind(&self) -> StageKind {
        StageKind::Fetch
    }

    async fn run(&self, input: &JobData) -> WeatherResult<JobData> {
        let lat = input.require_f64(keys::LAT)?;
        let lon = input.require_f64(keys::LON)?;

        let snapshot = self.provider.fetch_by_coordinates(lat, lon).await?;
        tracing::debug!(city_id = snapshot.id, "Fetched snapshot for chain");

        Ok(JobData::new().with(keys::WEATHER_RESPONSE, serde_json::to_string(&snapshot)?))
    }
}

/// Decodes the fetched snapshot and writes it through the repository.
pub struct PersistStage {
    repository: WeatherRepository,
}

impl PersistStage {
    pub fn new(repository: WeatherRepository) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl Stage for PersistStage {
    fn kind(&self) -> StageKind {
        StageKind::Persist
    }

    async fn run(&self, input: &JobData) -> WeatherResult<JobData> {
        let body = input.require_str(keys::WEATHER_RESPONSE)?;
        let snapshot: WeatherSnapshot = serde_json::from_str(body)?;
        let city_id = self.repository.save(snapshot).await?;
        tracing::debug!(city_id, "Persisted snapshot for chain");

        Ok(JobData::new().with(keys::SAVE_RESULT, true))
    }
}

/// The three working stages; rescheduling is done by the runner itself.
#[derive(Clone)]
pub struct Stages {
    pub locate: Arc<dyn Stage>,
    pub fetch: Arc<dyn Stage>,
    pub persist: Arc<dyn Stage>,
}

impl Stages {
    pub fn new(
        location: Arc<dyn LocationProvider>,
        location_timeout: Duration,
        provider: Arc<dyn WeatherProvider>,
        repository: WeatherRepository,
    ) -> Self {
        Self {
            locate: Arc::new(LocateStage::new(location, location_timeout)),
            fetch: Arc::new(FetchStage::new(provider)),
            persist: Arc::new(PersistStage::new(repository)),
        }
    }

    pub fn get(&self, kind: StageKind) -> Option<&Arc<dyn Stage>> {
        match kind {
            StageKind::Locate => Some(&self.locate),
            StageKind::Fetch => Some(&self.fetch),
            StageKind::Persist => Some(&self.persist),
            StageKind::Reschedule => None,
        }
    }
}
