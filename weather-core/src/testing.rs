//! Test doubles for the provider, location and store seams.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use crate::{
    error::{LocationError, WeatherError, WeatherResult},
    location::{LocationFix, LocationProvider},
    model::{CityId, Coord, WeatherSnapshot, fixtures},
    provider::WeatherProvider,
    store::{SqliteWeatherStore, WeatherStore},
};

#[derive(Debug, Clone, Copy)]
pub enum ProviderBehaviour {
    Ok,
    NotFound,
    Status(u16),
}

/// Provider answering from fixtures; every response is tagged with its call number.
#[derive(Debug)]
pub struct StubProvider {
    behaviour: ProviderBehaviour,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StubProvider {
    pub fn new(behaviour: ProviderBehaviour) -> Arc<Self> {
        Arc::new(Self { behaviour, delay: None, calls: AtomicUsize::new(0) })
    }

    pub fn ok() -> Arc<Self> {
        Self::new(ProviderBehaviour::Ok)
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self { behaviour: ProviderBehaviour::Ok, delay: Some(delay), calls: AtomicUsize::new(0) })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn answer(&self, id: CityId, target: &str) -> WeatherResult<WeatherSnapshot> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.behaviour {
            ProviderBehaviour::Ok => {
                let mut snapshot = fixtures::snapshot(id);
                snapshot.name = Some(format!("{target} #{call}"));
                Ok(snapshot)
            }
            ProviderBehaviour::NotFound => Err(WeatherError::NotFound(target.to_string())),
            ProviderBehaviour::Status(status) => {
                Err(WeatherError::Api { status, message: "stubbed failure".into() })
            }
        }
    }
}

#[async_trait]
impl WeatherProvider for StubProvider {
    async fn fetch_by_coordinates(&self, lat: f64, lon: f64) -> WeatherResult<WeatherSnapshot> {
        let mut snapshot = self.answer(1000, "here").await?;
        snapshot.coord = Some(Coord { lon, lat });
        Ok(snapshot)
    }

    async fn fetch_by_city_id(&self, id: CityId) -> WeatherResult<WeatherSnapshot> {
        self.answer(id, "id").await
    }

    async fn fetch_by_city_name(&self, name: &str) -> WeatherResult<WeatherSnapshot> {
        self.answer(2000, name).await
    }
}

#[derive(Debug)]
pub struct StubLocation {
    answer: Result<(f64, f64), fn() -> LocationError>,
    calls: AtomicUsize,
}

impl StubLocation {
    pub fn at(latitude: f64, longitude: f64) -> Arc<Self> {
        Arc::new(Self { answer: Ok((latitude, longitude)), calls: AtomicUsize::new(0) })
    }

    pub fn denied() -> Arc<Self> {
        Arc::new(Self { answer: Err(|| LocationError::PermissionDenied), calls: AtomicUsize::new(0) })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocationProvider for StubLocation {
    async fn best_known_location(&self) -> Result<LocationFix, LocationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.answer {
            Ok((latitude, longitude)) => Ok(LocationFix { latitude, longitude, time: Utc::now() }),
            Err(make) => Err(make()),
        }
    }
}

/// SQLite store whose writes can be switched to fail.
pub struct FlakyStore {
    inner: SqliteWeatherStore,
    fail_writes: AtomicBool,
    writes: Mutex<Vec<CityId>>,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteWeatherStore::in_memory().expect("in-memory store"),
            fail_writes: AtomicBool::new(false),
            writes: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        let store = Self::new();
        store.set_fail_writes(true);
        store
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Ids of successful upserts, in order.
    pub fn writes(&self) -> Vec<CityId> {
        self.writes.lock().clone()
    }
}

impl WeatherStore for FlakyStore {
    fn upsert_snapshot(&self, snapshot: &WeatherSnapshot) -> WeatherResult<CityId> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(WeatherError::storage("disk full"));
        }
        let id = self.inner.upsert_snapshot(snapshot)?;
        self.writes.lock().push(id);
        Ok(id)
    }

    fn get_snapshot(&self, id: CityId) -> WeatherResult<Option<WeatherSnapshot>> {
        self.inner.get_snapshot(id)
    }

    fn get_all_snapshot_ids(&self) -> WeatherResult<Vec<CityId>> {
        self.inner.get_all_snapshot_ids()
    }

    fn get_latest_snapshot_id(&self) -> WeatherResult<Option<CityId>> {
        self.inner.get_latest_snapshot_id()
    }

    fn get_latest_snapshot(&self) -> WeatherResult<Option<WeatherSnapshot>> {
        self.inner.get_latest_snapshot()
    }

    fn delete_snapshot(&self, id: CityId) -> WeatherResult<bool> {
        self.inner.delete_snapshot(id)
    }

    fn delete_all(&self) -> WeatherResult<usize> {
        self.inner.delete_all()
    }
}
