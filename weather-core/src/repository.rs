//! Reconciles the local store with the remote provider.
//!
//! Callers only ever see [`DataResult`]; the lower-level error taxonomy is
//! logged here and reduced to a user-facing message. Writes go through the
//! store's atomic upsert, which is what serialises concurrent refreshes of
//! the same city.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{WeatherError, WeatherResult},
    location::{LocationProvider, request_location},
    model::{CityId, WeatherSnapshot},
    provider::WeatherProvider,
    store::{WeatherStore, run_blocking},
};

const DEFAULT_LOCATION_TIMEOUT: Duration = Duration::from_secs(30);
const EVENT_BUFFER: usize = 64;

/// Normalized outcome handed to repository callers.
#[derive(Debug, Clone, PartialEq)]
pub enum DataResult<T> {
    Success(T),
    Empty,
    /// User-visible message describing the failure.
    Error(String),
}

impl<T> DataResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> DataResult<U> {
        match self {
            Self::Success(value) => DataResult::Success(f(value)),
            Self::Empty => DataResult::Empty,
            Self::Error(message) => DataResult::Error(message),
        }
    }
}

/// Store change notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotEvent {
    Updated(WeatherSnapshot),
    Deleted(CityId),
    Cleared,
}

/// Live feed of [`SnapshotEvent`]s. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<SnapshotEvent>,
}

impl Subscription {
    /// Next event, or `None` once the repository is gone.
    pub async fn recv(&mut self) -> Option<SnapshotEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Snapshot subscriber lagged; skipping events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshTarget {
    CurrentLocation,
    CityId(CityId),
    CityName(String),
}

impl std::fmt::Display for RefreshTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshTarget::CurrentLocation => f.write_str("current location"),
            RefreshTarget::CityId(id) => write!(f, "city id {id}"),
            RefreshTarget::CityName(name) => write!(f, "city '{name}'"),
        }
    }
}

#[derive(Clone)]
pub struct WeatherRepository {
    store: Arc<dyn WeatherStore>,
    provider: Arc<dyn WeatherProvider>,
    location: Arc<dyn LocationProvider>,
    location_timeout: Duration,
    events: broadcast::Sender<SnapshotEvent>,
}

impl WeatherRepository {
    pub fn new(
        store: Arc<dyn WeatherStore>,
        provider: Arc<dyn WeatherProvider>,
        location: Arc<dyn LocationProvider>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self { store, provider, location, location_timeout: DEFAULT_LOCATION_TIMEOUT, events }
    }

    pub fn with_location_timeout(mut self, timeout: Duration) -> Self {
        self.location_timeout = timeout;
        self
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription { rx: self.events.subscribe() }
    }

    /// The most recently stored snapshot.
    pub async fn get_latest(&self) -> DataResult<WeatherSnapshot> {
        let result = self
            .with_store(|store| store.get_latest_snapshot())
            .await;
        normalize("latest snapshot", result)
    }

    pub async fn latest_id(&self) -> DataResult<CityId> {
        let result = self.with_store(|store| store.get_latest_snapshot_id()).await;
        normalize("latest id", result)
    }

    pub async fn get_by_id(&self, id: CityId) -> DataResult<WeatherSnapshot> {
        let result = self.with_store(move |store| store.get_snapshot(id)).await;
        normalize("snapshot", result)
    }

    /// Every stored snapshot, oldest insertion first.
    pub async fn get_all(&self) -> DataResult<Vec<WeatherSnapshot>> {
        let result = self
            .with_store(|store| store.get_all_snapshots())
            .await
            .map(|all| (!all.is_empty()).then_some(all));
        normalize("all snapshots", result)
    }

    /// Fetch `target` remotely and write it through to the store.
    ///
    /// Nothing is written unless the fetch succeeds. Cancellation is honoured
    /// up to the moment the store write starts.
    pub async fn refresh(
        &self,
        target: RefreshTarget,
        cancel: &CancellationToken,
    ) -> DataResult<WeatherSnapshot> {
        tracing::info!(%target, "Refreshing weather");

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WeatherError::Cancelled),
            res = self.fetch_target(&target) => res,
        };

        let result = match fetched {
            Ok(snapshot) => self.save(snapshot.clone()).await.map(|_| snapshot),
            Err(e) => Err(e),
        };

        match result {
            Ok(snapshot) => {
                tracing::info!(%target, city_id = snapshot.id, "Refresh succeeded");
                DataResult::Success(snapshot)
            }
            Err(e) => {
                tracing::warn!(%target, error = %e, "Refresh failed");
                DataResult::Error(e.user_message())
            }
        }
    }

    pub async fn refresh_current_location(&self) -> DataResult<WeatherSnapshot> {
        self.refresh(RefreshTarget::CurrentLocation, &CancellationToken::new()).await
    }

    pub async fn refresh_by_city_id(&self, id: CityId) -> DataResult<WeatherSnapshot> {
        self.refresh(RefreshTarget::CityId(id), &CancellationToken::new()).await
    }

    pub async fn refresh_by_city_name(&self, name: &str) -> DataResult<WeatherSnapshot> {
        self.refresh(RefreshTarget::CityName(name.to_string()), &CancellationToken::new()).await
    }

    /// Run a refresh in the background; the handle resolves to its result.
    pub fn spawn_refresh(
        &self,
        target: RefreshTarget,
        cancel: CancellationToken,
    ) -> JoinHandle<DataResult<WeatherSnapshot>> {
        let repo = self.clone();
        tokio::spawn(async move { repo.refresh(target, &cancel).await })
    }

    /// Persist a snapshot, replacing any previous one for the same city.
    pub async fn save(&self, snapshot: WeatherSnapshot) -> WeatherResult<CityId> {
        let stored = snapshot.clone();
        let id = self.with_store(move |store| store.upsert_snapshot(&stored)).await?;
        self.publish(SnapshotEvent::Updated(snapshot));
        Ok(id)
    }

    /// `Empty` when nothing was stored under `id`.
    pub async fn delete_by_id(&self, id: CityId) -> DataResult<()> {
        match self.with_store(move |store| store.delete_snapshot(id)).await {
            Ok(true) => {
                self.publish(SnapshotEvent::Deleted(id));
                DataResult::Success(())
            }
            Ok(false) => DataResult::Empty,
            Err(e) => {
                tracing::warn!(city_id = id, error = %e, "Delete failed");
                DataResult::Error(e.user_message())
            }
        }
    }

    /// Returns how many snapshots were removed.
    pub async fn delete_all(&self) -> DataResult<usize> {
        match self.with_store(|store| store.delete_all()).await {
            Ok(removed) => {
                self.publish(SnapshotEvent::Cleared);
                DataResult::Success(removed)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Delete all failed");
                DataResult::Error(e.user_message())
            }
        }
    }

    async fn fetch_target(&self, target: &RefreshTarget) -> WeatherResult<WeatherSnapshot> {
        match target {
            RefreshTarget::CurrentLocation => {
                let fix = request_location(self.location.as_ref(), self.location_timeout).await?;
                self.provider.fetch_by_coordinates(fix.latitude, fix.longitude).await
            }
            RefreshTarget::CityId(id) => self.provider.fetch_by_city_id(*id).await,
            RefreshTarget::CityName(name) => self.provider.fetch_by_city_name(name).await,
        }
    }

    /// Run a store operation on the blocking pool.
    async fn with_store<T, F>(&self, op: F) -> WeatherResult<T>
    where
        F: FnOnce(&dyn WeatherStore) -> WeatherResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        run_blocking(move || op(store.as_ref())).await
    }

    fn publish(&self, event: SnapshotEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn normalize<T>(what: &str, result: WeatherResult<Option<T>>) -> DataResult<T> {
    match result {
        Ok(Some(value)) => DataResult::Success(value),
        Ok(None) | Err(WeatherError::NotFound(_)) => DataResult::Empty,
        Err(e) => {
            tracing::warn!(what, error = %e, "Failed to read from store");
            DataResult::Error(e.user_message())
        }
    }
}
