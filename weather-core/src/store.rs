//! Typed persistence for weather snapshots.
//!
//! A snapshot is stored as one head row keyed by its city id plus child rows
//! (coordinates, conditions, metrics, wind, clouds, sys) keyed by the same id.
//! The store is synchronous; async callers move calls onto the blocking pool.

use crate::{
    error::{WeatherError, WeatherResult},
    model::{CityId, WeatherSnapshot},
};

pub mod rows;
pub mod sqlite;

pub use rows::SnapshotRows;
pub use sqlite::SqliteWeatherStore;

pub trait WeatherStore: Send + Sync {
    /// Insert or fully replace the snapshot for `snapshot.id`.
    ///
    /// All rows of one snapshot are written atomically; a failed write leaves
    /// the previously stored snapshot untouched.
    fn upsert_snapshot(&self, snapshot: &WeatherSnapshot) -> WeatherResult<CityId>;

    fn get_snapshot(&self, id: CityId) -> WeatherResult<Option<WeatherSnapshot>>;

    /// Stored ids, oldest insertion first.
    fn get_all_snapshot_ids(&self) -> WeatherResult<Vec<CityId>>;

    /// Id of the most recently inserted (or replaced) snapshot.
    fn get_latest_snapshot_id(&self) -> WeatherResult<Option<CityId>>;

    /// The most recently inserted (or replaced) snapshot.
    ///
    /// Stores that can should read the id and the rows in one step, so a
    /// concurrent delete cannot fall between them.
    fn get_latest_snapshot(&self) -> WeatherResult<Option<WeatherSnapshot>> {
        match self.get_latest_snapshot_id()? {
            Some(id) => self.get_snapshot(id),
            None => Ok(None),
        }
    }

    /// Every stored snapshot in insertion order.
    fn get_all_snapshots(&self) -> WeatherResult<Vec<WeatherSnapshot>> {
        let mut snapshots = Vec::new();
        for id in self.get_all_snapshot_ids()? {
            if let Some(snapshot) = self.get_snapshot(id)? {
                snapshots.push(snapshot);
            }
        }
        Ok(snapshots)
    }

    /// Remove a snapshot and all of its child rows. Returns whether it existed.
    fn delete_snapshot(&self, id: CityId) -> WeatherResult<bool>;

    /// Remove everything. Returns the number of snapshots removed.
    fn delete_all(&self) -> WeatherResult<usize>;
}

/// Run a synchronous store call on the blocking pool.
pub(crate) async fn run_blocking<T, F>(op: F) -> WeatherResult<T>
where
    F: FnOnce() -> WeatherResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| WeatherError::storage(format!("store task failed: {e}")))?
}
