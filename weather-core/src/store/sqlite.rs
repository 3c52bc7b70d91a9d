//! SQLite-backed weather store.

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::{fs, path::Path, time::Duration};

use super::{
    WeatherStore,
    rows::{ChildRow, ConditionRow, SnapshotRow, SnapshotRows},
};
use crate::{
    error::{WeatherError, WeatherResult},
    model::{CityId, Clouds, Coord, MainMetrics, Sys, Wind, WeatherSnapshot},
};

/// Child tables keyed by `city_id`. Deleting a snapshot must clear every one.
const CHILD_TABLES: &[&str] =
    &["coords", "conditions", "main_metrics", "winds", "clouds", "sys_info"];

pub struct SqliteWeatherStore {
    conn: Mutex<Connection>,
}

impl SqliteWeatherStore {
    /// Open (or create) the store at `path`, creating parent directories and schema.
    pub fn open<P: AsRef<Path>>(path: P) -> WeatherResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                WeatherError::storage(format!("create {}: {e}", parent.display()))
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;

        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> WeatherResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> WeatherResult<()> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                city_id INTEGER NOT NULL UNIQUE,
                base TEXT,
                visibility INTEGER,
                dt INTEGER,
                name TEXT,
                cod INTEGER,
                timezone INTEGER
            );

            CREATE TABLE IF NOT EXISTS coords (
                city_id INTEGER PRIMARY KEY,
                lon REAL NOT NULL,
                lat REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS conditions (
                city_id INTEGER NOT NULL,
                position INTEGER NOT NULL,
                condition_id INTEGER NOT NULL,
                main TEXT NOT NULL,
                description TEXT NOT NULL,
                icon TEXT NOT NULL,
                PRIMARY KEY (city_id, position)
            );

            CREATE TABLE IF NOT EXISTS main_metrics (
                city_id INTEGER PRIMARY KEY,
                temp REAL NOT NULL,
                feels_like REAL NOT NULL,
                pressure REAL NOT NULL,
                humidity REAL NOT NULL,
                temp_min REAL NOT NULL,
                temp_max REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS winds (
                city_id INTEGER PRIMARY KEY,
                speed REAL NOT NULL,
                deg INTEGER
            );

            CREATE TABLE IF NOT EXISTS clouds (
                city_id INTEGER PRIMARY KEY,
                coverage INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sys_info (
                city_id INTEGER PRIMARY KEY,
                kind INTEGER,
                sys_id INTEGER,
                country TEXT,
                sunrise INTEGER,
                sunset INTEGER
            );
            "#,
        )?;
        Ok(())
    }

    /// Number of stored snapshots.
    pub fn count(&self) -> WeatherResult<usize> {
        let count: i64 =
            self.conn.lock().query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Number of rows in `table` owned by `id`.
    #[cfg(test)]
    fn child_row_count(conn: &Connection, table: &str, id: CityId) -> WeatherResult<usize> {
        let sql = format!("SELECT COUNT(*) FROM {table} WHERE city_id = ?1");
        let count: i64 = conn.query_row(&sql, params![id], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn delete_rows(tx: &Transaction<'_>, id: CityId) -> WeatherResult<bool> {
        for table in CHILD_TABLES {
            tx.execute(&format!("DELETE FROM {table} WHERE city_id = ?1"), params![id])?;
        }
        let removed = tx.execute("DELETE FROM snapshots WHERE city_id = ?1", params![id])?;
        Ok(removed > 0)
    }

    fn insert_rows(tx: &Transaction<'_>, rows: &SnapshotRows) -> WeatherResult<()> {
        let head = &rows.head;
        tx.execute(
            "INSERT INTO snapshots (city_id, base, visibility, dt, name, cod, timezone)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![head.city_id, head.base, head.visibility, head.dt, head.name, head.cod, head.timezone],
        )?;

        if let Some(row) = &rows.coord {
            tx.execute(
                "INSERT INTO coords (city_id, lon, lat) VALUES (?1, ?2, ?3)",
                params![row.city_id, row.value.lon, row.value.lat],
            )?;
        }

        for row in &rows.conditions {
            tx.execute(
                "INSERT INTO conditions (city_id, position, condition_id, main, description, icon)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![row.city_id, row.position, row.condition_id, row.main, row.description, row.icon],
            )?;
        }

        if let Some(row) = &rows.main {
            let m = &row.value;
            tx.execute(
                "INSERT INTO main_metrics (city_id, temp, feels_like, pressure, humidity, temp_min, temp_max)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![row.city_id, m.temp, m.feels_like, m.pressure, m.humidity, m.temp_min, m.temp_max],
            )?;
        }

        if let Some(row) = &rows.wind {
            tx.execute(
                "INSERT INTO winds (city_id, speed, deg) VALUES (?1, ?2, ?3)",
                params![row.city_id, row.value.speed, row.value.deg],
            )?;
        }

        if let Some(row) = &rows.clouds {
            tx.execute(
                "INSERT INTO clouds (city_id, coverage) VALUES (?1, ?2)",
                params![row.city_id, row.value.all],
            )?;
        }

        if let Some(row) = &rows.sys {
            let s = &row.value;
            tx.execute(
                "INSERT INTO sys_info (city_id, kind, sys_id, country, sunrise, sunset)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![row.city_id, s.kind, s.id, s.country, s.sunrise, s.sunset],
            )?;
        }

        Ok(())
    }

    fn load_rows(conn: &Connection, id: CityId) -> WeatherResult<Option<SnapshotRows>> {
        let head = conn
            .query_row(
                "SELECT city_id, base, visibility, dt, name, cod, timezone FROM snapshots WHERE city_id = ?1",
                params![id],
                |row| {
                    Ok(SnapshotRow {
                        city_id: row.get(0)?,
                        base: row.get(1)?,
                        visibility: row.get(2)?,
                        dt: row.get(3)?,
                        name: row.get(4)?,
                        cod: row.get(5)?,
                        timezone: row.get(6)?,
                    })
                },
            )
            .optional()?;

        let Some(head) = head else {
            return Ok(None);
        };

        let coord = conn
            .query_row("SELECT lon, lat FROM coords WHERE city_id = ?1", params![id], |row| {
                Ok(Coord { lon: row.get(0)?, lat: row.get(1)? })
            })
            .optional()?
            .map(|value| ChildRow { city_id: id, value });

        let mut stmt = conn.prepare(
            "SELECT position, condition_id, main, description, icon
             FROM conditions WHERE city_id = ?1 ORDER BY position",
        )?;
        let conditions = stmt
            .query_map(params![id], |row| {
                Ok(ConditionRow {
                    city_id: id,
                    position: row.get(0)?,
                    condition_id: row.get(1)?,
                    main: row.get(2)?,
                    description: row.get(3)?,
                    icon: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let main = conn
            .query_row(
                "SELECT temp, feels_like, pressure, humidity, temp_min, temp_max
                 FROM main_metrics WHERE city_id = ?1",
                params![id],
                |row| {
                    Ok(MainMetrics {
                        temp: row.get(0)?,
                        feels_like: row.get(1)?,
                        pressure: row.get(2)?,
                        humidity: row.get(3)?,
                        temp_min: row.get(4)?,
                        temp_max: row.get(5)?,
                    })
                },
            )
            .optional()?
            .map(|value| ChildRow { city_id: id, value });

        let wind = conn
            .query_row("SELECT speed, deg FROM winds WHERE city_id = ?1", params![id], |row| {
                Ok(Wind { speed: row.get(0)?, deg: row.get(1)? })
            })
            .optional()?
            .map(|value| ChildRow { city_id: id, value });

        let clouds = conn
            .query_row("SELECT coverage FROM clouds WHERE city_id = ?1", params![id], |row| {
                Ok(Clouds { all: row.get(0)? })
            })
            .optional()?
            .map(|value| ChildRow { city_id: id, value });

        let sys = conn
            .query_row(
                "SELECT kind, sys_id, country, sunrise, sunset FROM sys_info WHERE city_id = ?1",
                params![id],
                |row| {
                    Ok(Sys {
                        kind: row.get(0)?,
                        id: row.get(1)?,
                        country: row.get(2)?,
                        sunrise: row.get(3)?,
                        sunset: row.get(4)?,
                    })
                },
            )
            .optional()?
            .map(|value| ChildRow { city_id: id, value });

        Ok(Some(SnapshotRows { head, coord, conditions, main, wind, clouds, sys }))
    }
}

impl WeatherStore for SqliteWeatherStore {
    fn upsert_snapshot(&self, snapshot: &WeatherSnapshot) -> WeatherResult<CityId> {
        let rows = SnapshotRows::from_snapshot(snapshot);

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let replaced = Self::delete_rows(&tx, snapshot.id)?;
        Self::insert_rows(&tx, &rows)?;
        tx.commit()?;

        tracing::debug!(city_id = snapshot.id, replaced, "Stored weather snapshot");
        Ok(snapshot.id)
    }

    fn get_snapshot(&self, id: CityId) -> WeatherResult<Option<WeatherSnapshot>> {
        let conn = self.conn.lock();
        Ok(Self::load_rows(&conn, id)?.map(SnapshotRows::into_snapshot))
    }

    fn get_all_snapshot_ids(&self) -> WeatherResult<Vec<CityId>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT city_id FROM snapshots ORDER BY seq ASC")?;
        let ids = stmt.query_map([], |row| row.get(0))?.collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn get_latest_snapshot_id(&self) -> WeatherResult<Option<CityId>> {
        let conn = self.conn.lock();
        let id = conn
            .query_row("SELECT city_id FROM snapshots ORDER BY seq DESC LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(id)
    }

    fn get_latest_snapshot(&self) -> WeatherResult<Option<WeatherSnapshot>> {
        let conn = self.conn.lock();
        let id: Option<CityId> = conn
            .query_row("SELECT city_id FROM snapshots ORDER BY seq DESC LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        match id {
            Some(id) => Ok(Self::load_rows(&conn, id)?.map(SnapshotRows::into_snapshot)),
            None => Ok(None),
        }
    }

    fn get_all_snapshots(&self) -> WeatherResult<Vec<WeatherSnapshot>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT city_id FROM snapshots ORDER BY seq ASC")?;
        let ids: Vec<CityId> =
            stmt.query_map([], |row| row.get(0))?.collect::<Result<Vec<_>, _>>()?;

        let mut snapshots = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(rows) = Self::load_rows(&conn, id)? {
                snapshots.push(rows.into_snapshot());
            }
        }
        Ok(snapshots)
    }

    fn delete_snapshot(&self, id: CityId) -> WeatherResult<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let existed = Self::delete_rows(&tx, id)?;
        tx.commit()?;

        tracing::debug!(city_id = id, existed, "Deleted weather snapshot");
        Ok(existed)
    }

    fn delete_all(&self) -> WeatherResult<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for table in CHILD_TABLES {
            tx.execute(&format!("DELETE FROM {table}"), [])?;
        }
        let removed = tx.execute("DELETE FROM snapshots", [])?;
        tx.commit()?;

        tracing::debug!(removed, "Deleted all weather snapshots");
        Ok(removed)
    }
}
