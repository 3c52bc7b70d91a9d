//! Durable schedule table.
//!
//! Each row is one chain: which stage it is at, the payload that stage will
//! consume, and when it may run. Progress is written after every stage so a
//! killed process resumes where it stopped.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::{fmt, fs, path::Path, str::FromStr, time::Duration};

use super::{
    payload::{JobData, keys},
    stage::StageKind,
};
use crate::error::{WeatherError, WeatherResult};

pub type ChainId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Pending,
    Running,
    Completed,
    Cancelled,
}

impl ChainState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainState::Pending => "pending",
            ChainState::Running => "running",
            ChainState::Completed => "completed",
            ChainState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainState {
    type Err = WeatherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ChainState::Pending),
            "running" => Ok(ChainState::Running),
            "completed" => Ok(ChainState::Completed),
            "cancelled" => Ok(ChainState::Cancelled),
            other => Err(WeatherError::malformed(format!("unknown chain state '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainRecord {
    pub id: ChainId,
    pub state: ChainState,
    /// Stage to run next.
    pub stage: StageKind,
    /// Input for `stage`.
    pub payload: JobData,
    pub next_run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

pub trait ScheduleStore: Send + Sync {
    /// New chain starting at the locate stage.
    fn enqueue(&self, run_at: DateTime<Utc>) -> WeatherResult<ChainId>;

    /// Pending chain with the earliest run time.
    fn next_pending(&self) -> WeatherResult<Option<ChainRecord>>;

    /// Claim a pending chain. Returns `false` if it was no longer pending.
    fn mark_running(&self, id: ChainId) -> WeatherResult<bool>;

    fn record_progress(&self, id: ChainId, stage: StageKind, payload: &JobData) -> WeatherResult<()>;

    /// Note a stage failure and move the chain to its reschedule stage with an
    /// unsuccessful save.
    fn record_failure(&self, id: ChainId, stage: StageKind, error: &str) -> WeatherResult<()>;

    /// Complete `id` and enqueue its successor in one transaction.
    ///
    /// Fails with [`WeatherError::Cancelled`] if `id` is no longer active.
    fn complete_and_enqueue(&self, id: ChainId, run_at: DateTime<Utc>) -> WeatherResult<ChainId>;

    fn cancel_pending(&self) -> WeatherResult<usize>;

    fn mark_cancelled(&self, id: ChainId) -> WeatherResult<()>;

    /// Return chains left running by a dead process to pending, due now.
    fn recover_interrupted(&self) -> WeatherResult<usize>;

    fn get(&self, id: ChainId) -> WeatherResult<Option<ChainRecord>>;

    fn pending_count(&self) -> WeatherResult<usize>;
}

pub struct SqliteScheduleStore {
    conn: Mutex<Connection>,
}

const CHAIN_COLUMNS: &str =
    "id, state, stage, payload, next_run_at, created_at, updated_at, last_error";

impl SqliteScheduleStore {
    /// Open (or create) the schedule table in the database at `path`.
    ///
    /// Safe to point at the same file as the snapshot store.
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

    pub fn in_memory() -> WeatherResult<Self> {
        let store = Self { conn: Mutex::new(Connection::open_in_memory()?) };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> WeatherResult<()> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS chains (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                state TEXT NOT NULL,
                stage TEXT NOT NULL,
                payload TEXT NOT NULL,
                next_run_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                last_error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_chains_state_run_at ON chains(state, next_run_at);
            "#,
        )?;
        Ok(())
    }

    fn insert_chain(conn: &Connection, run_at: DateTime<Utc>) -> WeatherResult<ChainId> {
        let now = Utc::now().timestamp_millis();
        conn.execute(
            "INSERT INTO chains (state, stage, payload, next_run_at, created_at, updated_at)
             VALUES (?1, ?2, '{}', ?3, ?4, ?4)",
            params![
                ChainState::Pending.as_str(),
                StageKind::Locate.as_str(),
                run_at.timestamp_millis(),
                now
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn read_chain(row: &Row<'_>) -> rusqlite::Result<RawChain> {
        Ok(RawChain {
            id: row.get(0)?,
            state: row.get(1)?,
            stage: row.get(2)?,
            payload: row.get(3)?,
            next_run_at: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            last_error: row.get(7)?,
        })
    }

    fn cancel_unreadable(conn: &Connection, id: ChainId, error: &WeatherError) -> WeatherResult<()> {
        conn.execute(
            "UPDATE chains SET state = ?1, last_error = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                ChainState::Cancelled.as_str(),
                format!("unreadable chain row: {error}"),
                Utc::now().timestamp_millis(),
                id
            ],
        )?;
        Ok(())
    }

    /// Overwrite a chain's payload with raw text.
    #[cfg(test)]
    pub(crate) fn overwrite_payload(&self, id: ChainId, payload: &str) {
        self.conn
            .lock()
            .execute("UPDATE chains SET payload = ?1 WHERE id = ?2", params![payload, id])
            .expect("overwrite payload");
    }
}

/// Chain row as stored, before parsing.
struct RawChain {
    id: ChainId,
    state: String,
    stage: String,
    payload: String,
    next_run_at: i64,
    created_at: i64,
    updated_at: i64,
    last_error: Option<String>,
}

impl TryFrom<RawChain> for ChainRecord {
    type Error = WeatherError;

    fn try_from(raw: RawChain) -> Result<Self, Self::Error> {
        Ok(ChainRecord {
            id: raw.id,
            state: raw.state.parse()?,
            stage: raw.stage.parse()?,
            payload: JobData::decode(&raw.payload)?,
            next_run_at: from_millis(raw.next_run_at)?,
            created_at: from_millis(raw.created_at)?,
            updated_at: from_millis(raw.updated_at)?,
            last_error: raw.last_error,
        })
    }
}

fn from_millis(ms: i64) -> WeatherResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| WeatherError::malformed(format!("timestamp {ms} out of range")))
}

impl ScheduleStore for SqliteScheduleStore {
    fn enqueue(&self, run_at: DateTime<Utc>) -> WeatherResult<ChainId> {
        let id = Self::insert_chain(&self.conn.lock(), run_at)?;
        tracing::debug!(chain_id = id, %run_at, "Enqueued chain");
        Ok(id)
    }

    fn next_pending(&self) -> WeatherResult<Option<ChainRecord>> {
        let conn = self.conn.lock();
        loop {
            let raw = conn
                .query_row(
                    &format!(
                        "SELECT {CHAIN_COLUMNS} FROM chains WHERE state = ?1
                         ORDER BY next_run_at ASC, id ASC LIMIT 1"
                    ),
                    params![ChainState::Pending.as_str()],
                    Self::read_chain,
                )
                .optional()?;
            let Some(raw) = raw else {
                return Ok(None);
            };

            let id = raw.id;
            match ChainRecord::try_from(raw) {
                Ok(chain) => return Ok(Some(chain)),
                Err(e) => {
                    // A row that cannot be read would otherwise block every chain behind it.
                    tracing::warn!(chain_id = id, error = %e, "Cancelling unreadable chain");
                    Self::cancel_unreadable(&conn, id, &e)?;
                }
            }
        }
    }

    fn mark_running(&self, id: ChainId) -> WeatherResult<bool> {
        let claimed = self.conn.lock().execute(
            "UPDATE chains SET state = ?1, updated_at = ?2 WHERE id = ?3 AND state = ?4",
            params![
                ChainState::Running.as_str(),
                Utc::now().timestamp_millis(),
                id,
                ChainState::Pending.as_str()
            ],
        )?;
        Ok(claimed > 0)
    }

    fn record_progress(&self, id: ChainId, stage: StageKind, payload: &JobData) -> WeatherResult<()> {
        let payload = payload.encode()?;
        self.conn.lock().execute(
            "UPDATE chains SET stage = ?1, payload = ?2, updated_at = ?3 WHERE id = ?4",
            params![stage.as_str(), payload, Utc::now().timestamp_millis(), id],
        )?;
        Ok(())
    }

    fn record_failure(&self, id: ChainId, stage: StageKind, error: &str) -> WeatherResult<()> {
        let payload = JobData::new().with(keys::SAVE_RESULT, false).encode()?;
        self.conn.lock().execute(
            "UPDATE chains SET stage = ?1, payload = ?2, last_error = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                StageKind::Reschedule.as_str(),
                payload,
                format!("{stage}: {error}"),
                Utc::now().timestamp_millis(),
                id
            ],
        )?;
        Ok(())
    }

    fn complete_and_enqueue(&self, id: ChainId, run_at: DateTime<Utc>) -> WeatherResult<ChainId> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let completed = tx.execute(
            "UPDATE chains SET state = ?1, updated_at = ?2
             WHERE id = ?3 AND state IN (?4, ?5)",
            params![
                ChainState::Completed.as_str(),
                Utc::now().timestamp_millis(),
                id,
                ChainState::Pending.as_str(),
                ChainState::Running.as_str()
            ],
        )?;
        if completed == 0 {
            // Dropping `tx` rolls back.
            return Err(WeatherError::Cancelled);
        }

        let next = Self::insert_chain(&tx, run_at)?;
        tx.commit()?;

        tracing::debug!(chain_id = id, next_chain_id = next, %run_at, "Chain completed");
        Ok(next)
    }

    fn cancel_pending(&self) -> WeatherResult<usize> {
        let cancelled = self.conn.lock().execute(
            "UPDATE chains SET state = ?1, updated_at = ?2 WHERE state = ?3",
            params![
                ChainState::Cancelled.as_str(),
                Utc::now().timestamp_millis(),
                ChainState::Pending.as_str()
            ],
        )?;
        Ok(cancelled)
    }

    fn mark_cancelled(&self, id: ChainId) -> WeatherResult<()> {
        self.conn.lock().execute(
            "UPDATE chains SET state = ?1, updated_at = ?2 WHERE id = ?3 AND state IN (?4, ?5)",
            params![
                ChainState::Cancelled.as_str(),
                Utc::now().timestamp_millis(),
                id,
                ChainState::Pending.as_str(),
                ChainState::Running.as_str()
            ],
        )?;
        Ok(())
    }

    fn recover_interrupted(&self) -> WeatherResult<usize> {
        let now = Utc::now().timestamp_millis();
        let recovered = self.conn.lock().execute(
            "UPDATE chains SET state = ?1, next_run_at = ?2, updated_at = ?2 WHERE state = ?3",
            params![ChainState::Pending.as_str(), now, ChainState::Running.as_str()],
        )?;
        if recovered > 0 {
            tracing::info!(recovered, "Recovered interrupted chains");
        }
        Ok(recovered)
    }

    fn get(&self, id: ChainId) -> WeatherResult<Option<ChainRecord>> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                &format!("SELECT {CHAIN_COLUMNS} FROM chains WHERE id = ?1"),
                params![id],
                Self::read_chain,
            )
            .optional()?;
        raw.map(ChainRecord::try_from).transpose()
    }

    fn pending_count(&self) -> WeatherResult<usize> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM chains WHERE state = ?1",
            params![ChainState::Pending.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn store() -> SqliteScheduleStore {
        SqliteScheduleStore::in_memory().expect("in-memory schedule")
    }

    #[test]
    fn enqueued_chain_starts_at_locate() {
        let store = store();
        let id = store.enqueue(Utc::now()).unwrap();

        let chain = store.get(id).unwrap().unwrap();
        assert_eq!(chain.state, ChainState::Pending);
        assert_eq!(chain.stage, StageKind::Locate);
        assert!(chain.payload.is_empty());
        assert_eq!(chain.last_error, None);
        assert_eq!(store.pending_count().unwrap(), 1);
    }

    #[test]
    fn next_pending_is_earliest_due() {
        let store = store();
        let now = Utc::now();
        let later = store.enqueue(now + TimeDelta::minutes(30)).unwrap();
        let sooner = store.enqueue(now + TimeDelta::minutes(5)).unwrap();

        assert_eq!(store.next_pending().unwrap().unwrap().id, sooner);
        assert!(store.mark_running(sooner).unwrap());
        assert_eq!(store.next_pending().unwrap().unwrap().id, later);
    }

    #[test]
    fn mark_running_claims_once() {
        let store = store();
        let id = store.enqueue(Utc::now()).unwrap();

        assert!(store.mark_running(id).unwrap());
        assert!(!store.mark_running(id).unwrap());
        assert_eq!(store.get(id).unwrap().unwrap().state, ChainState::Running);
    }

    #[test]
    fn progress_and_failure_are_recorded() {
        let store = store();
        let id = store.enqueue(Utc::now()).unwrap();
        store.mark_running(id).unwrap();

        let payload = JobData::new().with(keys::LAT, 1.5).with(keys::LON, 2.5);
        store.record_progress(id, StageKind::Fetch, &payload).unwrap();
        let chain = store.get(id).unwrap().unwrap();
        assert_eq!(chain.stage, StageKind::Fetch);
        assert_eq!(chain.payload, payload);

        store.record_failure(id, StageKind::Fetch, "HTTP 500").unwrap();
        let chain = store.get(id).unwrap().unwrap();
        assert_eq!(chain.stage, StageKind::Reschedule);
        assert_eq!(chain.payload.get_bool(keys::SAVE_RESULT), Some(false));
        assert_eq!(chain.last_error.as_deref(), Some("fetch: HTTP 500"));
    }

    #[test]
    fn complete_and_enqueue_is_one_step() {
        let store = store();
        let id = store.enqueue(Utc::now()).unwrap();
        store.mark_running(id).unwrap();
        let run_at = Utc::now() + TimeDelta::minutes(15);

        let next = store.complete_and_enqueue(id, run_at).unwrap();

        assert_ne!(next, id);
        assert_eq!(store.get(id).unwrap().unwrap().state, ChainState::Completed);
        let chain = store.get(next).unwrap().unwrap();
        assert_eq!(chain.state, ChainState::Pending);
        assert_eq!(chain.next_run_at.timestamp_millis(), run_at.timestamp_millis());
        assert_eq!(store.pending_count().unwrap(), 1);
    }

    #[test]
    fn cancelled_chain_cannot_be_completed() {
        let store = store();
        let id = store.enqueue(Utc::now()).unwrap();
        store.mark_running(id).unwrap();
        store.mark_cancelled(id).unwrap();

        let err = store.complete_and_enqueue(id, Utc::now()).unwrap_err();

        assert!(matches!(err, WeatherError::Cancelled));
        assert_eq!(store.pending_count().unwrap(), 0);
        assert_eq!(store.get(id).unwrap().unwrap().state, ChainState::Cancelled);
    }

    #[test]
    fn cancel_pending_leaves_running_chains() {
        let store = store();
        let running = store.enqueue(Utc::now()).unwrap();
        store.mark_running(running).unwrap();
        store.enqueue(Utc::now()).unwrap();
        store.enqueue(Utc::now() + TimeDelta::hours(1)).unwrap();

        assert_eq!(store.cancel_pending().unwrap(), 2);
        assert_eq!(store.pending_count().unwrap(), 0);
        assert_eq!(store.get(running).unwrap().unwrap().state, ChainState::Running);
    }

    #[test]
    fn unreadable_chain_is_cancelled_and_skipped() {
        let store = store();
        let now = Utc::now();
        let broken = store.enqueue(now - TimeDelta::minutes(5)).unwrap();
        store.overwrite_payload(broken, r#"{"lat":{"float":null},"lon":{"float":2.0}}"#);
        let healthy = store.enqueue(now - TimeDelta::minutes(1)).unwrap();

        let chain = store.next_pending().unwrap().unwrap();
        assert_eq!(chain.id, healthy);
        assert_eq!(store.pending_count().unwrap(), 1);

        let (state, last_error): (String, Option<String>) = store
            .conn
            .lock()
            .query_row(
                "SELECT state, last_error FROM chains WHERE id = ?1",
                params![broken],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(state, ChainState::Cancelled.as_str());
        assert!(last_error.unwrap().starts_with("unreadable chain row"));

        assert!(store.mark_running(healthy).unwrap());
        assert!(store.next_pending().unwrap().is_none());
    }

    #[test]
    fn interrupted_chains_resume_from_recorded_stage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weather.db");
        let payload = JobData::new().with(keys::LAT, 48.85).with(keys::LON, 2.35);

        let id = {
            let store = SqliteScheduleStore::open(&path).unwrap();
            let id = store.enqueue(Utc::now() - TimeDelta::minutes(1)).unwrap();
            store.mark_running(id).unwrap();
            store.record_progress(id, StageKind::Fetch, &payload).unwrap();
            id
        };

        let store = SqliteScheduleStore::open(&path).unwrap();
        assert_eq!(store.recover_interrupted().unwrap(), 1);

        let chain = store.next_pending().unwrap().unwrap();
        assert_eq!(chain.id, id);
        assert_eq!(chain.stage, StageKind::Fetch);
        assert_eq!(chain.payload, payload);
    }
}
