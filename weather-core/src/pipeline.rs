//! Background refresh pipeline.
//!
//! A chain runs four stages in order: locate, fetch, persist, reschedule.
//! Chains live in a durable schedule table so they survive restarts; the
//! reschedule stage picks the next run time from whether the save succeeded.

pub mod backoff;
pub mod payload;
pub mod runner;
pub mod schedule;
pub mod scheduler;
pub mod stage;

pub use backoff::Backoff;
pub use payload::{JobData, JobValue, keys};
pub use runner::{ChainReport, ChainRunner, RunnerOptions};
pub use schedule::{ChainId, ChainRecord, ChainState, ScheduleStore, SqliteScheduleStore};
pub use scheduler::Scheduler;
pub use stage::{FetchStage, LocateStage, PersistStage, Stage, StageKind, Stages};
