//! Dispatch loop for refresh chains.

use chrono::Utc;
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{Notify, Semaphore},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;

use super::{
    runner::{ChainReport, ChainRunner},
    schedule::{ChainId, ChainState, ScheduleStore},
};
use crate::{
    error::{WeatherError, WeatherResult},
    store::run_blocking,
};

/// Chains may be enqueued by another process; look at the table at least this often.
const IDLE_RECHECK: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    schedule: Arc<dyn ScheduleStore>,
    runner: ChainRunner,
    permits: Arc<Semaphore>,
    wake: Notify,
    /// Parent of every running chain's token; replaced after each `cancel`.
    running: Mutex<CancellationToken>,
}

impl Scheduler {
    pub fn new(schedule: Arc<dyn ScheduleStore>, runner: ChainRunner, max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                schedule,
                runner,
                permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
                wake: Notify::new(),
                running: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Recover chains interrupted by a crash and make sure one chain is pending.
    ///
    /// Returns the id of a newly enqueued chain, if one was needed.
    pub async fn arm(&self) -> WeatherResult<Option<ChainId>> {
        let schedule = Arc::clone(&self.inner.schedule);
        let enqueued = run_blocking(move || {
            schedule.recover_interrupted()?;
            if schedule.pending_count()? > 0 {
                return Ok(None);
            }
            schedule.enqueue(Utc::now()).map(Some)
        })
        .await?;

        if let Some(id) = enqueued {
            tracing::info!(chain_id = id, "Armed refresh chain");
        }
        self.inner.wake.notify_one();
        Ok(enqueued)
    }

    /// Enqueue an extra chain due immediately.
    pub async fn run_now(&self) -> WeatherResult<ChainId> {
        let schedule = Arc::clone(&self.inner.schedule);
        let id = run_blocking(move || schedule.enqueue(Utc::now())).await?;
        tracing::info!(chain_id = id, "Queued immediate refresh chain");
        self.inner.wake.notify_one();
        Ok(id)
    }

    /// Cancel pending chains and any chain currently running.
    ///
    /// Returns the number of pending chains cancelled.
    pub async fn cancel(&self) -> WeatherResult<usize> {
        // Pending rows first. A chain claimed before this point already holds
        // a child of the token cancelled below.
        let schedule = Arc::clone(&self.inner.schedule);
        let cancelled = run_blocking(move || schedule.cancel_pending()).await?;

        let running = std::mem::take(&mut *self.inner.running.lock());
        running.cancel();
        tracing::info!(cancelled, "Cancelled refresh chains");
        self.inner.wake.notify_one();
        Ok(cancelled)
    }

    /// Dispatch due chains until `shutdown` fires, then cancel and drain
    /// the chains still running.
    pub async fn run(&self, shutdown: CancellationToken) -> WeatherResult<()> {
        self.arm().await?;
        let mut tasks: JoinSet<ChainReport> = JoinSet::new();

        loop {
            let wait = match self.dispatch_due(&mut tasks, &shutdown).await {
                Ok(wait) => wait,
                Err(WeatherError::Cancelled) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read schedule table");
                    IDLE_RECHECK
                }
            };

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_finished(joined),
                _ = self.inner.wake.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }

        tracing::info!(in_flight = tasks.len(), "Scheduler shutting down");
        self.inner.running.lock().cancel();
        while let Some(joined) = tasks.join_next().await {
            log_finished(joined);
        }
        Ok(())
    }

    /// Start every chain that is due. Returns how long to sleep before the
    /// next one is.
    async fn dispatch_due(
        &self,
        tasks: &mut JoinSet<ChainReport>,
        shutdown: &CancellationToken,
    ) -> WeatherResult<Duration> {
        loop {
            let schedule = Arc::clone(&self.inner.schedule);
            let Some(mut chain) = run_blocking(move || schedule.next_pending()).await? else {
                return Ok(IDLE_RECHECK);
            };

            let until_due = (chain.next_run_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            if !until_due.is_zero() {
                return Ok(until_due.min(IDLE_RECHECK));
            }

            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Err(WeatherError::Cancelled),
                permit = Arc::clone(&self.inner.permits).acquire_owned() => {
                    permit.map_err(|_| WeatherError::Cancelled)?
                }
            };

            // Taken before the claim so a concurrent `cancel` reaches this chain.
            let token = self.inner.running.lock().child_token();
            let schedule = Arc::clone(&self.inner.schedule);
            let id = chain.id;
            if !run_blocking(move || schedule.mark_running(id)).await? {
                // Claimed or cancelled since we looked.
                continue;
            }
            chain.state = ChainState::Running;

            let runner = self.inner.runner.clone();
            tracing::info!(chain_id = id, stage = %chain.stage, "Dispatching chain");
            tasks.spawn(async move {
                let report = runner.run(chain, &token).await;
                drop(permit);
                report
            });
        }
    }
}

fn log_finished(joined: Result<ChainReport, tokio::task::JoinError>) {
    match joined {
        Ok(report) => match &report.failed {
            Some((stage, error)) => tracing::warn!(
                chain_id = report.chain_id,
                %stage,
                error = %error,
                "Chain finished with a failed stage"
            ),
            None => tracing::info!(
                chain_id = report.chain_id,
                saved = report.save_succeeded,
                cancelled = report.cancelled,
                "Chain finished"
            ),
        },
        Err(e) => tracing::error!(error = %e, "Chain task panicked"),
    }
}
