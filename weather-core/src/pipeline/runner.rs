//! Executes one chain from its recorded stage through to rescheduling.

use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

use super::{
    backoff::Backoff,
    payload::{JobData, keys},
    schedule::{ChainId, ChainRecord, ScheduleStore},
    stage::{Stage, StageKind, Stages},
};
use crate::{
    config::ScheduleConfig,
    connectivity::Connectivity,
    error::{WeatherError, WeatherResult},
    store::run_blocking,
};

#[derive(Debug, Clone, Copy)]
pub struct RunnerOptions {
    pub backoff: Backoff,
    /// Upper bound on a single stage, connectivity wait excluded.
    pub stage_timeout: Duration,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self { backoff: Backoff::default(), stage_timeout: Duration::from_secs(120) }
    }
}

impl RunnerOptions {
    pub fn from_config(config: &ScheduleConfig) -> Self {
        Self {
            backoff: Backoff::from_config(config),
            stage_timeout: Duration::from_secs(config.stage_timeout_secs),
        }
    }
}

/// What happened to one chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainReport {
    pub chain_id: ChainId,
    /// Stages that finished successfully, in order.
    pub completed: Vec<StageKind>,
    /// The stage that failed and why.
    pub failed: Option<(StageKind, String)>,
    pub save_succeeded: bool,
    /// Successor chain and when it is due.
    pub next_chain: Option<(ChainId, DateTime<Utc>)>,
    pub cancelled: bool,
}

impl ChainReport {
    fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            completed: Vec::new(),
            failed: None,
            save_succeeded: false,
            next_chain: None,
            cancelled: false,
        }
    }
}

#[derive(Clone)]
pub struct ChainRunner {
    schedule: Arc<dyn ScheduleStore>,
    stages: Stages,
    connectivity: Connectivity,
    options: RunnerOptions,
}

impl ChainRunner {
    pub fn new(
        schedule: Arc<dyn ScheduleStore>,
        stages: Stages,
        connectivity: Connectivity,
        options: RunnerOptions,
    ) -> Self {
        Self { schedule, stages, connectivity, options }
    }

    /// Run `chain` to completion.
    ///
    /// A failing working stage skips straight to rescheduling with an
    /// unsuccessful save. Rescheduling always runs unless `cancel` fires, in
    /// which case the chain is marked cancelled and nothing is enqueued.
    pub async fn run(&self, chain: ChainRecord, cancel: &CancellationToken) -> ChainReport {
        let chain_id = chain.id;
        let mut report = ChainReport::new(chain_id);
        let mut stage = chain.stage;
        let mut data = chain.payload;

        while let Some(handler) = self.stages.get(stage) {
            tracing::info!(chain_id, %stage, "Stage started");

            match self.run_stage(handler.as_ref(), &data, cancel).await {
                Ok(output) => {
                    tracing::info!(chain_id, %stage, "Stage finished");
                    report.completed.push(stage);
                    let next = stage.next().unwrap_or(StageKind::Reschedule);

                    let saved = self.record_progress(chain_id, next, &output).await;
                    if let Err(e) = saved {
                        tracing::warn!(chain_id, %stage, error = %e, "Could not record chain progress");
                    }
                    stage = next;
                    data = output;
                }
                Err(WeatherError::Cancelled) => return self.abandon(report).await,
                Err(e) => {
                    tracing::warn!(chain_id, %stage, error = %e, "Stage failed; skipping to reschedule");
                    report.failed = Some((stage, e.to_string()));

                    let message = e.to_string();
                    let failed_stage = stage;
                    let schedule = Arc::clone(&self.schedule);
                    let recorded = run_blocking(move || {
                        schedule.record_failure(chain_id, failed_stage, &message)
                    })
                    .await;
                    if let Err(e) = recorded {
                        tracing::warn!(chain_id, error = %e, "Could not record stage failure");
                    }

                    stage = StageKind::Reschedule;
                    data = JobData::new().with(keys::SAVE_RESULT, false);
                }
            }
        }

        if let Err(e) = self.connectivity.wait_online(cancel).await {
            tracing::debug!(chain_id, error = %e, "Reschedule interrupted");
            return self.abandon(report).await;
        }

        self.reschedule(report, data.get_bool(keys::SAVE_RESULT).unwrap_or(false)).await
    }

    async fn run_stage(
        &self,
        stage: &dyn Stage,
        input: &JobData,
        cancel: &CancellationToken,
    ) -> WeatherResult<JobData> {
        self.connectivity.wait_online(cancel).await?;

        let timeout = self.options.stage_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WeatherError::Cancelled),
            res = tokio::time::timeout(timeout, stage.run(input)) => match res {
                Ok(result) => result,
                Err(_) => Err(WeatherError::Timeout(format!(
                    "{} stage exceeded {timeout:?}",
                    stage.kind()
                ))),
            },
        }
    }

    async fn reschedule(&self, mut report: ChainReport, saved: bool) -> ChainReport {
        let chain_id = report.chain_id;
        let run_at = self.options.backoff.next_run_at(Utc::now(), saved);
        report.save_succeeded = saved;

        let schedule = Arc::clone(&self.schedule);
        match run_blocking(move || schedule.complete_and_enqueue(chain_id, run_at)).await {
            Ok(next) => {
                report.completed.push(StageKind::Reschedule);
                report.next_chain = Some((next, run_at));
                tracing::info!(
                    chain_id,
                    next_chain_id = next,
                    saved,
                    delay = ?self.options.backoff.next_delay(saved),
                    "Chain rescheduled"
                );
            }
            Err(WeatherError::Cancelled) => {
                report.cancelled = true;
                tracing::info!(chain_id, "Chain was cancelled before rescheduling");
            }
            Err(e) => {
                tracing::error!(chain_id, error = %e, "Failed to reschedule chain");
                report.failed = Some((StageKind::Reschedule, e.to_string()));
            }
        }
        report
    }

    async fn abandon(&self, mut report: ChainReport) -> ChainReport {
        let chain_id = report.chain_id;
        report.cancelled = true;

        let schedule = Arc::clone(&self.schedule);
        if let Err(e) = run_blocking(move || schedule.mark_cancelled(chain_id)).await {
            tracing::warn!(chain_id, error = %e, "Could not mark chain cancelled");
        }
        tracing::info!(chain_id, "Chain cancelled");
        report
    }

    async fn record_progress(
        &self,
        chain_id: ChainId,
        stage: StageKind,
        payload: &JobData,
    ) -> WeatherResult<()> {
        let schedule = Arc::clone(&self.schedule);
        let payload = payload.clone();
        run_blocking(move || schedule.record_progress(chain_id, stage, &payload)).await
    }
}
