use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

use crate::config::ScheduleConfig;

/// Delay before the next chain, chosen by whether the last save succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub success_delay: Duration,
    pub failure_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            success_delay: Duration::from_secs(15 * 60),
            failure_delay: Duration::from_secs(45 * 60),
        }
    }
}

impl Backoff {
    pub fn new(success_delay: Duration, failure_delay: Duration) -> Self {
        Self { success_delay, failure_delay }
    }

    pub fn from_config(config: &ScheduleConfig) -> Self {
        Self::new(
            Duration::from_secs(config.success_delay_minutes.saturating_mul(60)),
            Duration::from_secs(config.failure_delay_minutes.saturating_mul(60)),
        )
    }

    pub fn next_delay(&self, saved: bool) -> Duration {
        if saved { self.success_delay } else { self.failure_delay }
    }

    /// Wall-clock time of the next chain when scheduling at `now`.
    pub fn next_run_at(&self, now: DateTime<Utc>, saved: bool) -> DateTime<Utc> {
        let delay = TimeDelta::from_std(self.next_delay(saved)).unwrap_or(TimeDelta::days(365));
        now.checked_add_signed(delay).unwrap_or(now)
    }
}
