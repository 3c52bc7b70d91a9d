//! Network connectivity gate.
//!
//! Pipeline stages wait here until the host reports itself online. Waiting is
//! driven by a `watch` channel, so a held stage wakes exactly when the flag flips.

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{WeatherError, WeatherResult};

#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: watch::Sender<bool>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    /// A gate that starts connected.
    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
        if changed {
            tracing::info!(online, "Connectivity changed");
        }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once online, or fail with `Cancelled` if `cancel` fires first.
    pub async fn wait_online(&self, cancel: &CancellationToken) -> WeatherResult<()> {
        let mut rx = self.tx.subscribe();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WeatherError::Cancelled),
            res = rx.wait_for(|online| *online) => {
                // The sender lives in `self`, so the channel cannot close here.
                res.map(|_| ()).map_err(|_| WeatherError::Cancelled)
            }
        }
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::online()
    }
}
