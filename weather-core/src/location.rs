//! Location provider boundary.
//!
//! Device sensors live outside this crate; the pipeline only sees the
//! [`LocationProvider`] contract. Every request goes through
//! [`request_location`] so the wait is always bounded.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{fmt::Debug, time::Duration};

use crate::error::LocationError;

/// A location fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub time: DateTime<Utc>,
}

#[async_trait]
pub trait LocationProvider: Send + Sync + Debug {
    /// Best-known device location.
    async fn best_known_location(&self) -> Result<LocationFix, LocationError>;
}

/// Ask `provider` for a fix, giving up after `timeout`.
pub async fn request_location(
    provider: &dyn LocationProvider,
    timeout: Duration,
) -> Result<LocationFix, LocationError> {
    match tokio::time::timeout(timeout, provider.best_known_location()).await {
        Ok(result) => result,
        Err(_) => Err(LocationError::Timeout(timeout)),
    }
}

/// Coordinates pinned in configuration, for hosts without a location sensor.
#[derive(Debug, Clone, Copy)]
pub struct FixedLocationProvider {
    latitude: f64,
    longitude: f64,
}

impl FixedLocationProvider {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

#[async_trait]
impl LocationProvider for FixedLocationProvider {
    async fn best_known_location(&self) -> Result<LocationFix, LocationError> {
        Ok(LocationFix { latitude: self.latitude, longitude: self.longitude, time: Utc::now() })
    }
}

/// Used when no location source is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableLocationProvider;

#[async_trait]
impl LocationProvider for UnavailableLocationProvider {
    async fn best_known_location(&self) -> Result<LocationFix, LocationError> {
        Err(LocationError::Unavailable(
            "no location source configured; set [location] latitude/longitude".to_string(),
        ))
    }
}
