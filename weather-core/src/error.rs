//! Error taxonomy shared by the store, the remote client and the pipeline.

use std::time::Duration;

use thiserror::Error;

/// Failures of the location boundary.
#[derive(Debug, Error)]
pub enum LocationError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Location unavailable: {0}")]
    Unavailable(String),

    #[error("Location request timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Location unavailable: {0}")]
    LocationUnavailable(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Weather API returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Malformed data: {0}")]
    MalformedData(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl WeatherError {
    pub fn storage<S: Into<String>>(message: S) -> Self {
        Self::Storage(message.into())
    }

    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::MalformedData(message.into())
    }

    /// User-friendly message for transient notifications.
    pub fn user_message(&self) -> String {
        match self {
            Self::PermissionDenied => "Location access is not granted".to_string(),
            Self::LocationUnavailable(_) => "Current location is not available".to_string(),
            Self::Network(_) => "Network error. Check your connection.".to_string(),
            Self::Api { status, .. } => format!("Weather service error (HTTP {status})"),
            Self::NotFound(what) => format!("No weather data found for {what}"),
            Self::Storage(_) => "Local weather storage error".to_string(),
            Self::MalformedData(_) => "Received unreadable weather data".to_string(),
            Self::Timeout(_) => "The request took too long".to_string(),
            Self::Cancelled => "Refresh cancelled".to_string(),
        }
    }

    /// Whether trying again later can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::LocationUnavailable(_) => true,
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<LocationError> for WeatherError {
    fn from(err: LocationError) -> Self {
        match err {
            LocationError::PermissionDenied => Self::PermissionDenied,
            LocationError::Unavailable(reason) => Self::LocationUnavailable(reason),
            LocationError::Timeout(after) => {
                Self::LocationUnavailable(format!("no fix within {after:?}"))
            }
        }
    }
}

impl From<rusqlite::Error> for WeatherError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for WeatherError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedData(err.to_string())
    }
}

pub type WeatherResult<T> = Result<T, WeatherError>;
