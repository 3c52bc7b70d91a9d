//! Core library for the `weather` CLI.
//!
//! This crate defines:
//! - Configuration loading and validation
//! - The weather snapshot model and its SQLite store
//! - The OpenWeather client behind the [`WeatherProvider`] trait
//! - The repository that reconciles the store with remote fetches
//! - The scheduled locate/fetch/persist/reschedule refresh pipeline
//!
//! It is used by `weather-cli`, but can also be reused by other binaries or services.

pub mod config;
pub mod connectivity;
pub mod error;
pub mod location;
pub mod model;
pub mod pipeline;
pub mod provider;
pub mod repository;
pub mod store;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use connectivity::Connectivity;
pub use error::{LocationError, WeatherError, WeatherResult};
pub use location::{FixedLocationProvider, LocationFix, LocationProvider, UnavailableLocationProvider};
pub use model::{CityId, Units, WeatherSnapshot};
pub use provider::{WeatherProvider, openweather::OpenWeatherProvider, provider_from_config};
pub use repository::{DataResult, RefreshTarget, SnapshotEvent, Subscription, WeatherRepository};
pub use store::{SqliteWeatherStore, WeatherStore};
