use crate::{
    Config,
    error::{WeatherError, WeatherResult},
    model::{CityId, WeatherSnapshot},
    provider::openweather::{ClientSettings, OpenWeatherProvider},
};
use async_trait::async_trait;
use std::{fmt::Debug, time::Duration};

pub mod openweather;

/// Remote source of current-weather snapshots. Implementations never retry;
/// retry policy belongs to the caller.
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    async fn fetch_by_coordinates(&self, lat: f64, lon: f64) -> WeatherResult<WeatherSnapshot>;

    async fn fetch_by_city_id(&self, id: CityId) -> WeatherResult<WeatherSnapshot>;

    async fn fetch_by_city_name(&self, name: &str) -> WeatherResult<WeatherSnapshot>;
}

/// Reject coordinates that cannot describe a real fix.
///
/// `(0, 0)` is what an empty location payload decodes to, so it is refused too.
pub fn validate_coordinates(lat: f64, lon: f64) -> WeatherResult<()> {
    if !lat.is_finite() || !lon.is_finite() {
        return Err(WeatherError::malformed(format!("non-finite coordinates ({lat}, {lon})")));
    }
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(WeatherError::malformed(format!("coordinates out of range ({lat}, {lon})")));
    }
    if lat == 0.0 && lon == 0.0 {
        return Err(WeatherError::malformed("coordinates are unset (0, 0)"));
    }
    Ok(())
}

/// Construct the OpenWeather provider from config.
pub fn provider_from_config(config: &Config) -> anyhow::Result<OpenWeatherProvider> {
    let api_key = config.api_key().ok_or_else(|| {
        anyhow::anyhow!(
            "No API key configured for OpenWeather.\n\
                 Hint: run `weather configure` and enter your API key."
        )
    })?;

    let settings = ClientSettings {
        api_key: api_key.to_owned(),
        lang: config.api.lang.clone(),
        units: config.api.units,
    };

    OpenWeatherProvider::with_base_url(
        &config.api.base_url,
        settings,
        Duration::from_secs(config.api.request_timeout_secs),
    )
    .map_err(|e| anyhow::anyhow!("Failed to build OpenWeather client: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn provider_from_config_errors_when_missing_api_key() {
        let cfg = Config::default();
        let err = provider_from_config(&cfg).unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("No API key configured"));
        assert!(msg.contains("Hint: run `weather configure"));
    }

    #[test]
    fn provider_from_config_applies_settings() {
        let mut cfg = Config::default();
        cfg.set_api_key("KEY".to_string());
        cfg.api.lang = "vi".to_string();

        let provider = provider_from_config(&cfg).expect("provider must build");
        let settings = provider.settings();
        assert_eq!(settings.api_key, "KEY");
        assert_eq!(settings.lang, "vi");
        assert_eq!(settings.units, cfg.api.units);
    }

    #[test]
    fn coordinates_are_validated() {
        assert!(validate_coordinates(21.02, 105.84).is_ok());
        assert!(validate_coordinates(0.0, 0.0).is_err());
        assert!(validate_coordinates(f64::NAN, 1.0).is_err());
        assert!(validate_coordinates(91.0, 1.0).is_err());
        assert!(validate_coordinates(1.0, -181.0).is_err());
    }
}
