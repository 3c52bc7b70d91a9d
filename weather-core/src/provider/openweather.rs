use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use std::{sync::Arc, time::Duration};

use crate::{
    config::DEFAULT_BASE_URL,
    error::{WeatherError, WeatherResult},
    model::{CityId, Units, WeatherSnapshot},
};

use super::{WeatherProvider, validate_coordinates};

/// Request settings read on every call; swapping them affects later requests.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub api_key: String,
    pub lang: String,
    pub units: Units,
}

#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    base_url: String,
    settings: Arc<RwLock<ClientSettings>>,
    http: Client,
}

impl OpenWeatherProvider {
    pub fn new(settings: ClientSettings) -> WeatherResult<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, settings, Duration::from_secs(15))
    }

    pub fn with_base_url(
        base_url: &str,
        settings: ClientSettings,
        timeout: Duration,
    ) -> WeatherResult<Self> {
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            settings: Arc::new(RwLock::new(settings)),
            http,
        })
    }

    /// Current settings.
    pub fn settings(&self) -> ClientSettings {
        self.settings.read().clone()
    }

    pub fn set_lang(&self, lang: impl Into<String>) {
        self.settings.write().lang = lang.into();
    }

    pub fn set_units(&self, units: Units) {
        self.settings.write().units = units;
    }

    pub fn set_api_key(&self, api_key: impl Into<String>) {
        self.settings.write().api_key = api_key.into();
    }

    async fn fetch_current(
        &self,
        selector: &[(&str, String)],
        target: &str,
    ) -> WeatherResult<WeatherSnapshot> {
        let url = format!("{}/weather", self.base_url);
        let settings = self.settings();

        let res = self
            .http
            .get(&url)
            .query(selector)
            .query(&[
                ("lang", settings.lang.as_str()),
                ("units", settings.units.as_str()),
                ("appid", settings.api_key.as_str()),
            ])
            .send()
            .await?;

        let status = res.status();
        let body = res.text().await?;

        if status == StatusCode::NOT_FOUND {
            return Err(WeatherError::NotFound(target.to_string()));
        }

        if !status.is_success() {
            return Err(WeatherError::Api {
                status: status.as_u16(),
                message: truncate_body(&body),
            });
        }

        if body.trim().is_empty() {
            return Err(WeatherError::NotFound(target.to_string()));
        }

        let snapshot: WeatherSnapshot = serde_json::from_str(&body).map_err(|e| {
            WeatherError::malformed(format!("OpenWeather response for {target}: {e}"))
        })?;

        tracing::debug!(city_id = snapshot.id, target, "Fetched current weather");
        Ok(snapshot)
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    async fn fetch_by_coordinates(&self, lat: f64, lon: f64) -> WeatherResult<WeatherSnapshot> {
        validate_coordinates(lat, lon)?;
        self.fetch_current(
            &[("lat", lat.to_string()), ("lon", lon.to_string())],
            &format!("coordinates ({lat}, {lon})"),
        )
        .await
    }

    async fn fetch_by_city_id(&self, id: CityId) -> WeatherResult<WeatherSnapshot> {
        self.fetch_current(&[("id", id.to_string())], &format!("city id {id}")).await
    }

    async fn fetch_by_city_name(&self, name: &str) -> WeatherResult<WeatherSnapshot> {
        let name = name.trim();
        if name.is_empty() {
            return Err(WeatherError::malformed("city name is empty"));
        }
        self.fetch_current(&[("q", name.to_string())], &format!("city '{name}'")).await
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}
