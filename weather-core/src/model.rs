use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

/// External city identifier; also the primary key of a stored snapshot.
pub type CityId = i64;

/// One full "current weather" observation for a city, in OpenWeather wire form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    #[serde(default)]
    pub coord: Option<Coord>,
    #[serde(default, rename = "weather")]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub main: Option<MainMetrics>,
    #[serde(default)]
    pub visibility: Option<i64>,
    #[serde(default)]
    pub wind: Option<Wind>,
    #[serde(default)]
    pub clouds: Option<Clouds>,
    /// Observation time, unix seconds.
    #[serde(default)]
    pub dt: Option<i64>,
    #[serde(default)]
    pub sys: Option<Sys>,
    pub id: CityId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cod: Option<i64>,
    /// Shift from UTC in seconds.
    #[serde(default)]
    pub timezone: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub lon: f64,
    pub lat: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub id: i64,
    pub main: String,
    pub description: String,
    pub icon: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MainMetrics {
    pub temp: f64,
    pub feels_like: f64,
    pub pressure: f64,
    pub humidity: f64,
    pub temp_min: f64,
    pub temp_max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Wind {
    pub speed: f64,
    #[serde(default)]
    pub deg: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Clouds {
    /// Cloud coverage, percent.
    pub all: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sys {
    #[serde(default, rename = "type")]
    pub kind: Option<i64>,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub sunrise: Option<i64>,
    #[serde(default)]
    pub sunset: Option<i64>,
}

impl WeatherSnapshot {
    /// A snapshot carrying only its city id.
    pub fn bare(id: CityId) -> Self {
        Self {
            coord: None,
            conditions: Vec::new(),
            base: None,
            main: None,
            visibility: None,
            wind: None,
            clouds: None,
            dt: None,
            sys: None,
            id,
            name: None,
            cod: None,
            timezone: None,
        }
    }

    /// City name when the provider sent one, otherwise the id.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("city #{}", self.id),
        }
    }

    /// Primary condition description, if any.
    pub fn headline(&self) -> Option<&str> {
        self.conditions.first().map(|c| c.description.as_str())
    }
}

/// Unit system requested from the weather API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    Standard,
    #[default]
    Metric,
    Imperial,
}

impl Units {
    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Standard => "standard",
            Units::Metric => "metric",
            Units::Imperial => "imperial",
        }
    }

    pub const fn all() -> &'static [Units] {
        &[Units::Standard, Units::Metric, Units::Imperial]
    }

    pub fn temperature_suffix(&self) -> &'static str {
        match self {
            Units::Standard => "K",
            Units::Metric => "°C",
            Units::Imperial => "°F",
        }
    }
}

impl std::fmt::Display for Units {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Units {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "standard" => Ok(Units::Standard),
            "metric" => Ok(Units::Metric),
            "imperial" => Ok(Units::Imperial),
            _ => Err(anyhow::anyhow!(
                "Unknown units '{value}'. Supported units: standard, metric, imperial."
            )),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A fully populated snapshot, two conditions.
    pub fn snapshot(id: CityId) -> WeatherSnapshot {
        WeatherSnapshot {
            coord: Some(Coord { lon: 105.84, lat: 21.02 }),
            conditions: vec![
                Condition {
                    id: 500,
                    main: "Rain".into(),
                    description: "light rain".into(),
                    icon: "10d".into(),
                },
                Condition {
                    id: 701,
                    main: "Mist".into(),
                    description: "mist".into(),
                    icon: "50d".into(),
                },
            ],
            base: Some("stations".into()),
            main: Some(MainMetrics {
                temp: 27.5,
                feels_like: 30.1,
                pressure: 1009.0,
                humidity: 83.0,
                temp_min: 26.0,
                temp_max: 28.9,
            }),
            visibility: Some(8000),
            wind: Some(Wind { speed: 3.6, deg: Some(120) }),
            clouds: Some(Clouds { all: 75 }),
            dt: Some(1_700_000_000),
            sys: Some(Sys {
                kind: Some(1),
                id: Some(9308),
                country: Some("VN".into()),
                sunrise: Some(1_699_980_000),
                sunset: Some(1_700_021_000),
            }),
            id,
            name: Some(format!("City {id}")),
            cod: Some(200),
            timezone: Some(25_200),
        }
    }
}
