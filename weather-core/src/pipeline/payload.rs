//! Key-value payload handed from one stage to the next.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{WeatherError, WeatherResult};

/// Well-known payload keys.
pub mod keys {
    pub const LAT: &str = "lat";
    pub const LON: &str = "lon";
    /// Fix time, unix milliseconds.
    pub const LOCATION_TIME: &str = "location_time";
    /// Snapshot JSON as received from the provider.
    pub const WEATHER_RESPONSE: &str = "weather_response";
    pub const SAVE_RESULT: &str = "save_result";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Text(String),
}

impl From<f64> for JobValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for JobValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for JobValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<String> for JobValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for JobValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Immutable-by-convention payload: stages build a fresh one for their output.
///
/// Encodes to a JSON string so it can sit in the schedule table between
/// process runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobData {
    values: BTreeMap<String, JobValue>,
}

impl JobData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<JobValue>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&JobValue> {
        self.values.get(key)
    }

    /// Integers widen to floats.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.values.get(key)? {
            JobValue::Float(v) => Some(*v),
            JobValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.values.get(key)? {
            JobValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.values.get(key)? {
            JobValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.values.get(key)? {
            JobValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn require_f64(&self, key: &str) -> WeatherResult<f64> {
        self.get_f64(key).ok_or_else(|| missing(key))
    }

    pub fn require_str(&self, key: &str) -> WeatherResult<&str> {
        self.get_str(key).ok_or_else(|| missing(key))
    }

    /// Fails on a non-finite float, which JSON would store as `null`.
    pub fn encode(&self) -> WeatherResult<String> {
        let non_finite = self
            .values
            .iter()
            .find(|(_, value)| matches!(value, JobValue::Float(v) if !v.is_finite()));
        if let Some((key, value)) = non_finite {
            return Err(WeatherError::malformed(format!("'{key}' is not finite: {value:?}")));
        }
        Ok(serde_json::to_string(self)?)
    }

    /// A blank string decodes to an empty payload.
    pub fn decode(encoded: &str) -> WeatherResult<Self> {
        if encoded.trim().is_empty() {
            return Ok(Self::new());
        }
        Ok(serde_json::from_str(encoded)?)
    }
}

fn missing(key: &str) -> WeatherError {
    WeatherError::malformed(format!("job payload is missing `{key}`"))
}
