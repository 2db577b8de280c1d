//! Forecast payload from the OpenWeather 5-day / 3-hour endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub city: City,
    #[serde(default)]
    pub list: Vec<ForecastEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    pub name: String,
    #[serde(default)]
    pub country: String,
    /// Unix seconds
    #[serde(default)]
    pub sunrise: i64,
    /// Unix seconds
    #[serde(default)]
    pub sunset: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastEntry {
    /// Unix seconds
    pub dt: i64,
    pub main: Readings,
    #[serde(default)]
    pub weather: Vec<Condition>,
    #[serde(default)]
    pub wind: Wind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Readings {
    pub temp: f64,
    pub feels_like: f64,
    pub humidity: f64,
    pub pressure: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub main: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Wind {
    pub speed: f64,
}

impl Forecast {
    /// Entry closest to now (the first one, as the API lists them in order)
    pub fn current(&self) -> Option<&ForecastEntry> {
        self.list.first()
    }

    pub fn sunrise(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.city.sunrise, 0)
    }

    pub fn sunset(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.city.sunset, 0)
    }
}

impl ForecastEntry {
    pub fn time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.dt, 0)
    }

    /// Primary condition, e.g. "Rain"
    pub fn condition(&self) -> Option<&Condition> {
        self.weather.first()
    }
}
