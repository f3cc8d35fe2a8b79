//! Shared types for the SKYCAST service.
//!
//! These types form the data model used across all modules: the city
//! table, stored forecast records, the raw upstream payload shape, and
//! the domain error taxonomy.

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Fixed wire format for forecast timestamps (UTC, no offset).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Render an instant in the wire format.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a wire-format timestamp. The text carries no offset and is read as UTC.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, ForecastError> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| ForecastError::InvalidTimestampFormat(text.to_string()))
}

// ---------------------------------------------------------------------------
// City
// ---------------------------------------------------------------------------

/// A tracked city. Identity is the (case-sensitive) name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    pub name: String,
    /// ISO 3166 alpha-2 country code.
    pub country: String,
    pub lat: f64,
    pub lon: f64,
}

impl City {
    pub fn new(name: &str, country: &str, lat: f64, lon: f64) -> Self {
        Self {
            name: name.to_string(),
            country: country.to_string(),
            lat,
            lon,
        }
    }
}

impl fmt::Display for City {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {} ({:.2}, {:.2})", self.name, self.country, self.lat, self.lon)
    }
}

// ---------------------------------------------------------------------------
// Upstream payload (OpenWeatherMap 5 day / 3 hour forecast)
// ---------------------------------------------------------------------------

/// Weather condition as reported upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherCondition {
    /// Provider condition code (e.g. 500 = light rain).
    #[serde(default)]
    pub id: i64,
    /// Condition group label ("Rain", "Clouds", ...).
    #[serde(default)]
    pub main: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMain {
    pub temp: f64,
    #[serde(default)]
    pub feels_like: f64,
    #[serde(default)]
    pub temp_min: f64,
    #[serde(default)]
    pub temp_max: f64,
    #[serde(default)]
    pub pressure: i64,
    #[serde(default)]
    pub sea_level: i64,
    #[serde(default)]
    pub grnd_level: i64,
    #[serde(default)]
    pub humidity: i64,
    #[serde(default)]
    pub temp_kf: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawClouds {
    #[serde(default)]
    pub all: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawWind {
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub deg: i64,
    #[serde(default)]
    pub gust: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSys {
    /// Part of day: "d" or "n".
    #[serde(default)]
    pub pod: String,
}

/// One forecast entry exactly as the upstream serves it.
///
/// Also the response shape of the detailed lookup endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawForecastEntry {
    /// Forecast instant, Unix epoch seconds.
    pub dt: i64,
    pub main: RawMain,
    #[serde(default)]
    pub weather: Vec<WeatherCondition>,
    #[serde(default)]
    pub clouds: RawClouds,
    #[serde(default)]
    pub wind: RawWind,
    #[serde(default)]
    pub visibility: i64,
    /// Probability of precipitation (0.0–1.0).
    #[serde(default)]
    pub pop: f64,
    #[serde(default)]
    pub sys: RawSys,
    #[serde(default)]
    pub dt_txt: String,
}

impl RawForecastEntry {
    /// Convert to the stored record shape.
    ///
    /// Returns `None` when the epoch is outside the representable range.
    /// Numeric fields pass through unchanged (upstream already reports metric units).
    pub fn normalize(&self) -> Option<ForecastRecord> {
        let timestamp = DateTime::<Utc>::from_timestamp(self.dt, 0)?;
        let dt_txt = if self.dt_txt.is_empty() {
            format_timestamp(&timestamp)
        } else {
            self.dt_txt.clone()
        };

        Some(ForecastRecord {
            timestamp,
            dt_txt,
            temperature: self.main.temp,
            feels_like: self.main.feels_like,
            temp_min: self.main.temp_min,
            temp_max: self.main.temp_max,
            temp_kf: self.main.temp_kf,
            pressure: self.main.pressure,
            sea_level: self.main.sea_level,
            grnd_level: self.main.grnd_level,
            humidity: self.main.humidity,
            wind_speed: self.wind.speed,
            wind_deg: self.wind.deg,
            wind_gust: self.wind.gust,
            clouds: self.clouds.all,
            visibility: self.visibility,
            pop: self.pop,
            condition: self.weather.first().cloned().unwrap_or_default(),
            part_of_day: self.sys.pod.clone(),
        })
    }
}

impl From<&ForecastRecord> for RawForecastEntry {
    fn from(r: &ForecastRecord) -> Self {
        Self {
            dt: r.timestamp.timestamp(),
            main: RawMain {
                temp: r.temperature,
                feels_like: r.feels_like,
                temp_min: r.temp_min,
                temp_max: r.temp_max,
                pressure: r.pressure,
                sea_level: r.sea_level,
                grnd_level: r.grnd_level,
                humidity: r.humidity,
                temp_kf: r.temp_kf,
            },
            weather: vec![r.condition.clone()],
            clouds: RawClouds { all: r.clouds },
            wind: RawWind {
                speed: r.wind_speed,
                deg: r.wind_deg,
                gust: r.wind_gust,
            },
            visibility: r.visibility,
            pop: r.pop,
            sys: RawSys {
                pod: r.part_of_day.clone(),
            },
            dt_txt: r.dt_txt.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Stored forecast
// ---------------------------------------------------------------------------

/// A persisted forecast for one city at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub timestamp: DateTime<Utc>,
    /// Upstream textual timestamp, kept for display.
    pub dt_txt: String,
    /// Air temperature, °C.
    pub temperature: f64,
    pub feels_like: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub temp_kf: f64,
    /// hPa
    pub pressure: i64,
    pub sea_level: i64,
    pub grnd_level: i64,
    /// Relative humidity, %.
    pub humidity: i64,
    /// m/s
    pub wind_speed: f64,
    /// Degrees (meteorological).
    pub wind_deg: i64,
    pub wind_gust: f64,
    /// Cloud cover, %.
    pub clouds: i64,
    /// Metres.
    pub visibility: i64,
    pub pop: f64,
    pub condition: WeatherCondition,
    pub part_of_day: String,
}

impl ForecastRecord {
    /// A record carrying only a timestamp and temperature; every other field is zero/empty.
    pub fn new(timestamp: DateTime<Utc>, temperature: f64) -> Self {
        Self {
            timestamp,
            dt_txt: format_timestamp(&timestamp),
            temperature,
            feels_like: 0.0,
            temp_min: 0.0,
            temp_max: 0.0,
            temp_kf: 0.0,
            pressure: 0,
            sea_level: 0,
            grnd_level: 0,
            humidity: 0,
            wind_speed: 0.0,
            wind_deg: 0,
            wind_gust: 0.0,
            clouds: 0,
            visibility: 0,
            pop: 0.0,
            condition: WeatherCondition::default(),
            part_of_day: String::new(),
        }
    }
}

impl fmt::Display for ForecastRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {:.1}°C, {}% humidity, {:.1} m/s wind ({})",
            format_timestamp(&self.timestamp),
            self.temperature,
            self.humidity,
            self.wind_speed,
            self.condition.description,
        )
    }
}

/// A city's records at or after a reference instant, ascending by timestamp.
#[derive(Debug, Clone)]
pub struct ForecastWindow {
    pub city: City,
    pub records: Vec<ForecastRecord>,
}

/// Aggregated multi-day view of one city.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastSummary {
    pub city: String,
    pub country: String,
    /// Mean temperature over the window, 2 decimal places.
    pub avg_temperature: Decimal,
    /// Window timestamps in wire format, ascending.
    pub forecast_timestamps: Vec<String>,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Last-known-good upstream payload for one city.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub city: String,
    pub fetched_at: DateTime<Utc>,
    pub entries: Vec<RawForecastEntry>,
}

impl Snapshot {
    pub fn new(city: &str, entries: Vec<RawForecastEntry>) -> Self {
        Self {
            city: city.to_string(),
            fetched_at: Utc::now(),
            entries,
        }
    }

    /// Normalise every entry, dropping (and logging) the ones that cannot be represented.
    pub fn records(&self) -> Vec<ForecastRecord> {
        self.entries
            .iter()
            .filter_map(|entry| {
                let record = entry.normalize();
                if record.is_none() {
                    warn!(city = %self.city, dt = entry.dt, "Dropping entry with out-of-range epoch");
                }
                record
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for SKYCAST.
#[derive(Debug, thiserror::Error)]
pub enum ForecastError {
    #[error("City '{0}' not found")]
    CityNotFound(String),

    #[error("No weather data found for date '{timestamp}' in city '{city}'")]
    DateNotFound { city: String, timestamp: String },

    #[error("City '{0}' is not registered in the city table")]
    UnknownCity(String),

    #[error("Upstream unavailable ({city}): {message}")]
    UpstreamUnavailable { city: String, message: String },

    #[error("Incorrect date format '{0}'. Expected format: YYYY-MM-DD HH:MM:SS")]
    InvalidTimestampFormat(String),

    #[error("No upcoming forecasts for city '{0}'")]
    NoForecastData(String),

    #[error("Snapshot cache error ({city}): {message}")]
    Snapshot { city: String, message: String },

    #[error("Invalid stored record: {0}")]
    InvalidRecord(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ForecastError {
    pub fn upstream(city: &str, message: impl fmt::Display) -> Self {
        Self::UpstreamUnavailable {
            city: city.to_string(),
            message: message.to_string(),
        }
    }

    pub fn snapshot(city: &str, message: impl fmt::Display) -> Self {
        Self::Snapshot {
            city: city.to_string(),
            message: message.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
