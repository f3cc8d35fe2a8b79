//! Query engine — the read-side algorithms over the forecast store.
//!
//! * `summarize`: mean temperature and timestamps over a city's upcoming window.
//! * `detail`: exact lookup of one forecast by wire-format timestamp.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

use crate::storage::ForecastStore;
use crate::types::{format_timestamp, parse_timestamp, ForecastError, ForecastRecord, ForecastSummary};

/// Decimal places of the reported average temperature.
const AVG_TEMPERATURE_DP: u32 = 2;

#[derive(Debug, Clone)]
pub struct QueryEngine {
    store: ForecastStore,
}

impl QueryEngine {
    pub fn new(store: ForecastStore) -> Self {
        Self { store }
    }

    /// Sorted names of cities with stored forecasts.
    pub async fn list_cities(&self) -> Vec<String> {
        self.store.list_cities().await
    }

    /// Summarise `city`'s forecasts at or after `as_of`.
    ///
    /// An empty window has no defined mean and yields `NoForecastData`.
    pub async fn summarize(
        &self,
        city: &str,
        as_of: DateTime<Utc>,
    ) -> Result<ForecastSummary, ForecastError> {
        let window = self.store.range_query(city, as_of).await?;
        if window.records.is_empty() {
            return Err(ForecastError::NoForecastData(city.to_string()));
        }

        let avg_temperature = mean_temperature(&window.records)?;
        debug!(city, entries = window.records.len(), %avg_temperature, "Summary computed");

        Ok(ForecastSummary {
            city: window.city.name,
            country: window.city.country,
            avg_temperature,
            forecast_timestamps: window
                .records
                .iter()
                .map(|r| format_timestamp(&r.timestamp))
                .collect(),
        })
    }

    /// `summarize` relative to the current instant.
    pub async fn summarize_now(&self, city: &str) -> Result<ForecastSummary, ForecastError> {
        self.summarize(city, Utc::now()).await
    }

    /// The forecast for `city` at the wire-format `timestamp`.
    ///
    /// The timestamp is validated before the store is consulted, so a
    /// malformed value fails the same way whether or not the city exists.
    pub async fn detail(&self, city: &str, timestamp: &str) -> Result<ForecastRecord, ForecastError> {
        let instant = parse_timestamp(timestamp)?;
        self.store.point_query(city, instant).await
    }
}

/// Arithmetic mean in decimal, rounded half away from zero.
fn mean_temperature(records: &[ForecastRecord]) -> Result<Decimal, ForecastError> {
    let mut sum = Decimal::ZERO;
    for r in records {
        let t = Decimal::from_f64(r.temperature).ok_or_else(|| {
            ForecastError::InvalidRecord(format!("non-finite temperature at {}", r.dt_txt))
        })?;
        sum += t;
    }

    let mean = sum / Decimal::from(records.len());
    Ok(mean.round_dp_with_strategy(AVG_TEMPERATURE_DP, RoundingStrategy::MidpointAwayFromZero))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
