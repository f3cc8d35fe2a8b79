//! Upstream forecast providers.
//!
//! Defines the `ForecastSource` trait the ingestion scheduler fetches
//! through, and the OpenWeatherMap implementation used in production.

pub mod openweather;

use async_trait::async_trait;

use crate::types::{City, ForecastError, RawForecastEntry};

/// Abstraction over external forecast providers.
///
/// Implementors perform a single request per call and never retry;
/// retry policy belongs to the caller. Every failure (transport, HTTP
/// status, payload) is reported as `ForecastError::UpstreamUnavailable`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ForecastSource: Send + Sync {
    /// Fetch the provider's forecast window for a city's coordinates.
    async fn fetch(&self, city: &City) -> Result<Vec<RawForecastEntry>, ForecastError>;
}
