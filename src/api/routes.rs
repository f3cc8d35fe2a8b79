//! Query API route handlers.
//!
//! All endpoints return JSON. Handlers delegate to the `QueryEngine` and
//! translate its error kinds into status codes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use crate::engine::query::QueryEngine;
use crate::types::{ForecastError, RawForecastEntry};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct ApiState {
    pub queries: QueryEngine,
}

impl ApiState {
    pub fn new(queries: QueryEngine) -> Self {
        Self { queries }
    }
}

pub type AppState = Arc<ApiState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitiesResponse {
    pub list_cities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CityForecastResponse {
    pub city: String,
    pub country: String,
    pub avg_temperature: Decimal,
    pub forecasts_dates: Vec<String>,
}

/// The detailed lookup returns the record in the upstream's own shape.
pub type DetailedForecastResponse = RawForecastEntry;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A `ForecastError` on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub ForecastError);

impl From<ForecastError> for ApiError {
    fn from(e: ForecastError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ForecastError::InvalidTimestampFormat(_) => StatusCode::BAD_REQUEST,
            ForecastError::CityNotFound(_)
            | ForecastError::DateNotFound { .. }
            | ForecastError::NoForecastData(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "Query failed");
            "Internal server error".to_string()
        } else {
            self.0.to_string()
        };
        (status, Json(ErrorResponse { detail })).into_response()
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /cities
pub async fn get_cities(State(state): State<AppState>) -> Json<CitiesResponse> {
    Json(CitiesResponse {
        list_cities: state.queries.list_cities().await,
    })
}

/// GET /forecast/:city
pub async fn get_city_forecast(
    State(state): State<AppState>,
    Path(city): Path<String>,
) -> Result<Json<CityForecastResponse>, ApiError> {
    let summary = state.queries.summarize_now(&city).await?;
    Ok(Json(CityForecastResponse {
        city: summary.city,
        country: summary.country,
        avg_temperature: summary.avg_temperature,
        forecasts_dates: summary.forecast_timestamps,
    }))
}

/// GET /forecast/:city/:timestamp
pub async fn get_forecast_detail(
    State(state): State<AppState>,
    Path((city, timestamp)): Path<(String, String)>,
) -> Result<Json<DetailedForecastResponse>, ApiError> {
    let record = state.queries.detail(&city, &timestamp).await?;
    Ok(Json(RawForecastEntry::from(&record)))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
