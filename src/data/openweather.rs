//! OpenWeatherMap forecast provider.
//!
//! Fetches the 5 day / 3 hour forecast for a coordinate pair in metric
//! units. Each call is a single request; errors are surfaced as
//! `UpstreamUnavailable` and retried (or not) by the scheduler.
//!
//! API: `{base_url}/data/2.5/forecast?lat=..&lon=..&units=metric&appid=..`
//! Auth: API key as query parameter.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::ForecastSource;
use crate::types::{City, ForecastError, RawForecastEntry};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org";

/// Error bodies are echoed into log lines, so keep them short.
const MAX_ERROR_BODY: usize = 200;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    cnt: u32,
    #[serde(default)]
    list: Vec<RawForecastEntry>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OpenWeatherClient {
    http: Client,
    base_url: String,
    api_key: SecretString,
    units: String,
}

impl OpenWeatherClient {
    pub fn new(base_url: &str, api_key: SecretString, timeout: Duration, units: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("SKYCAST/0.1.0")
            .build()
            .context("Failed to build OpenWeatherMap HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            units: units.to_string(),
        })
    }

    fn forecast_url(&self) -> String {
        format!("{}/data/2.5/forecast", self.base_url)
    }
}

#[async_trait]
impl ForecastSource for OpenWeatherClient {
    async fn fetch(&self, city: &City) -> Result<Vec<RawForecastEntry>, ForecastError> {
        let lat = city.lat.to_string();
        let lon = city.lon.to_string();

        // `without_url` keeps the API key out of error messages.
        let resp = self
            .http
            .get(self.forecast_url())
            .query(&[
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("units", self.units.as_str()),
                ("appid", self.api_key.expose_secret().as_str()),
            ])
            .send()
            .await
            .map_err(|e| ForecastError::upstream(&city.name, e.without_url()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ForecastError::upstream(
                &city.name,
                format!("HTTP {status}: {}", truncate_body(&body)),
            ));
        }

        let data: ForecastResponse = resp
            .json()
            .await
            .map_err(|e| ForecastError::upstream(&city.name, format!("invalid payload: {}", e.without_url())))?;

        debug!(city = %city.name, cnt = data.cnt, entries = data.list.len(), "Forecast fetched");
        Ok(data.list)
    }
}

fn truncate_body(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, http::StatusCode, routing::get, Json, Router};
    use std::collections::HashMap;

    const FIXTURE: &str = r#"{
        "cod": "200",
        "message": 0,
        "cnt": 2,
        "list": [
            {
                "dt": 1717232400,
                "main": {"temp": 18.4, "feels_like": 17.9, "temp_min": 17.2, "temp_max": 18.4,
                         "pressure": 1015, "sea_level": 1015, "grnd_level": 1010,
                         "humidity": 68, "temp_kf": 1.2},
                "weather": [{"id": 500, "main": "Rain", "description": "light rain", "icon": "10d"}],
                "clouds": {"all": 75},
                "wind": {"speed": 4.1, "deg": 230, "gust": 7.3},
                "visibility": 10000,
                "pop": 0.42,
                "sys": {"pod": "d"},
                "dt_txt": "2024-06-01 09:00:00"
            },
            {
                "dt": 1717243200,
                "main": {"temp": 20.1, "humidity": 60, "pressure": 1014},
                "weather": [{"id": 800, "main": "Clear", "description": "clear sky", "icon": "01d"}],
                "clouds": {"all": 0},
                "wind": {"speed": 3.0, "deg": 200},
                "visibility": 10000,
                "pop": 0,
                "sys": {"pod": "d"},
                "dt_txt": "2024-06-01 12:00:00"
            }
        ],
        "city": {"name": "Paris", "country": "FR"}
    }"#;

    /// Serve `router` on an ephemeral local port and return its base URL.
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base_url: &str) -> OpenWeatherClient {
        OpenWeatherClient::new(
            base_url,
            SecretString::new("test-key".to_string()),
            Duration::from_secs(5),
            "metric",
        )
        .unwrap()
    }

    fn paris() -> City {
        City::new("Paris", "FR", 48.85, 2.35)
    }

    #[tokio::test]
    async fn test_fetch_parses_forecast_list() {
        let router = Router::new().route(
            "/data/2.5/forecast",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                assert_eq!(params.get("lat").map(String::as_str), Some("48.85"));
                assert_eq!(params.get("lon").map(String::as_str), Some("2.35"));
                assert_eq!(params.get("units").map(String::as_str), Some("metric"));
                assert_eq!(params.get("appid").map(String::as_str), Some("test-key"));
                Json(serde_json::from_str::<serde_json::Value>(FIXTURE).unwrap())
            }),
        );
        let base = serve(router).await;

        let entries = client(&base).fetch(&paris()).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].main.temp, 18.4);
        assert_eq!(entries[1].weather[0].description, "clear sky");
        assert_eq!(entries[1].wind.gust, 0.0);
    }

    #[tokio::test]
    async fn test_fetch_http_error_is_upstream_unavailable() {
        let router = Router::new().route(
            "/data/2.5/forecast",
            get(|| async { (StatusCode::UNAUTHORIZED, r#"{"cod":401,"message":"Invalid API key"}"#) }),
        );
        let base = serve(router).await;

        let err = client(&base).fetch(&paris()).await.unwrap_err();
        match err {
            ForecastError::UpstreamUnavailable { city, message } => {
                assert_eq!(city, "Paris");
                assert!(message.contains("401"));
                assert!(message.contains("Invalid API key"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_bad_payload_is_upstream_unavailable() {
        let router = Router::new().route("/data/2.5/forecast", get(|| async { "not json" }));
        let base = serve(router).await;

        let err = client(&base).fetch(&paris()).await.unwrap_err();
        assert!(matches!(err, ForecastError::UpstreamUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_fetch_connection_refused_hides_key() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&format!("http://{addr}")).fetch(&paris()).await.unwrap_err();
        assert!(matches!(err, ForecastError::UpstreamUnavailable { .. }));
        assert!(!err.to_string().contains("test-key"));
    }

    #[test]
    fn test_truncate_body() {
        let long = "x".repeat(500);
        assert_eq!(truncate_body(&long).len(), MAX_ERROR_BODY);
        assert_eq!(truncate_body("short"), "short");
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let c = client("http://localhost:1234/");
        assert_eq!(c.forecast_url(), "http://localhost:1234/data/2.5/forecast");
    }
}
