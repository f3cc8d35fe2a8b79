//! Fake upstream for integration testing.
//!
//! Provides a deterministic `ForecastSource` that serves canned forecast
//! lists per city, can be told to fail for chosen cities, and records
//! every fetch, all in-memory with no network.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use skycast::data::ForecastSource;
use skycast::types::{City, ForecastError, RawForecastEntry, RawMain, RawSys, RawWind, WeatherCondition};

/// 2100-01-01 00:00:00 UTC, far enough ahead to stay in every upcoming window.
pub const FUTURE_BASE: i64 = 4_102_444_800;

/// Upstream slot spacing: three hours.
pub const SLOT_SECS: i64 = 10_800;

#[derive(Default)]
pub struct FakeSource {
    forecasts: Mutex<HashMap<String, Vec<RawForecastEntry>>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `temps` for `city` as consecutive slots starting at `FUTURE_BASE`.
    pub fn with_city(self, city: &str, temps: &[f64]) -> Self {
        self.set_forecast(city, temps);
        self
    }

    /// Make every fetch for `city` fail.
    pub fn failing(self, city: &str) -> Self {
        self.failing.lock().unwrap().insert(city.to_string());
        self
    }

    pub fn set_forecast(&self, city: &str, temps: &[f64]) {
        self.forecasts
            .lock()
            .unwrap()
            .insert(city.to_string(), entries(temps));
    }

    /// Cities fetched so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ForecastSource for FakeSource {
    async fn fetch(&self, city: &City) -> Result<Vec<RawForecastEntry>, ForecastError> {
        self.calls.lock().unwrap().push(city.name.clone());

        if self.failing.lock().unwrap().contains(&city.name) {
            return Err(ForecastError::upstream(&city.name, "HTTP 503 Service Unavailable"));
        }

        Ok(self
            .forecasts
            .lock()
            .unwrap()
            .get(&city.name)
            .cloned()
            .unwrap_or_default())
    }
}

/// Upstream-shaped entries for consecutive slots from `FUTURE_BASE`.
pub fn entries(temps: &[f64]) -> Vec<RawForecastEntry> {
    temps
        .iter()
        .enumerate()
        .map(|(i, t)| RawForecastEntry {
            dt: FUTURE_BASE + i as i64 * SLOT_SECS,
            main: RawMain {
                temp: *t,
                feels_like: *t - 1.0,
                temp_min: *t - 0.5,
                temp_max: *t + 0.5,
                pressure: 1013,
                humidity: 70,
                ..RawMain::default()
            },
            weather: vec![WeatherCondition {
                id: 803,
                main: "Clouds".into(),
                description: "broken clouds".into(),
                icon: "04d".into(),
            }],
            clouds: Default::default(),
            wind: RawWind {
                speed: 3.6,
                deg: 240,
                gust: 5.1,
            },
            visibility: 10_000,
            pop: 0.2,
            sys: RawSys { pod: "d".into() },
            dt_txt: String::new(),
        })
        .collect()
}
