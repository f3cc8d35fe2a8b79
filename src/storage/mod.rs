//! Persistence layer.
//!
//! The forecast store keeps one row per (city, forecast instant) in SQLite
//! and owns the city table the scheduler resolves coordinates from.
//! Bulk upserts run inside a single transaction so readers see either the
//! previous or the fully written state of a city's window.

pub mod snapshot;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::types::{format_timestamp, City, ForecastError, ForecastRecord, ForecastWindow, WeatherCondition};

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS cities (
        id      INTEGER PRIMARY KEY AUTOINCREMENT,
        name    TEXT NOT NULL UNIQUE,
        country TEXT NOT NULL,
        lat     REAL NOT NULL,
        lon     REAL NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS forecasts (
        city_id               INTEGER NOT NULL REFERENCES cities(id),
        forecast_ts           INTEGER NOT NULL,
        dt_txt                TEXT NOT NULL,
        temperature           REAL NOT NULL,
        feels_like            REAL NOT NULL,
        temp_min              REAL NOT NULL,
        temp_max              REAL NOT NULL,
        temp_kf               REAL NOT NULL,
        pressure              INTEGER NOT NULL,
        sea_level             INTEGER NOT NULL,
        grnd_level            INTEGER NOT NULL,
        humidity              INTEGER NOT NULL,
        wind_speed            REAL NOT NULL,
        wind_deg              INTEGER NOT NULL,
        wind_gust             REAL NOT NULL,
        clouds                INTEGER NOT NULL,
        visibility            INTEGER NOT NULL,
        pop                   REAL NOT NULL,
        condition_id          INTEGER NOT NULL,
        condition_main        TEXT NOT NULL,
        condition_description TEXT NOT NULL,
        condition_icon        TEXT NOT NULL,
        part_of_day           TEXT NOT NULL,
        PRIMARY KEY (city_id, forecast_ts)
    )
    "#,
];

const UPSERT_FORECAST: &str = r#"
    INSERT INTO forecasts (
        city_id, forecast_ts, dt_txt, temperature, feels_like, temp_min, temp_max, temp_kf,
        pressure, sea_level, grnd_level, humidity, wind_speed, wind_deg, wind_gust,
        clouds, visibility, pop, condition_id, condition_main, condition_description,
        condition_icon, part_of_day
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT (city_id, forecast_ts) DO UPDATE SET
        dt_txt = excluded.dt_txt,
        temperature = excluded.temperature,
        feels_like = excluded.feels_like,
        temp_min = excluded.temp_min,
        temp_max = excluded.temp_max,
        temp_kf = excluded.temp_kf,
        pressure = excluded.pressure,
        sea_level = excluded.sea_level,
        grnd_level = excluded.grnd_level,
        humidity = excluded.humidity,
        wind_speed = excluded.wind_speed,
        wind_deg = excluded.wind_deg,
        wind_gust = excluded.wind_gust,
        clouds = excluded.clouds,
        visibility = excluded.visibility,
        pop = excluded.pop,
        condition_id = excluded.condition_id,
        condition_main = excluded.condition_main,
        condition_description = excluded.condition_description,
        condition_icon = excluded.condition_icon,
        part_of_day = excluded.part_of_day
"#;

const SELECT_WINDOW: &str = r#"
    SELECT forecast_ts, dt_txt, temperature, feels_like, temp_min, temp_max, temp_kf,
           pressure, sea_level, grnd_level, humidity, wind_speed, wind_deg, wind_gust,
           clouds, visibility, pop, condition_id, condition_main, condition_description,
           condition_icon, part_of_day
    FROM forecasts
    WHERE city_id = ? AND forecast_ts >= ?
    ORDER BY forecast_ts ASC
"#;

const SELECT_POINT: &str = r#"
    SELECT forecast_ts, dt_txt, temperature, feels_like, temp_min, temp_max, temp_kf,
           pressure, sea_level, grnd_level, humidity, wind_speed, wind_deg, wind_gust,
           clouds, visibility, pop, condition_id, condition_main, condition_description,
           condition_icon, part_of_day
    FROM forecasts
    WHERE city_id = ? AND forecast_ts = ?
"#;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct CityRow {
    id: i64,
    name: String,
    country: String,
    lat: f64,
    lon: f64,
}

impl From<CityRow> for City {
    fn from(row: CityRow) -> Self {
        City {
            name: row.name,
            country: row.country,
            lat: row.lat,
            lon: row.lon,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ForecastRow {
    forecast_ts: i64,
    dt_txt: String,
    temperature: f64,
    feels_like: f64,
    temp_min: f64,
    temp_max: f64,
    temp_kf: f64,
    pressure: i64,
    sea_level: i64,
    grnd_level: i64,
    humidity: i64,
    wind_speed: f64,
    wind_deg: i64,
    wind_gust: f64,
    clouds: i64,
    visibility: i64,
    pop: f64,
    condition_id: i64,
    condition_main: String,
    condition_description: String,
    condition_icon: String,
    part_of_day: String,
}

impl TryFrom<ForecastRow> for ForecastRecord {
    type Error = ForecastError;

    fn try_from(row: ForecastRow) -> Result<Self, Self::Error> {
        let timestamp = DateTime::<Utc>::from_timestamp(row.forecast_ts, 0).ok_or_else(|| {
            ForecastError::InvalidRecord(format!("forecast_ts {} out of range", row.forecast_ts))
        })?;

        Ok(ForecastRecord {
            timestamp,
            dt_txt: row.dt_txt,
            temperature: row.temperature,
            feels_like: row.feels_like,
            temp_min: row.temp_min,
            temp_max: row.temp_max,
            temp_kf: row.temp_kf,
            pressure: row.pressure,
            sea_level: row.sea_level,
            grnd_level: row.grnd_level,
            humidity: row.humidity,
            wind_speed: row.wind_speed,
            wind_deg: row.wind_deg,
            wind_gust: row.wind_gust,
            clouds: row.clouds,
            visibility: row.visibility,
            pop: row.pop,
            condition: WeatherCondition {
                id: row.condition_id,
                main: row.condition_main,
                description: row.condition_description,
                icon: row.condition_icon,
            },
            part_of_day: row.part_of_day,
        })
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// SQLite-backed forecast store. Cheap to clone (shares the pool).
#[derive(Debug, Clone)]
pub struct ForecastStore {
    pool: SqlitePool,
}

impl ForecastStore {
    /// Open (creating if missing) the database at `url` and apply the schema.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, ForecastError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!(url, max_connections, "Forecast store ready");
        Ok(store)
    }

    /// Private in-memory database. A single connection that never expires,
    /// since every SQLite connection to `:memory:` is a separate database.
    pub async fn connect_in_memory() -> Result<Self, ForecastError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create tables if they don't exist.
    pub async fn migrate(&self) -> Result<(), ForecastError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Schema applied");
        Ok(())
    }

    // -- City table ------------------------------------------------------

    /// Insert the city if its name is not yet present. Returns `true` when a row was created.
    pub async fn register_city(&self, city: &City) -> Result<bool, ForecastError> {
        let result = sqlx::query(
            "INSERT INTO cities (name, country, lat, lon) VALUES (?, ?, ?, ?) ON CONFLICT (name) DO NOTHING",
        )
        .bind(&city.name)
        .bind(&city.country)
        .bind(city.lat)
        .bind(city.lon)
        .execute(&self.pool)
        .await?;

        let created = result.rows_affected() == 1;
        if created {
            info!(city = %city.name, country = %city.country, "Registered city");
        }
        Ok(created)
    }

    /// Look a city up in the city table.
    pub async fn resolve_city(&self, name: &str) -> Result<Option<City>, ForecastError> {
        let row: Option<CityRow> =
            sqlx::query_as("SELECT id, name, country, lat, lon FROM cities WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(City::from))
    }

    // -- Forecasts -------------------------------------------------------

    /// Upsert a city's forecasts in one transaction. Existing rows for the
    /// same instant are overwritten.
    pub async fn upsert_many(
        &self,
        city: &str,
        records: &[ForecastRecord],
    ) -> Result<usize, ForecastError> {
        let city_id: Option<i64> = sqlx::query_scalar("SELECT id FROM cities WHERE name = ?")
            .bind(city)
            .fetch_optional(&self.pool)
            .await?;
        let city_id = city_id.ok_or_else(|| ForecastError::UnknownCity(city.to_string()))?;

        let mut tx = self.pool.begin().await?;
        for r in records {
            sqlx::query(UPSERT_FORECAST)
                .bind(city_id)
                .bind(r.timestamp.timestamp())
                .bind(&r.dt_txt)
                .bind(r.temperature)
                .bind(r.feels_like)
                .bind(r.temp_min)
                .bind(r.temp_max)
                .bind(r.temp_kf)
                .bind(r.pressure)
                .bind(r.sea_level)
                .bind(r.grnd_level)
                .bind(r.humidity)
                .bind(r.wind_speed)
                .bind(r.wind_deg)
                .bind(r.wind_gust)
                .bind(r.clouds)
                .bind(r.visibility)
                .bind(r.pop)
                .bind(r.condition.id)
                .bind(&r.condition.main)
                .bind(&r.condition.description)
                .bind(&r.condition.icon)
                .bind(&r.part_of_day)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        debug!(city, rows = records.len(), "Forecasts upserted");
        Ok(records.len())
    }

    /// Names of every city holding at least one forecast, ascending.
    ///
    /// Degrades to an empty list if the database can't be read.
    pub async fn list_cities(&self) -> Vec<String> {
        let result = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT c.name FROM cities c JOIN forecasts f ON f.city_id = c.id ORDER BY c.name ASC",
        )
        .fetch_all(&self.pool)
        .await;

        match result {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Failed to list cities, returning none");
                Vec::new()
            }
        }
    }

    /// Forecasts for `city` at or after `from`, ascending.
    pub async fn range_query(
        &self,
        city: &str,
        from: DateTime<Utc>,
    ) -> Result<ForecastWindow, ForecastError> {
        let row = self.find_ingested_city(city).await?;
        let city_id = row.id;

        let rows: Vec<ForecastRow> = sqlx::query_as(SELECT_WINDOW)
            .bind(city_id)
            .bind(from.timestamp())
            .fetch_all(&self.pool)
            .await?;

        let records = rows
            .into_iter()
            .map(ForecastRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ForecastWindow {
            city: City::from(row),
            records,
        })
    }

    /// The forecast for `city` at exactly `timestamp`.
    pub async fn point_query(
        &self,
        city: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<ForecastRecord, ForecastError> {
        let row = self.find_ingested_city(city).await?;

        let forecast: Option<ForecastRow> = sqlx::query_as(SELECT_POINT)
            .bind(row.id)
            .bind(timestamp.timestamp())
            .fetch_optional(&self.pool)
            .await?;

        match forecast {
            Some(f) => ForecastRecord::try_from(f),
            None => Err(ForecastError::DateNotFound {
                city: city.to_string(),
                timestamp: format_timestamp(&timestamp),
            }),
        }
    }

    /// Number of stored forecasts for a city (0 if unknown).
    pub async fn record_count(&self, city: &str) -> Result<usize, ForecastError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM forecasts f JOIN cities c ON f.city_id = c.id WHERE c.name = ?",
        )
        .bind(city)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as usize)
    }

    /// A city is present in the store once it holds at least one forecast.
    async fn find_ingested_city(&self, city: &str) -> Result<CityRow, ForecastError> {
        let row: Option<CityRow> = sqlx::query_as(
            r#"
            SELECT c.id, c.name, c.country, c.lat, c.lon
            FROM cities c
            WHERE c.name = ?
              AND EXISTS (SELECT 1 FROM forecasts f WHERE f.city_id = c.id)
            "#,
        )
        .bind(city)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| ForecastError::CityNotFound(city.to_string()))
    }

    /// Close the pool (used on shutdown).
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run raw SQL against the pool, for fault injection in tests.
    #[cfg(test)]
    pub(crate) async fn execute_raw(&self, sql: &str) -> Result<(), ForecastError> {
        sqlx::query(sql).execute(&self.pool).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
