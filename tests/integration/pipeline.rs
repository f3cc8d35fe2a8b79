//! Ingest → store → query pipeline.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower::ServiceExt;

use skycast::api::build_router;
use skycast::api::routes::ApiState;
use skycast::engine::query::QueryEngine;
use skycast::engine::scheduler::{IngestionScheduler, SchedulerConfig, SkipReason};
use skycast::storage::snapshot::MemorySnapshotCache;
use skycast::storage::ForecastStore;
use skycast::types::{City, ForecastError};

use crate::fake_source::FakeSource;

struct Harness {
    store: ForecastStore,
    source: Arc<FakeSource>,
    cache: Arc<MemorySnapshotCache>,
    scheduler: IngestionScheduler,
}

impl Harness {
    async fn new(source: FakeSource, tracked: &[&str]) -> Self {
        Self::with_interval(source, tracked, Duration::from_secs(3600)).await
    }

    async fn with_interval(source: FakeSource, tracked: &[&str], interval: Duration) -> Self {
        let store = ForecastStore::connect_in_memory().await.unwrap();
        for city in [
            City::new("Paris", "FR", 48.8589, 2.32),
            City::new("Rome", "IT", 41.8933, 12.4829),
            City::new("Tokyo", "JP", 35.6828, 139.7595),
        ] {
            store.register_city(&city).await.unwrap();
        }

        let source = Arc::new(source);
        let cache = Arc::new(MemorySnapshotCache::new());
        let scheduler = IngestionScheduler::new(
            store.clone(),
            source.clone(),
            cache.clone(),
            SchedulerConfig {
                interval,
                tracked_cities: tracked.iter().map(|c| c.to_string()).collect(),
                ..SchedulerConfig::default()
            },
        );

        Self {
            store,
            source,
            cache,
            scheduler,
        }
    }

    fn queries(&self) -> QueryEngine {
        QueryEngine::new(self.store.clone())
    }
}

#[tokio::test]
async fn test_ingested_city_is_summarised() {
    let h = Harness::new(FakeSource::new().with_city("Paris", &[10.0, 20.0]), &["Paris"]).await;

    let report = h.scheduler.run_pass().await;
    assert!(report.is_clean());
    assert_eq!(report.rows_upserted(), 2);

    let summary = h.queries().summarize_now("Paris").await.unwrap();
    assert_eq!(summary.country, "FR");
    assert_eq!(summary.avg_temperature, dec!(15.0));
    assert_eq!(
        summary.forecast_timestamps,
        vec!["2100-01-01 00:00:00", "2100-01-01 03:00:00"]
    );
    assert_eq!(h.cache.len().await, 1);
}

#[tokio::test]
async fn test_detail_exact_and_missing_slot() {
    let h = Harness::new(FakeSource::new().with_city("Paris", &[12.34]), &["Paris"]).await;
    h.scheduler.run_pass().await;

    let queries = h.queries();
    let record = queries.detail("Paris", "2100-01-01 00:00:00").await.unwrap();
    assert_eq!(record.temperature, 12.34);
    assert_eq!(record.condition.description, "broken clouds");
    assert_eq!(record.part_of_day, "d");

    let err = queries.detail("Paris", "2100-01-01 03:00:00").await.unwrap_err();
    assert!(matches!(err, ForecastError::DateNotFound { .. }));
}

#[tokio::test]
async fn test_malformed_timestamp_for_any_city() {
    let h = Harness::new(FakeSource::new().with_city("Paris", &[12.34]), &["Paris"]).await;
    h.scheduler.run_pass().await;

    for city in ["Paris", "Rome", "Nowhere"] {
        let err = h.queries().detail(city, "2024/01/01").await.unwrap_err();
        assert!(matches!(err, ForecastError::InvalidTimestampFormat(_)), "{city}: {err:?}");
    }
}

#[tokio::test]
async fn test_failing_city_does_not_block_others() {
    let source = FakeSource::new()
        .with_city("Paris", &[10.0])
        .with_city("Rome", &[22.0, 24.0])
        .failing("Tokyo");
    let h = Harness::new(source, &["Paris", "Tokyo", "Rome"]).await;

    let report = h.scheduler.run_pass().await;
    assert!(report.was_ingested("Paris"));
    assert!(report.was_ingested("Rome"));
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].city, "Tokyo");
    assert!(matches!(report.skipped[0].reason, SkipReason::FetchFailed(_)));

    assert_eq!(h.queries().list_cities().await, vec!["Paris", "Rome"]);
    let err = h.queries().summarize_now("Tokyo").await.unwrap_err();
    assert!(matches!(err, ForecastError::CityNotFound(_)));
}

#[tokio::test]
async fn test_unknown_city_is_never_fetched() {
    let source = FakeSource::new().with_city("Paris", &[10.0]).with_city("Oslo", &[1.0]);
    let h = Harness::new(source, &["Paris", "Oslo"]).await;

    let report = h.scheduler.run_pass().await;
    assert!(report.was_ingested("Paris"));
    assert!(matches!(report.skipped[0].reason, SkipReason::UnknownCity));

    // Unknown cities are never sent upstream.
    assert_eq!(h.source.calls(), vec!["Paris"]);
}

#[tokio::test]
async fn test_reingest_overwrites_slots() {
    let h = Harness::new(FakeSource::new().with_city("Paris", &[10.0, 20.0]), &["Paris"]).await;
    h.scheduler.run_pass().await;

    h.source.set_forecast("Paris", &[30.0, 30.0]);
    h.scheduler.run_pass().await;

    assert_eq!(h.store.record_count("Paris").await.unwrap(), 2);
    let summary = h.queries().summarize_now("Paris").await.unwrap();
    assert_eq!(summary.avg_temperature, dec!(30));
}

#[tokio::test]
async fn test_loop_keeps_running_after_failures() {
    let source = FakeSource::new().with_city("Paris", &[10.0]).failing("Tokyo");
    let h = Arc::new(
        Harness::with_interval(source, &["Paris", "Tokyo"], Duration::from_millis(20)).await,
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let task = {
        let h = Arc::clone(&h);
        tokio::spawn(async move { h.scheduler.run(stop_rx).await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.scheduler.passes_started() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    stop_tx.send(true).unwrap();
    let completed = task.await.unwrap();
    assert!(completed >= 3);

    let calls = h.source.calls();
    assert!(calls.iter().filter(|c| *c == "Tokyo").count() >= 3);
    assert_eq!(h.queries().list_cities().await, vec!["Paris"]);
}

#[tokio::test]
async fn test_http_reads_ingested_data() {
    let h = Harness::new(FakeSource::new().with_city("Paris", &[10.0, 20.0]), &["Paris"]).await;
    h.scheduler.run_pass().await;

    let app = build_router(Arc::new(ApiState::new(h.queries())));

    let resp = app
        .clone()
        .oneshot(Request::builder().uri("/forecast/Paris").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["city"], "Paris");
    assert_eq!(json["avg_temperature"], 15.0);
    assert_eq!(json["forecasts_dates"].as_array().unwrap().len(), 2);

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/forecast/Paris/2100-01-01%2003:00:00")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["main"]["temp"], 20.0);
    assert_eq!(json["wind"]["deg"], 240);
    assert_eq!(json["dt_txt"], "2100-01-01 03:00:00");

    let resp = app
        .oneshot(Request::builder().uri("/forecast/Tokyo").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
