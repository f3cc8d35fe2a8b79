//! SKYCAST — scheduled weather forecast ingestion and lookup service
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the forecast store, then runs the ingestion scheduler and the
//! query API side by side until Ctrl+C.

use anyhow::{Context, Result};
use secrecy::SecretString;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, info_span, warn};

use skycast::api;
use skycast::api::routes::ApiState;
use skycast::config;
use skycast::data::openweather::OpenWeatherClient;
use skycast::engine::query::QueryEngine;
use skycast::engine::scheduler::IngestionScheduler;
use skycast::storage::snapshot::{FileSnapshotCache, MemorySnapshotCache, SnapshotCache};
use skycast::storage::ForecastStore;

const BANNER: &str = r#"
 ____  _  ____   ______    _    ____ _____
/ ___|| |/ /\ \ / / ___|  / \  / ___|_   _|
\___ \| ' /  \ V / |     / _ \ \___ \ | |
 ___) | . \   | || |___ / ___ \ ___) || |
|____/|_|\_\  |_| \____/_/   \_\____/ |_|

  Scheduled forecast ingestion and lookup
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        service = %cfg.service.name,
        interval_secs = cfg.ingestion.interval_secs,
        cities = cfg.ingestion.tracked_cities.len(),
        "SKYCAST starting up"
    );

    // -- Store and city table --------------------------------------------

    let store = ForecastStore::connect(&cfg.database.url, cfg.database.max_connections)
        .await
        .with_context(|| format!("Failed to open forecast store at {}", cfg.database.url))?;

    let mut registered = 0usize;
    for city in cfg.city_table() {
        if store.register_city(&city).await? {
            registered += 1;
        }
    }
    info!(registered, total = cfg.cities.len(), "City table ready");

    // -- Ingestion components --------------------------------------------

    let api_key = match config::AppConfig::resolve_env(&cfg.upstream.api_key_env) {
        Ok(key) => key,
        Err(e) => {
            warn!(error = %e, "No upstream API key configured; every fetch will be rejected");
            String::new()
        }
    };

    let source = OpenWeatherClient::new(
        &cfg.upstream.base_url,
        SecretString::new(api_key),
        cfg.upstream_timeout(),
        &cfg.upstream.units,
    )?;

    let cache: Arc<dyn SnapshotCache> = match &cfg.ingestion.snapshot_dir {
        Some(dir) => {
            info!(dir = %dir, "Using file snapshot cache");
            Arc::new(FileSnapshotCache::new(dir))
        }
        None => Arc::new(MemorySnapshotCache::new()),
    };

    let scheduler = Arc::new(
        IngestionScheduler::new(store.clone(), Arc::new(source), cache, cfg.scheduler_config())
            .with_span(info_span!("ingestion", service = %cfg.service.name)),
    );

    // -- Run -------------------------------------------------------------

    let (stop_tx, stop_rx) = watch::channel(false);
    let ingest_task = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run(stop_rx).await })
    };

    let api_task = if cfg.api.enabled {
        let state = Arc::new(ApiState::new(QueryEngine::new(store.clone())));
        let port = cfg.api.port;
        Some(tokio::spawn(async move {
            if let Err(e) = api::serve(state, port).await {
                error!(error = %e, "Query API stopped");
            }
        }))
    } else {
        info!("Query API disabled");
        None
    };

    info!("Running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received.");

    // The scheduler finishes any pass in flight before it sees the signal.
    let _ = stop_tx.send(true);
    let passes = match ingest_task.await {
        Ok(passes) => passes,
        Err(e) => {
            error!(error = %e, "Ingestion task failed");
            scheduler.passes_started()
        }
    };

    if let Some(task) = api_task {
        task.abort();
    }
    store.close().await;

    info!(passes, "SKYCAST shut down cleanly.");
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("skycast=info"));

    let json_logging = std::env::var("SKYCAST_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
