//! Ingestion scheduler — the periodic fetch → snapshot → upsert loop.
//!
//! One pass walks every tracked city: resolve coordinates from the city
//! table, fetch from the upstream, write the snapshot cache, then upsert
//! the normalised window into the store. Failures are contained per city
//! and recorded in the `PassReport`; a pass always runs to completion.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::data::ForecastSource;
use crate::storage::snapshot::SnapshotCache;
use crate::storage::ForecastStore;
use crate::types::{ForecastError, Snapshot};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Wall-clock period between the starts of consecutive passes.
    pub interval: Duration,
    /// City names to ingest, resolved against the city table every pass.
    pub tracked_cities: Vec<String>,
    /// Extra upsert attempts (re-read from the snapshot cache) after a failed persist.
    pub persist_retries: u32,
    /// Cities processed concurrently within a pass.
    pub fetch_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            tracked_cities: Vec::new(),
            persist_retries: 1,
            fetch_concurrency: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Pass report
// ---------------------------------------------------------------------------

/// Why a city was left out of a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Not present in the city table.
    UnknownCity,
    /// The city table could not be read.
    CityTableUnavailable(String),
    /// Upstream fetch failed.
    FetchFailed(String),
    /// Upsert failed after all retries.
    PersistFailed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnknownCity => write!(f, "unknown city"),
            SkipReason::CityTableUnavailable(e) => write!(f, "city table unavailable: {e}"),
            SkipReason::FetchFailed(e) => write!(f, "fetch failed: {e}"),
            SkipReason::PersistFailed(e) => write!(f, "persist failed: {e}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestedCity {
    pub city: String,
    pub rows: usize,
}

#[derive(Debug, Clone)]
pub struct SkippedCity {
    pub city: String,
    pub reason: SkipReason,
}

/// Summary of one ingestion pass.
#[derive(Debug, Clone)]
pub struct PassReport {
    pub pass_id: Uuid,
    pub pass_number: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub ingested: Vec<IngestedCity>,
    pub skipped: Vec<SkippedCity>,
}

impl PassReport {
    pub fn rows_upserted(&self) -> usize {
        self.ingested.iter().map(|c| c.rows).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }

    pub fn was_ingested(&self, city: &str) -> bool {
        self.ingested.iter().any(|c| c.city == city)
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct IngestionScheduler {
    store: ForecastStore,
    source: Arc<dyn ForecastSource>,
    cache: Arc<dyn SnapshotCache>,
    config: SchedulerConfig,
    span: Span,
    passes: AtomicU64,
}

impl IngestionScheduler {
    pub fn new(
        store: ForecastStore,
        source: Arc<dyn ForecastSource>,
        cache: Arc<dyn SnapshotCache>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            source,
            cache,
            config,
            span: info_span!("ingestion"),
            passes: AtomicU64::new(0),
        }
    }

    /// Log through `span` instead of the default `ingestion` span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Number of passes started so far.
    pub fn passes_started(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    /// Run passes on the configured interval until `shutdown` flips to `true`
    /// (or its sender is dropped). The first pass starts immediately.
    ///
    /// The stop signal is only observed between passes. Returns the number
    /// of passes completed.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut completed = 0u64;

        info!(
            parent: &self.span,
            interval_secs = self.config.interval.as_secs(),
            cities = self.config.tracked_cities.len(),
            "Ingestion loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    let report = self.run_pass().await;
                    completed += 1;
                    self.log_report(&report);
                }
            }
        }

        info!(parent: &self.span, passes = completed, "Ingestion loop stopped");
        completed
    }

    /// Run a single pass over every tracked city.
    pub async fn run_pass(&self) -> PassReport {
        let pass_number = self.passes.fetch_add(1, Ordering::SeqCst) + 1;
        let pass_id = Uuid::new_v4();
        let span = info_span!(parent: &self.span, "pass", pass = pass_number, %pass_id);

        async {
            let started_at = Utc::now();
            info!(cities = self.config.tracked_cities.len(), "Starting ingestion pass");

            // Futures are built up front so the pass future stays `Send`.
            let jobs: Vec<_> = self
                .config
                .tracked_cities
                .iter()
                .map(|name| async move { (name.clone(), self.ingest_city(name).await) })
                .collect();

            let outcomes: Vec<(String, Result<usize, SkipReason>)> = stream::iter(jobs)
                .buffer_unordered(self.config.fetch_concurrency.max(1))
                .collect()
                .await;

            let mut ingested = Vec::new();
            let mut skipped = Vec::new();
            for (city, outcome) in outcomes {
                match outcome {
                    Ok(rows) => ingested.push(IngestedCity { city, rows }),
                    Err(reason) => skipped.push(SkippedCity { city, reason }),
                }
            }

            PassReport {
                pass_id,
                pass_number,
                started_at,
                finished_at: Utc::now(),
                ingested,
                skipped,
            }
        }
        .instrument(span)
        .await
    }

    /// Resolve → fetch → snapshot → upsert for one city.
    async fn ingest_city(&self, name: &str) -> Result<usize, SkipReason> {
        let city = match self.store.resolve_city(name).await {
            Ok(Some(city)) => city,
            Ok(None) => {
                warn!(city = name, "City not in city table, skipping");
                return Err(SkipReason::UnknownCity);
            }
            Err(e) => {
                warn!(city = name, error = %e, "City table lookup failed, skipping");
                return Err(SkipReason::CityTableUnavailable(e.to_string()));
            }
        };

        debug!(city = %city, "Fetching forecast");
        let entries = self.source.fetch(&city).await.map_err(|e| {
            warn!(city = name, error = %e, "Upstream fetch failed, skipping");
            SkipReason::FetchFailed(e.to_string())
        })?;

        let snapshot = Snapshot::new(&city.name, entries);
        let cached = match self.cache.write(&city.name, &snapshot).await {
            Ok(()) => true,
            Err(e) => {
                warn!(city = name, error = %e, "Snapshot write failed, persisting fetched data directly");
                false
            }
        };

        let rows = self.persist(&city.name, &snapshot, cached).await?;
        info!(city = name, rows, "City ingested");
        Ok(rows)
    }

    /// Upsert a snapshot; on failure retry from the cached copy.
    ///
    /// The cache is only re-read when this pass wrote it (`cached`); otherwise
    /// it may still hold an older pass's data and the fetched records are retried.
    async fn persist(&self, city: &str, snapshot: &Snapshot, cached: bool) -> Result<usize, SkipReason> {
        let mut records = snapshot.records();
        let mut attempt = 0u32;

        loop {
            let err = match self.store.upsert_many(city, &records).await {
                Ok(rows) => return Ok(rows),
                Err(e) => e,
            };

            let retryable = !matches!(err, ForecastError::UnknownCity(_));
            if !retryable || attempt >= self.config.persist_retries {
                warn!(city, attempts = attempt + 1, error = %err, "Persist failed, giving up");
                return Err(SkipReason::PersistFailed(err.to_string()));
            }

            attempt += 1;
            if !cached {
                warn!(city, attempt, error = %err, "Persist failed, retrying with fetched data");
                continue;
            }

            warn!(city, attempt, error = %err, "Persist failed, retrying from snapshot cache");
            match self.cache.read(city).await {
                Ok(Some(snap)) => records = snap.records(),
                Ok(None) => debug!(city, "No cached snapshot, retrying with fetched data"),
                Err(e) => warn!(city, error = %e, "Snapshot read failed, retrying with fetched data"),
            }
        }
    }

    fn log_report(&self, report: &PassReport) {
        for skipped in &report.skipped {
            warn!(
                parent: &self.span,
                pass = report.pass_number,
                city = %skipped.city,
                reason = %skipped.reason,
                "City skipped"
            );
        }
        info!(
            parent: &self.span,
            pass = report.pass_number,
            pass_id = %report.pass_id,
            ingested = report.ingested.len(),
            skipped = report.skipped.len(),
            rows = report.rows_upserted(),
            elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
            "Ingestion pass complete"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
