//! Snapshot cache — last-known-good upstream payload per city.
//!
//! The scheduler writes every successful fetch here before persisting it,
//! so a failed database write can be retried from the same data without
//! another upstream request.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

use crate::types::{ForecastError, Snapshot};

/// Key/value store of snapshots keyed by city name.
#[async_trait]
pub trait SnapshotCache: Send + Sync {
    /// Replace the snapshot stored for `city`.
    async fn write(&self, city: &str, snapshot: &Snapshot) -> Result<(), ForecastError>;

    /// The last snapshot written for `city`, if any.
    async fn read(&self, city: &str) -> Result<Option<Snapshot>, ForecastError>;
}

// ---------------------------------------------------------------------------
// File-backed cache
// ---------------------------------------------------------------------------

/// One pretty-printed JSON file per city under a directory.
#[derive(Debug, Clone)]
pub struct FileSnapshotCache {
    dir: PathBuf,
}

impl FileSnapshotCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// City names may contain spaces or separators, so they are percent-encoded.
    fn path_for(&self, city: &str) -> PathBuf {
        self.dir.join(format!("forecast_{}.json", urlencoding::encode(city)))
    }
}

#[async_trait]
impl SnapshotCache for FileSnapshotCache {
    async fn write(&self, city: &str, snapshot: &Snapshot) -> Result<(), ForecastError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ForecastError::snapshot(city, format!("create {}: {e}", self.dir.display())))?;

        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| ForecastError::snapshot(city, format!("serialise: {e}")))?;

        let path = self.path_for(city);
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| ForecastError::snapshot(city, format!("write {}: {e}", path.display())))?;

        debug!(city, path = %path.display(), entries = snapshot.entries.len(), "Snapshot saved");
        Ok(())
    }

    async fn read(&self, city: &str) -> Result<Option<Snapshot>, ForecastError> {
        let path = self.path_for(city);
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ForecastError::snapshot(city, format!("read {}: {e}", path.display())))
            }
        };

        let snapshot = serde_json::from_str(&json)
            .map_err(|e| ForecastError::snapshot(city, format!("parse {}: {e}", path.display())))?;
        Ok(Some(snapshot))
    }
}

// ---------------------------------------------------------------------------
// In-memory cache
// ---------------------------------------------------------------------------

/// Process-local cache, used in tests and when no snapshot directory is configured.
#[derive(Debug, Default)]
pub struct MemorySnapshotCache {
    entries: RwLock<HashMap<String, Snapshot>>,
}

impl MemorySnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl SnapshotCache for MemorySnapshotCache {
    async fn write(&self, city: &str, snapshot: &Snapshot) -> Result<(), ForecastError> {
        self.entries
            .write()
            .await
            .insert(city.to_string(), snapshot.clone());
        Ok(())
    }

    async fn read(&self, city: &str) -> Result<Option<Snapshot>, ForecastError> {
        Ok(self.entries.read().await.get(city).cloned())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
