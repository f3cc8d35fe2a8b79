//! Core engine — the ingestion loop (write path) and the query engine (read path).

pub mod scheduler;
pub mod query;
