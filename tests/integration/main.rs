//! End-to-end tests: ingestion through the scheduler, reads through the
//! query engine and the HTTP layer, all against an in-memory store.

mod fake_source;
mod pipeline;
