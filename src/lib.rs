//! SKYCAST — scheduled weather forecast ingestion and lookup service
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod data;
pub mod engine;
pub mod storage;
pub mod api;
