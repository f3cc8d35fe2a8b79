//! Query API — Axum web server over the query engine.
//!
//! Routes:
//! - `GET /cities`
//! - `GET /forecast/:city`
//! - `GET /forecast/:city/:timestamp` (timestamp `YYYY-MM-DD HH:MM:SS`, URL-encoded)
//! - `GET /health`

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use routes::AppState;

/// Bind `port` on all interfaces and serve until the future is dropped.
pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API port {port}"))?;
    info!(port, "Query API listening on http://localhost:{port}");

    axum::serve(listener, app)
        .await
        .context("Query API server error")?;
    Ok(())
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/cities", get(routes::get_cities))
        .route("/forecast/:city", get(routes::get_city_forecast))
        .route("/forecast/:city/:timestamp", get(routes::get_forecast_detail))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
