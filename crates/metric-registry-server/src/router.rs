//! Axum router wiring for the scrape endpoint.

use axum::{routing::get, Router};

use crate::{obs::Exposition, ops};

/// Path served by every registry.
pub const METRICS_PATH: &str = "/metrics";

pub fn build_router(exposition: Exposition) -> Router {
    Router::new()
        .route(METRICS_PATH, get(ops::metrics))
        .with_state(exposition)
}
