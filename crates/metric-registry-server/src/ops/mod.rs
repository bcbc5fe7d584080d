//! Operational HTTP endpoints.
//!
//! - `/metrics` : text exposition format
//! - `/healthz` : liveness (mounted by the binary in attach mode)

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

use crate::obs::Exposition;

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn metrics(State(exposition): State<Exposition>) -> Response {
    match exposition.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, exposition.content_type())],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "scrape render failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
