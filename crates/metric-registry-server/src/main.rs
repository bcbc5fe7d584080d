//! Metric registry demo server.
//!
//! - Loads `metric-registry.yaml` (or the path given as the first argument)
//! - Registers one instrument of every kind and records sample values
//! - Serves `/metrics` until Ctrl-C / SIGTERM
//!
//! In attach mode the binary owns the listener and mounts the registry's
//! router next to its own `/healthz` route.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use axum::{routing::get, Router};
use tracing_subscriber::{fmt, EnvFilter};

use metric_registry_server::{config, ops, Registry};

const DEFAULT_CONFIG: &str = "metric-registry.yaml";

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let cfg = if Path::new(&path).exists() {
        config::load_from_file(&path).expect("config load failed")
    } else {
        tracing::info!(%path, "config file not found; using defaults");
        config::RegistryConfig::default()
    };

    let option = cfg.server_option().expect("invalid server config");
    let registry = Registry::new(option)
        .await
        .expect("metrics registry startup failed");
    registry.register_debug_metrics();
    record_samples(&registry);

    match registry.port() {
        Some(port) => {
            tracing::info!(port, "metric-registry-server ready");
            wait_for_termination().await;
        }
        None => {
            let listen = SocketAddr::from((Ipv4Addr::LOCALHOST, cfg.server.port));
            let app = Router::new()
                .route("/healthz", get(ops::healthz))
                .merge(registry.router());
            let listener = tokio::net::TcpListener::bind(listen)
                .await
                .expect("failed to bind");
            tracing::info!(addr = ?listener.local_addr().ok(), "metric-registry-server ready (attached)");
            axum::serve(listener, app)
                .with_graceful_shutdown(wait_for_termination())
                .await
                .expect("server failed");
        }
    }

    tracing::info!("metric-registry-server stopping");
}

fn record_samples(registry: &Registry) {
    let counter = registry.new_counter("counter_name", "An example counter.", &[]);
    let counter_vec = registry.new_counter_vec(
        "counter_vector_name",
        "An example counter vector.",
        &["status", "app"],
        &[],
    );
    let gauge = registry.new_gauge("gauge_name", "An example gauge.", &[]);
    let gauge_vec = registry.new_gauge_vec(
        "gauge_vector_name",
        "An example gauge vector.",
        &["state", "source"],
        &[],
    );
    let histogram = registry.new_histogram("histogram_name", "An example histogram.", &[1.0], &[]);
    let histogram_vec = registry.new_histogram_vec(
        "histogram_vector_name",
        "An example histogram vector.",
        &["mode"],
        &[10.0, 50.0, 100.0],
        &[],
    );

    counter.add(10.0);
    counter_vec.add(0.25, &["success", "IntranetPortal"]);
    gauge.set(38.0);
    gauge_vec.set(12.5, &["active", "MobileApp"]);
    gauge_vec.add(0.5, &["active", "MobileApp"]);
    histogram.observe(98.01234);
    histogram_vec.observe(67.0, &["detached"]);

    // Same name and labels returns the existing counter: the endpoint shows 25.
    let counter2 = registry.new_counter("counter_name", "An example counter.", &[]);
    counter2.add(15.0);
}

async fn wait_for_termination() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "ctrl-c handler failed");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
