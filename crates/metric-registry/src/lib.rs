//! Top-level facade crate for the metric registry.
//!
//! Re-exports core types and the server library so users can depend on a single crate.

pub mod core {
    pub use metric_registry_core::*;
}

pub mod runtime {
    pub use metric_registry_server::*;
}

pub use metric_registry_core::{metric_labels, MetricOption, MetricsError, Result};
pub use metric_registry_server::{
    public_server, server, tls_server, Counter, CounterVec, Gauge, GaugeVec, Histogram,
    HistogramVec, Registry, ServerOption,
};
