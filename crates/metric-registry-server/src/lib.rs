//! Metric registry server library.
//!
//! Wires the instrument store, the exposition adapter and the scrape server
//! into a single [`Registry`]. Consumed by the demo binary (`main.rs`) and by
//! integration tests.

pub mod config;
pub mod obs;
pub mod ops;
pub mod registry;
pub mod router;
pub mod server;

pub use obs::{Counter, CounterVec, Exposition, Gauge, GaugeVec, Histogram, HistogramVec};
pub use registry::{Registry, ServerState};
pub use server::{public_server, server, tls_server, ServerOption};
