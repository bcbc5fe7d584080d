//! Instruments, the instrument store and the exposition adapter.
//!
//! Values are stored in `prometheus` atomics and rendered through its text
//! encoder by the `/metrics` handler.

pub mod exposition;
pub mod instrument;
pub(crate) mod process;
pub(crate) mod store;

pub use exposition::Exposition;
pub use instrument::{Counter, CounterVec, Gauge, GaugeVec, Histogram, HistogramVec};
