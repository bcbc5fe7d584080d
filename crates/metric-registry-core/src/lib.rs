//! metric-registry core: identity keys, validation, options and the error type.
//!
//! This crate defines the naming rules and error surface shared by the
//! registry server and its callers. It carries no transport or runtime
//! dependencies.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. Fail-fast panics
//! for programmer errors live in the registry facade, never in this crate.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod key;
pub mod options;

pub use error::{ErrorKind, MetricsError, Result};
pub use key::{validate_buckets, validate_label_name, validate_metric_name, MetricKey};
pub use options::{const_labels, metric_labels, MetricOption};
