//! Shared error type across metric-registry crates.

use thiserror::Error;

/// Stable error codes, independent of the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Metric name is not a valid exposition identifier.
    InvalidName,
    /// Label name is not a valid exposition identifier.
    InvalidLabelName,
    /// Same label name declared twice.
    DuplicateLabelName,
    /// Histogram boundaries are empty, unsorted or not finite.
    InvalidBuckets,
    /// Vec mutation called with the wrong number of label values.
    LabelArity,
    /// Identity already registered as another instrument kind.
    KindMismatch,
    /// Exposition layer refused the instrument.
    Conflict,
    /// Listener could not be bound.
    Bind,
    /// TLS material could not be loaded.
    Tls,
    /// Configuration file is invalid.
    Config,
    /// Exposition text could not be rendered.
    Encode,
    /// Internal error.
    Internal,
}

impl ErrorKind {
    /// String representation used in logs and tests.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidName => "INVALID_NAME",
            ErrorKind::InvalidLabelName => "INVALID_LABEL_NAME",
            ErrorKind::DuplicateLabelName => "DUPLICATE_LABEL_NAME",
            ErrorKind::InvalidBuckets => "INVALID_BUCKETS",
            ErrorKind::LabelArity => "LABEL_ARITY",
            ErrorKind::KindMismatch => "KIND_MISMATCH",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Bind => "BIND",
            ErrorKind::Tls => "TLS",
            ErrorKind::Config => "CONFIG",
            ErrorKind::Encode => "ENCODE",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, MetricsError>;

/// Unified error type used by core and server.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("invalid metric name: {0:?}")]
    InvalidName(String),
    #[error("invalid label name: {0:?}")]
    InvalidLabelName(String),
    #[error("duplicate label name: {0:?}")]
    DuplicateLabelName(String),
    #[error("invalid histogram buckets: {0}")]
    InvalidBuckets(String),
    #[error("label value count mismatch for {name}: expected {expected}, got {got}")]
    LabelArity {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("{name} is already registered as a {existing}, not a {requested}")]
    KindMismatch {
        name: String,
        existing: &'static str,
        requested: &'static str,
    },
    #[error("conflicting registration for {name}: {reason}")]
    Conflict { name: String, reason: String },
    #[error("bind {addr} failed: {reason}")]
    Bind { addr: String, reason: String },
    #[error("tls: {0}")]
    Tls(String),
    #[error("config: {0}")]
    Config(String),
    #[error("encode: {0}")]
    Encode(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl MetricsError {
    /// Map to a stable code.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MetricsError::InvalidName(_) => ErrorKind::InvalidName,
            MetricsError::InvalidLabelName(_) => ErrorKind::InvalidLabelName,
            MetricsError::DuplicateLabelName(_) => ErrorKind::DuplicateLabelName,
            MetricsError::InvalidBuckets(_) => ErrorKind::InvalidBuckets,
            MetricsError::LabelArity { .. } => ErrorKind::LabelArity,
            MetricsError::KindMismatch { .. } => ErrorKind::KindMismatch,
            MetricsError::Conflict { .. } => ErrorKind::Conflict,
            MetricsError::Bind { .. } => ErrorKind::Bind,
            MetricsError::Tls(_) => ErrorKind::Tls,
            MetricsError::Config(_) => ErrorKind::Config,
            MetricsError::Encode(_) => ErrorKind::Encode,
            MetricsError::Internal(_) => ErrorKind::Internal,
        }
    }
}
