use thiserror::Error;

/// Why a raw measurement was refused. The estimator never mutates state
/// when returning one of these.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InvalidSample {
    #[error("non-finite value")]
    NonFinite,
    #[error("value {value} outside plausible range [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },
    #[error("timestamp {got_ms} is not after last accepted {last_ms}")]
    NonMonotonic { last_ms: u64, got_ms: u64 },
}

/// Hydration did not produce a usable state; the live state is untouched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("hydration failed: {reason} (attempted {attempted}, loaded {loaded}, skipped {skipped})")]
pub struct HydrationFailure {
    pub attempted: usize,
    pub loaded: usize,
    pub skipped: usize,
    pub reason: String,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FermentError {
    #[error("invalid sample: {0}")]
    InvalidSample(#[from] InvalidSample),
    #[error(transparent)]
    Hydration(#[from] HydrationFailure),
    #[error("actuation failed: {0}")]
    Actuation(String),
    #[error("actuator timeout")]
    Timeout,
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid state: {0}")]
    State(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("unknown batch: {0}")]
    UnknownBatch(String),
    #[error("batch already registered: {0}")]
    DuplicateBatch(String),
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
