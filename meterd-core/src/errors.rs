//! Error types for the metering service

use thiserror::Error;

/// Main error type for metering operations
#[derive(Error, Debug)]
pub enum MeterError {
    /// Input validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Authentication errors
    #[error("Authentication error: {0}")]
    Authentication(#[from] AuthError),

    /// Counter cache errors
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Event ingestion / query errors
    #[error("Event error: {0}")]
    Event(#[from] EventError),

    /// Aggregation errors
    #[error("Aggregation error: {0}")]
    Aggregation(#[from] AggregationError),

    /// Quota evaluation errors
    #[error("Quota error: {0}")]
    Quota(#[from] QuotaError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic errors
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Input validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Quantity must be strictly positive
    #[error("quantity must be positive, got {quantity}")]
    NonPositiveQuantity { quantity: i64 },

    /// A required string field is empty or too long
    #[error("field '{field}' must be 1..=255 characters, got {length}")]
    FieldLength { field: &'static str, length: usize },

    /// Unrecognized period label
    #[error("unknown period '{value}'")]
    UnknownPeriod { value: String },

    /// Aggregation is not computed for this period
    #[error("window type '{value}' is not aggregated")]
    UnsupportedWindowType { value: String },

    /// Batch size outside the accepted range
    #[error("batch must contain 1..=1000 events, got {size}")]
    BatchSize { size: usize },

    /// Alert threshold outside `[0, 100]`
    #[error("alert_threshold must be 0..=100, got {value}")]
    AlertThreshold { value: i32 },

    /// Quota limit must be strictly positive
    #[error("limit_value must be positive, got {value}")]
    NonPositiveLimit { value: i64 },

    /// Pagination parameter outside the accepted range
    #[error("invalid pagination: {message}")]
    Pagination { message: String },
}

/// Authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    /// No API key presented
    #[error("API key is required")]
    MissingKey,

    /// Key unknown, inactive or expired
    #[error("Invalid API key")]
    InvalidKey,

    /// Credential lookup failed
    #[error("credential lookup failed: {message}")]
    LookupFailed { message: String },
}

/// Counter cache errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// Connection to the cache engine failed
    #[error("cache connection failed: {message}")]
    Connection { message: String },

    /// A cache command failed
    #[error("cache command failed: {message}")]
    Command { message: String },

    /// A cached payload could not be decoded
    #[error("malformed cache payload for key '{key}'")]
    MalformedPayload { key: String },
}

/// Event ingestion / query errors
#[derive(Error, Debug)]
pub enum EventError {
    /// Durable insert failed; ingest is reported as failed
    #[error("event store write failed: {message}")]
    StoreFailed { message: String },

    /// Event query failed
    #[error("event query failed: {message}")]
    QueryFailed { message: String },
}

/// Aggregation errors
#[derive(Error, Debug)]
pub enum AggregationError {
    /// Rollup computation failed
    #[error("aggregation failed: {message}")]
    ComputeFailed { message: String },

    /// Rollup query failed
    #[error("aggregate query failed: {message}")]
    QueryFailed { message: String },
}

/// Quota evaluation errors
#[derive(Error, Debug)]
pub enum QuotaError {
    /// Quota configuration lookup failed
    #[error("quota lookup failed: {message}")]
    LookupFailed { message: String },

    /// Usage computation failed on both the hot and cold paths
    #[error("usage lookup failed: {message}")]
    UsageFailed { message: String },
}

/// Result type alias for metering operations
pub type MeterResult<T> = Result<T, MeterError>;

/// Result type alias for validation
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Result type alias for event operations
pub type EventResult<T> = Result<T, EventError>;

/// Result type alias for aggregation operations
pub type AggregationResult<T> = Result<T, AggregationError>;

/// Result type alias for quota operations
pub type QuotaResult<T> = Result<T, QuotaError>;

/// Result type alias for authentication
pub type AuthResult<T> = Result<T, AuthError>;
