//! Client-side error types
//!
//! A metering failure must never break the instrumented application; these
//! errors surface only through the synchronous transport and the library's
//! own logs.

use thiserror::Error;

/// Errors raised by the metering client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The metering API rejected or never received the request, with
    /// retries (where applicable) already exhausted.
    #[error("metering API call failed: {message}")]
    Api { message: String },

    /// The local buffer is at capacity; the event was dropped.
    #[error("event queue is full ({capacity} events)")]
    QueueFull { capacity: usize },

    /// The client was misconfigured.
    #[error("invalid metering client configuration: {message}")]
    Config { message: String },
}

/// Result alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
