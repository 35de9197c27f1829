//! Error types for the auto-responder.

use std::time::Duration;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Generation error: {0}")]
    Generate(#[from] GenerateError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Durable list/map store errors.
///
/// Covers both an unreachable store and a store returning data the caller
/// cannot decode.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Store request failed: {0}")]
    Request(String),

    #[error("Store returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Store returned malformed data: {0}")]
    Malformed(String),
}

/// Reply generation errors.
///
/// `Unconfigured` is an expected outcome, not a fault: the composer falls
/// back to the deterministic template whenever it sees any of these.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("No generation backend configured")]
    Unconfigured,

    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} returned an empty reply")]
    EmptyResponse { provider: String },
}

/// Outbound mail errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Send rejected: {0}")]
    Rejected(String),
}

/// Worker drain errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Drain throttled: last run finished {since_last:?} ago")]
    Throttled { since_last: Duration },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
