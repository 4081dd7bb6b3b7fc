//! Error taxonomy for the coordination components.
//!
//! Port-level errors (`StoreError`, `CacheError`, `QueueError`) describe what
//! went wrong talking to a backend. `CityError` is what callers of the cache
//! layer, dispatcher and HTTP API see.

use thiserror::Error;

/// Durable state store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Serialisation error: {0}")]
    Serialisation(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Cache backend failure. Never fatal for a read.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Broker failure.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Acknowledgement failed: {0}")]
    Ack(String),

    #[error("Queue closed")]
    Closed,

    #[error("Serialisation error: {0}")]
    Serialisation(String),
}

/// Errors surfaced by the cache-aside layer, the dispatcher and the API.
#[derive(Debug, Error)]
pub enum CityError {
    /// Entity or sub-entity absent. Client error, never retried.
    #[error("not found: {0}")]
    NotFound(String),

    /// Command action outside the registered set for its target.
    #[error("invalid action: {0}")]
    InvalidAction(String),

    /// Record rejected by creation-time validation.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Durable store, cache or broker failed or timed out.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Envelope or entity could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CityError {
    /// Client errors are the caller's fault and must not be retried.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CityError::NotFound(_) | CityError::InvalidAction(_) | CityError::InvalidRecord(_)
        )
    }
}

impl From<StoreError> for CityError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Serialisation(msg) => CityError::Serialization(msg),
            other => CityError::UpstreamUnavailable(other.to_string()),
        }
    }
}

impl From<QueueError> for CityError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Serialisation(msg) => CityError::Serialization(msg),
            other => CityError::UpstreamUnavailable(other.to_string()),
        }
    }
}
