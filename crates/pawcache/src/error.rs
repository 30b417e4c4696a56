//! Error types for cache operations
//!
//! These never leave the store's public methods; they are logged and
//! counted, and the caller sees a miss or `false`.

use thiserror::Error;

/// Cache system errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// Backend read or write failed
    #[error("storage error: {0}")]
    Storage(#[from] pawstore::Error),

    /// Payload could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored record is not a valid entry
    #[error("corrupted entry: {0}")]
    Corrupted(String),
}
