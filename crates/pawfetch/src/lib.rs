//! # pawfetch
//!
//! Request shaping for the VentasPet storefront.
//!
//! ## Features
//! - **Read-through cache**: responses cached in `pawcache` with per-category TTLs
//! - **Retry**: exponential backoff for network errors and retryable statuses
//! - **Batching**: calls to one endpoint group merged into a single request
//! - **Debounce / throttle**: coalescing wrappers for UI-triggered work
//! - **Queue**: FIFO admission with a concurrency limit
//!
//! Concurrent misses for the same key are not deduplicated; each one
//! reaches the transport.

#![warn(missing_docs)]

mod config;
mod error;
mod metrics;
mod optimizer;
mod queue;
mod transport;

#[cfg(test)]
mod testing;

pub use config::{
    BatchConfig, CacheTtl, ConfigError, DebounceDelays, OptimizerConfig, RetryConfig,
    ThrottleDelays,
};
pub use error::{ErrorKind, RequestError};
pub use metrics::{OptimizerStats, RequestMetrics};
pub use optimizer::{batch_group, cache_key, Debounced, RequestOptimizer, Throttled};
pub use queue::{Queued, RequestQueue};
pub use transport::{ApiResponse, HttpTransport, RequestOptions, Transport};
