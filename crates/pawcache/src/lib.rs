//! # pawcache
//!
//! Client-side cache for the VentasPet storefront.
//!
//! ## Architecture
//! - **Namespaces**: api, user, temp, images and config partitions of one keyspace
//! - **Entries**: JSON payload plus write time, TTL and cache version
//! - **Budget**: one global size budget, enforced oldest-write-first
//! - **Maintenance**: periodic sweep and storage-pressure cleanup on tokio
//!
//! Storage failures never reach the caller: reads degrade to misses and
//! writes report `false`.

#![warn(missing_docs)]

mod clock;
mod config;
mod entry;
mod error;
mod eviction;
mod maintenance;
mod namespace;
mod stats;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, ConfigError, MaintenanceConfig};
pub use entry::{json_size, CacheEntry};
pub use error::CacheError;
pub use maintenance::{spawn_maintenance, MaintenanceHandle};
pub use namespace::{Expiry, Namespace, NamespacePrefixes};
pub use stats::{format_bytes, CacheStats, CacheStatsSnapshot};
pub use store::{api_key, ApiRecord, CacheStore, SweepReport};

pub use pawstore::{FileStorage, MemoryStorage, Storage, StorageEstimate};
