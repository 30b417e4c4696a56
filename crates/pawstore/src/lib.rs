//! # pawstore
//!
//! Durable string key/value storage for the VentasPet client cache.
//!
//! ## Backends
//! - **MemoryStorage**: in-process map, for session-scoped data and tests
//! - **FileStorage**: append-only log replayed on open, compacted on close
//!
//! Both share the [`Storage`] trait and an optional byte quota, mirroring the
//! quota behavior of browser key/value storage.

#![warn(missing_docs)]

mod error;
mod file;
mod parser;
mod storage;

pub use error::{Error, Result};
pub use file::FileStorage;
pub use storage::{MemoryStorage, Storage, StorageEstimate};
