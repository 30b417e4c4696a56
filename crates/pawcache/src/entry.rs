//! Persisted cache entry format

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CacheError;

/// One cache record as stored in the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cached payload
    pub data: Value,
    /// Write time, milliseconds since the Unix epoch
    pub timestamp: u64,
    /// Lifetime in milliseconds; `None` never expires
    pub ttl: Option<u64>,
    /// Cache format version the entry was written with
    pub version: String,
    /// Approximate payload size (UTF-16 code units of its JSON)
    pub size: u64,
}

impl CacheEntry {
    /// Build an entry for `data`, computing its size
    pub fn new(data: Value, timestamp: u64, ttl: Option<u64>, version: &str) -> Result<Self, CacheError> {
        let size = json_size(&data)?;
        Ok(Self {
            data,
            timestamp,
            ttl,
            version: version.to_string(),
            size,
        })
    }

    /// Decode a raw backend record
    pub fn decode(raw: &str) -> Result<Self, CacheError> {
        serde_json::from_str(raw).map_err(|e| CacheError::Corrupted(e.to_string()))
    }

    /// Encode for the backend
    pub fn encode(&self) -> Result<String, CacheError> {
        Ok(serde_json::to_string(self)?)
    }

    /// TTL has elapsed at `now`; a zero TTL is expired immediately
    pub fn is_expired(&self, now: u64) -> bool {
        match self.ttl {
            None => false,
            Some(ttl) => now.saturating_sub(self.timestamp) >= ttl,
        }
    }

    /// Entry may be served: current version and not expired
    pub fn is_live(&self, now: u64, version: &str) -> bool {
        self.version == version && !self.is_expired(now)
    }

    /// Milliseconds since the entry was written
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.timestamp)
    }
}

/// Serialized length of `value` in UTF-16 code units
pub fn json_size(value: &Value) -> Result<u64, CacheError> {
    let json = serde_json::to_string(value)?;
    Ok(json.encode_utf16().count() as u64)
}
