//! CacheStore: namespaced TTL cache over a pawstore backend

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pawstore::{Storage, StorageEstimate};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{CacheConfig, ConfigError};
use crate::entry::CacheEntry;
use crate::error::CacheError;
use crate::eviction::{select_victims, Candidate};
use crate::namespace::{saturating_millis, Expiry, Namespace};
use crate::stats::{format_bytes, CacheStats, CacheStatsSnapshot};

/// Outcome of a sweep, eviction or cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Entries removed
    pub count: usize,
    /// Accounted bytes released
    pub bytes_freed: u64,
}

/// Wrapped API response stored in the `api` namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRecord {
    /// Endpoint the response came from
    pub endpoint: String,
    /// Response payload
    pub data: Value,
    /// Write time, milliseconds since the Unix epoch
    pub cached_at: u64,
}

/// Normalize an endpoint into an `api` namespace key
///
/// Every character outside `[A-Za-z0-9_]` becomes `_`; the rest is lowercased.
pub fn api_key(endpoint: &str) -> String {
    endpoint
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Durable, namespaced, TTL-aware cache with a global size budget
///
/// No public method returns an error or panics on storage trouble: failures
/// are logged, counted in [`CacheStatsSnapshot::errors`], and surface as a
/// miss, `false`, or an empty report.
pub struct CacheStore {
    /// Backing key/value storage
    storage: Arc<dyn Storage>,

    /// Validated configuration
    config: CacheConfig,

    /// Time source for entry timestamps
    clock: Arc<dyn Clock>,

    /// Hit/miss counters and size accounting
    stats: CacheStats,

    /// Held across read-modify-write sequences so accounting stays exact
    write_lock: Mutex<()>,
}

impl CacheStore {
    /// Open a cache over `storage` using the system clock
    ///
    /// Expired entries are swept and the size accounting rebuilt before
    /// the store is returned.
    pub fn new(storage: Arc<dyn Storage>, config: CacheConfig) -> Result<Self, ConfigError> {
        Self::with_clock(storage, config, Arc::new(SystemClock))
    }

    /// Open a cache with an explicit time source
    pub fn with_clock(
        storage: Arc<dyn Storage>,
        config: CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let store = Self {
            storage,
            config,
            clock,
            stats: CacheStats::new(),
            write_lock: Mutex::new(()),
        };

        store.sweep_expired();
        store.recount_size();
        Ok(store)
    }

    /// Read a live value
    ///
    /// Dead entries (expired or written under another cache version) are
    /// removed and reported as absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str, namespace: Namespace) -> Option<T> {
        let full_key = self.full_key(key, namespace);
        match self.try_get(&full_key) {
            Ok(value) => value,
            Err(e) => {
                warn!("Error reading cache {}: {}", full_key, e);
                self.stats.record_error();
                None
            }
        }
    }

    /// Store a value, evicting the oldest entries if the budget would be exceeded
    ///
    /// Returns `false` if the value cannot be serialized or the backend
    /// rejects the write.
    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        expiry: Expiry,
        namespace: Namespace,
    ) -> bool {
        let full_key = self.full_key(key, namespace);
        match self.try_set(&full_key, value, expiry) {
            Ok(entry) => {
                debug!(
                    "Cache stored: {} ({}, TTL: {})",
                    full_key,
                    format_bytes(entry.size),
                    entry
                        .ttl
                        .map(|ms| format!("{}ms", ms))
                        .unwrap_or_else(|| "none".to_string())
                );
                true
            }
            Err(e) => {
                warn!("Error storing cache {}: {}", full_key, e);
                self.stats.record_error();
                false
            }
        }
    }

    /// Remove a value; removing a missing key succeeds
    pub fn remove(&self, key: &str, namespace: Namespace) -> bool {
        let full_key = self.full_key(key, namespace);
        let _guard = self.write_lock.lock();
        match self.remove_locked(&full_key) {
            Ok(_) => true,
            Err(e) => {
                warn!("Error removing cache {}: {}", full_key, e);
                self.stats.record_error();
                false
            }
        }
    }

    /// Purge expired, version-mismatched and corrupted entries
    pub fn sweep_expired(&self) -> SweepReport {
        let _guard = self.write_lock.lock();
        let report = self.sweep_locked();
        if report.count > 0 {
            info!(
                "Cache swept: {} entries, {} freed",
                report.count,
                format_bytes(report.bytes_freed)
            );
        }
        report
    }

    /// Remove entries oldest-write-first until `required_bytes` fit in the budget
    ///
    /// Ends with at least `required_bytes` free or with no entries left.
    pub fn evict_until_fit(&self, required_bytes: u64) -> SweepReport {
        let _guard = self.write_lock.lock();
        self.evict_locked(required_bytes)
    }

    /// Remove every entry written more than `max_age` ago, regardless of TTL
    pub fn aggressive_cleanup(&self, max_age: Duration) -> SweepReport {
        let cutoff = self
            .now_millis()
            .saturating_sub(saturating_millis(max_age));

        let _guard = self.write_lock.lock();
        let report = self
            .purge_locked(|entry| entry.timestamp < cutoff)
            .unwrap_or_else(|e| {
                warn!("Aggressive cleanup failed: {}", e);
                self.stats.record_error();
                SweepReport::default()
            });
        info!("Aggressive cleanup removed {} entries", report.count);
        report
    }

    /// Compare backend usage against its quota, cleaning up past the threshold
    ///
    /// Returns the estimate, or `None` when the backend has no quota.
    pub fn check_storage_usage(&self) -> Option<StorageEstimate> {
        let estimate = self.storage.estimate()?;
        let percent = estimate.usage_percent();

        debug!(
            "Storage: {} / {} ({:.1}%)",
            format_bytes(estimate.usage),
            format_bytes(estimate.quota),
            percent
        );

        if percent > self.config.usage_threshold_percent {
            warn!("Storage almost full ({:.1}%), cleaning cache", percent);
            self.aggressive_cleanup(self.config.aggressive_cleanup_age());
        }

        Some(estimate)
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStatsSnapshot {
        let total_keys = self.cache_keys().map(|keys| keys.len()).unwrap_or(0);
        self.stats.snapshot(total_keys)
    }

    /// Remove every namespaced key and reset statistics
    ///
    /// Keys outside the configured prefixes are left alone.
    pub fn clear_all(&self) -> usize {
        let _guard = self.write_lock.lock();
        let mut removed = 0;

        match self.cache_keys() {
            Ok(keys) => {
                for key in keys {
                    match self.storage.remove_item(&key) {
                        Ok(()) => removed += 1,
                        Err(e) => warn!("Error removing cache {}: {}", key, e),
                    }
                }
            }
            Err(e) => warn!("Error listing cache keys: {}", e),
        }

        self.stats.reset();
        info!("Cache cleared: {} entries", removed);
        removed
    }

    /// Dump every namespaced record; undecodable ones appear as `"CORRUPTED"`
    pub fn export(&self) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        let keys = match self.cache_keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Error listing cache keys: {}", e);
                return out;
            }
        };

        for key in keys {
            let value = match self.storage.get_item(&key) {
                Ok(Some(raw)) => serde_json::from_str(&raw)
                    .unwrap_or_else(|_| Value::String("CORRUPTED".to_string())),
                Ok(None) => continue,
                Err(_) => Value::String("CORRUPTED".to_string()),
            };
            out.insert(key, value);
        }
        out
    }

    /// Cache an API response under its normalized endpoint key
    pub fn cache_api_response<T: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        data: &T,
        expiry: Expiry,
    ) -> bool {
        let data = match serde_json::to_value(data) {
            Ok(data) => data,
            Err(e) => {
                warn!("Error serializing API response for {}: {}", endpoint, e);
                self.stats.record_error();
                return false;
            }
        };

        let record = ApiRecord {
            endpoint: endpoint.to_string(),
            data,
            cached_at: self.now_millis(),
        };
        self.set(&api_key(endpoint), &record, expiry, Namespace::Api)
    }

    /// Cached API record for `endpoint`, with its write time
    pub fn cached_api_record(&self, endpoint: &str) -> Option<ApiRecord> {
        let record = self.get::<ApiRecord>(&api_key(endpoint), Namespace::Api);
        if record.is_some() {
            debug!("API cache hit: {}", endpoint);
        } else {
            debug!("API cache miss: {}", endpoint);
        }
        record
    }

    /// Cached API payload for `endpoint`
    pub fn cached_api_response<T: DeserializeOwned>(&self, endpoint: &str) -> Option<T> {
        self.cached_api_record(endpoint)
            .and_then(|record| serde_json::from_value(record.data).ok())
    }

    /// Store scratch data; `None` uses the default TTL
    pub fn set_temp<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        self.set(key, value, Expiry::from(ttl), Namespace::Temp)
    }

    /// Read scratch data
    pub fn get_temp<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key, Namespace::Temp)
    }

    /// Store application configuration; it never expires
    pub fn set_app_config<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        self.set(key, value, Expiry::Never, Namespace::Config)
    }

    /// Read application configuration
    pub fn get_app_config<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key, Namespace::Config)
    }

    /// Store user data; it never expires
    pub fn set_user_data<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        self.set(key, value, Expiry::Never, Namespace::User)
    }

    /// Read user data
    pub fn get_user_data<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key, Namespace::User)
    }

    /// Current time according to the store's clock
    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Get current configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Backing storage
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    fn full_key(&self, key: &str, namespace: Namespace) -> String {
        format!("{}{}", self.config.prefixes.get(namespace), key)
    }

    fn is_live(&self, entry: &CacheEntry) -> bool {
        entry.is_live(self.now_millis(), &self.config.cache_version)
    }

    fn cache_keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self
            .storage
            .keys()?
            .into_iter()
            .filter(|key| self.config.prefixes.owns(key))
            .collect())
    }

    fn try_get<T: DeserializeOwned>(&self, full_key: &str) -> Result<Option<T>, CacheError> {
        let Some(raw) = self.storage.get_item(full_key)? else {
            self.stats.record_miss();
            return Ok(None);
        };

        let mut entry = CacheEntry::decode(&raw)?;
        if !self.is_live(&entry) {
            let _guard = self.write_lock.lock();

            // A writer may have replaced the record since it was read
            let current = match self.storage.get_item(full_key)? {
                Some(raw) => CacheEntry::decode(&raw)?,
                None => {
                    self.stats.record_expired();
                    return Ok(None);
                }
            };
            if !self.is_live(&current) {
                self.stats.record_expired();
                self.remove_locked(full_key)?;
                return Ok(None);
            }
            entry = current;
        }

        let value = serde_json::from_value(entry.data)?;
        self.stats.record_hit();
        Ok(Some(value))
    }

    fn try_set<T: Serialize + ?Sized>(
        &self,
        full_key: &str,
        value: &T,
        expiry: Expiry,
    ) -> Result<CacheEntry, CacheError> {
        let data = serde_json::to_value(value)?;
        let ttl = expiry.resolve_millis(self.config.default_ttl());
        let entry = CacheEntry::new(data, self.now_millis(), ttl, &self.config.cache_version)?;
        let encoded = entry.encode()?;

        let _guard = self.write_lock.lock();

        // The previous value under this key no longer counts
        self.remove_locked(full_key)?;

        if self.stats.total_size() + entry.size > self.config.budget_bytes() {
            self.sweep_locked();
            self.evict_locked(entry.size);
        }

        self.storage.set_item(full_key, &encoded)?;
        self.stats.add_size(entry.size);
        Ok(entry)
    }

    /// Caller holds `write_lock`. Returns the accounted size released.
    fn remove_locked(&self, full_key: &str) -> Result<u64, CacheError> {
        let size = match self.storage.get_item(full_key)? {
            Some(raw) => CacheEntry::decode(&raw).map(|e| e.size).unwrap_or(0),
            None => return Ok(0),
        };

        self.storage.remove_item(full_key)?;
        self.stats.sub_size(size);
        Ok(size)
    }

    /// Caller holds `write_lock`
    fn sweep_locked(&self) -> SweepReport {
        let now = self.now_millis();
        let version = self.config.cache_version.clone();

        self.purge_locked(|entry| !entry.is_live(now, &version))
            .unwrap_or_else(|e| {
                warn!("Cache sweep failed: {}", e);
                self.stats.record_error();
                SweepReport::default()
            })
    }

    /// Caller holds `write_lock`. Removes corrupted entries and those matching `is_dead`.
    fn purge_locked<F>(&self, is_dead: F) -> Result<SweepReport, CacheError>
    where
        F: Fn(&CacheEntry) -> bool,
    {
        let mut report = SweepReport::default();

        for key in self.cache_keys()? {
            let Some(raw) = self.storage.get_item(&key)? else {
                continue;
            };

            let size = match CacheEntry::decode(&raw) {
                Ok(entry) if is_dead(&entry) => entry.size,
                Ok(_) => continue,
                Err(_) => {
                    debug!("Purging corrupted cache entry {}", key);
                    0
                }
            };

            self.storage.remove_item(&key)?;
            self.stats.sub_size(size);
            report.count += 1;
            report.bytes_freed += size;
        }

        Ok(report)
    }

    /// Caller holds `write_lock`
    fn evict_locked(&self, required_bytes: u64) -> SweepReport {
        let candidates = match self.candidates() {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Error listing eviction candidates: {}", e);
                self.stats.record_error();
                return SweepReport::default();
            }
        };

        let free = self
            .config
            .budget_bytes()
            .saturating_sub(self.stats.total_size());
        let mut report = SweepReport::default();

        for victim in select_victims(candidates, free, required_bytes) {
            match self.storage.remove_item(&victim.key) {
                Ok(()) => {
                    self.stats.sub_size(victim.size);
                    self.stats.record_eviction();
                    report.count += 1;
                    report.bytes_freed += victim.size;
                }
                Err(e) => {
                    warn!("Error evicting cache {}: {}", victim.key, e);
                    self.stats.record_error();
                }
            }
        }

        if report.count > 0 {
            info!(
                "Cache space freed: {} ({} entries)",
                format_bytes(report.bytes_freed),
                report.count
            );
        }
        report
    }

    fn candidates(&self) -> Result<Vec<Candidate>, CacheError> {
        let mut candidates = Vec::new();
        for key in self.cache_keys()? {
            let Some(raw) = self.storage.get_item(&key)? else {
                continue;
            };
            let (timestamp, size) = match CacheEntry::decode(&raw) {
                Ok(entry) => (Some(entry.timestamp), entry.size),
                Err(_) => (None, 0),
            };
            candidates.push(Candidate {
                key,
                timestamp,
                size,
            });
        }
        Ok(candidates)
    }

    fn recount_size(&self) {
        let _guard = self.write_lock.lock();
        let total = match self.candidates() {
            Ok(candidates) => candidates.iter().map(|c| c.size).sum(),
            Err(e) => {
                warn!("Error measuring cache size: {}", e);
                self.stats.record_error();
                0
            }
        };
        self.stats.set_size(total);
    }
}
