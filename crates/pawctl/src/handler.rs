//! Command handler for cache inspection and maintenance

use std::sync::Arc;

use anyhow::{bail, Result};
use pawcache::{format_bytes, CacheStore, Expiry, Namespace, SweepReport};
use serde_json::Value;

pub struct CommandHandler {
    store: Arc<CacheStore>,
}

impl CommandHandler {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self { store }
    }

    pub fn stats(&self, json: bool) -> Result<String> {
        let stats = self.store.stats();
        if json {
            return Ok(serde_json::to_string_pretty(&stats)?);
        }

        let mut out = format!(
            "# Cache\n\
             keys:{}\n\
             size:{}\n\
             budget:{}\n\
             hits:{}\n\
             misses:{}\n\
             expired:{}\n\
             evictions:{}\n\
             errors:{}\n\
             hit_rate:{:.2}%",
            stats.total_keys,
            format_bytes(stats.total_size_bytes),
            format_bytes(self.store.config().budget_bytes()),
            stats.hits,
            stats.misses,
            stats.expired,
            stats.evictions,
            stats.errors,
            stats.hit_rate_percent,
        );

        if let Some(estimate) = self.store.storage().estimate() {
            out.push_str(&format!(
                "\n# Storage\nusage:{}\nquota:{}\nused:{:.1}%",
                format_bytes(estimate.usage),
                format_bytes(estimate.quota),
                estimate.usage_percent()
            ));
        }

        Ok(out)
    }

    pub fn get(&self, namespace: Namespace, key: &str) -> Result<String> {
        match self.store.get::<Value>(key, namespace) {
            Some(value) => Ok(serde_json::to_string_pretty(&value)?),
            None => Ok("(nil)".to_string()),
        }
    }

    /// `raw` is stored as JSON when it parses, otherwise as a string
    pub fn set(&self, namespace: Namespace, key: &str, raw: &str, expiry: Expiry) -> Result<String> {
        let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));

        if !self.store.set(key, &value, expiry, namespace) {
            bail!("failed to store {}:{} (see log)", namespace, key);
        }
        Ok("OK".to_string())
    }

    pub fn remove(&self, namespace: Namespace, key: &str) -> Result<String> {
        if !self.store.remove(key, namespace) {
            bail!("failed to remove {}:{} (see log)", namespace, key);
        }
        Ok("OK".to_string())
    }

    pub fn sweep(&self) -> String {
        describe(self.store.sweep_expired())
    }

    pub fn evict(&self, bytes: u64) -> String {
        describe(self.store.evict_until_fit(bytes))
    }

    pub fn export(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.store.export())?)
    }

    pub fn clear(&self) -> String {
        format!("Removed {} entries", self.store.clear_all())
    }
}

fn describe(report: SweepReport) -> String {
    format!(
        "Removed {} entries ({})",
        report.count,
        format_bytes(report.bytes_freed)
    )
}
