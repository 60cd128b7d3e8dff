use std::time::{Duration, Instant};

use moka::sync::Cache;
use moka::Expiry;

use crate::Result;

/// String key/value cache with per-entry expiry.
pub trait CacheBackend: Send + Sync {
    /// Connectivity probe.
    fn ping(&self) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()>;
    /// Keys currently stored under `prefix`.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;
    /// Returns how many of `keys` were present.
    fn delete(&self, keys: &[String]) -> Result<usize>;
}

#[derive(Clone)]
struct Entry {
    payload: String,
    ttl: Duration,
}

struct EntryTtl;

impl Expiry<String, Entry> for EntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process backend.
#[derive(Clone)]
pub struct MokaBackend {
    entries: Cache<String, Entry>,
}

impl MokaBackend {
    pub fn new(max_entries: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(EntryTtl)
            .build();
        Self { entries }
    }
}

impl CacheBackend for MokaBackend {
    fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|e| e.payload))
    }

    fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.entries.insert(key.to_string(), Entry { payload: value, ttl });
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| String::clone(&k))
            .collect())
    }

    fn delete(&self, keys: &[String]) -> Result<usize> {
        let mut removed = 0;
        for key in keys {
            if self.entries.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
