use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::keys::{datasets_list_key, RowsPageKey, DATASETS_LIST_PREFIX};
use crate::{CacheBackend, CacheError, Result};

/// A cached page: rendered items plus the total of the underlying scope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedPage {
    pub items: Vec<Value>,
    pub total: u64,
}

/// Cache operations as seen by the read path.
///
/// Failures never reach the caller: a failed `get` is a miss, a failed `set`
/// returns `false` and a failed invalidation removes nothing.
pub trait PageCache: Send + Sync {
    fn is_enabled(&self) -> bool;

    fn get_rows_page(&self, key: &RowsPageKey) -> Option<CachedPage>;
    fn set_rows_page(&self, key: &RowsPageKey, page: &CachedPage) -> bool;

    fn get_datasets_list(&self, page: usize, page_size: usize, search: Option<&str>)
        -> Option<CachedPage>;
    fn set_datasets_list(
        &self,
        page: usize,
        page_size: usize,
        search: Option<&str>,
        listing: &CachedPage,
    ) -> bool;

    /// Drops every row page of a dataset.
    fn invalidate_dataset(&self, dataset_id: &Uuid) -> usize;
    /// Drops every dataset listing.
    fn invalidate_datasets_list(&self) -> usize;

    fn invalidate_all_for_dataset(&self, dataset_id: &Uuid) -> usize {
        self.invalidate_dataset(dataset_id) + self.invalidate_datasets_list()
    }
}

/// Null object used when no backend is reachable.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledCache;

impl PageCache for DisabledCache {
    fn is_enabled(&self) -> bool {
        false
    }

    fn get_rows_page(&self, _key: &RowsPageKey) -> Option<CachedPage> {
        None
    }

    fn set_rows_page(&self, _key: &RowsPageKey, _page: &CachedPage) -> bool {
        false
    }

    fn get_datasets_list(&self, _page: usize, _page_size: usize, _search: Option<&str>) -> Option<CachedPage> {
        None
    }

    fn set_datasets_list(
        &self,
        _page: usize,
        _page_size: usize,
        _search: Option<&str>,
        _listing: &CachedPage,
    ) -> bool {
        false
    }

    fn invalidate_dataset(&self, _dataset_id: &Uuid) -> usize {
        0
    }

    fn invalidate_datasets_list(&self) -> usize {
        0
    }
}

pub struct BackendCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl BackendCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    fn read(&self, key: &str) -> Result<Option<CachedPage>> {
        match self.backend.get(key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| CacheError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    fn write(&self, key: &str, page: &CachedPage) -> Result<()> {
        let raw = serde_json::to_string(page).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.backend.set_ex(key, raw, self.ttl)
    }

    fn purge(&self, prefix: &str) -> Result<usize> {
        let keys = self.backend.scan_prefix(prefix)?;
        if keys.is_empty() {
            return Ok(0);
        }
        self.backend.delete(&keys)
    }

    fn get_logged(&self, key: &str) -> Option<CachedPage> {
        match self.read(key) {
            Ok(Some(page)) => {
                debug!(key, "cache: hit");
                Some(page)
            }
            Ok(None) => {
                debug!(key, "cache: miss");
                None
            }
            Err(e) => {
                warn!(key, error = %e, "cache: get failed");
                None
            }
        }
    }

    fn set_logged(&self, key: &str, page: &CachedPage) -> bool {
        match self.write(key, page) {
            Ok(()) => true,
            Err(e) => {
                warn!(key, error = %e, "cache: set failed");
                false
            }
        }
    }
}

impl PageCache for BackendCache {
    fn is_enabled(&self) -> bool {
        true
    }

    fn get_rows_page(&self, key: &RowsPageKey) -> Option<CachedPage> {
        self.get_logged(&key.to_string())
    }

    fn set_rows_page(&self, key: &RowsPageKey, page: &CachedPage) -> bool {
        self.set_logged(&key.to_string(), page)
    }

    fn get_datasets_list(&self, page: usize, page_size: usize, search: Option<&str>) -> Option<CachedPage> {
        self.get_logged(&datasets_list_key(page, page_size, search))
    }

    fn set_datasets_list(
        &self,
        page: usize,
        page_size: usize,
        search: Option<&str>,
        listing: &CachedPage,
    ) -> bool {
        self.set_logged(&datasets_list_key(page, page_size, search), listing)
    }

    fn invalidate_dataset(&self, dataset_id: &Uuid) -> usize {
        match self.purge(&RowsPageKey::dataset_prefix(dataset_id)) {
            Ok(n) => {
                info!(dataset_id = %dataset_id, entries = n, "cache: dataset pages invalidated");
                n
            }
            Err(e) => {
                warn!(dataset_id = %dataset_id, error = %e, "cache: dataset invalidation failed");
                0
            }
        }
    }

    fn invalidate_datasets_list(&self) -> usize {
        match self.purge(DATASETS_LIST_PREFIX) {
            Ok(n) => {
                debug!(entries = n, "cache: dataset listings invalidated");
                n
            }
            Err(e) => {
                warn!(error = %e, "cache: listing invalidation failed");
                0
            }
        }
    }
}

/// Probes `backend` once. An unreachable backend yields the disabled cache
/// for the life of the process.
pub fn connect(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Arc<dyn PageCache> {
    match backend.ping() {
        Ok(()) => {
            info!(ttl_secs = ttl.as_secs(), "cache: connected");
            Arc::new(BackendCache::new(backend, ttl))
        }
        Err(e) => {
            warn!(error = %e, "cache: backend unavailable, pagination cache disabled");
            Arc::new(DisabledCache)
        }
    }
}
