use std::{collections::HashMap, sync::Arc};

use catalog::{BatchRegistry, DatasetCatalog, SchemaStore};
use masking::MaskingEngine;
use pagecache::{MokaBackend, PageCache};
use rowstore::RowStore;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;
use widestore::{MemoryStore, Storage, TableStore};

use crate::config::ServiceConfig;

/// Every component the coordinator and the read path share.
#[derive(Clone)]
pub struct Stores {
    pub datasets: DatasetCatalog,
    pub schemas: SchemaStore,
    pub batches: BatchRegistry,
    pub rows: Arc<RowStore>,
    pub cache: Arc<dyn PageCache>,
    pub masking: MaskingEngine,
}

impl Stores {
    pub fn new(
        storage: Arc<dyn Storage>,
        tables: Arc<dyn TableStore>,
        cache: Arc<dyn PageCache>,
        cfg: &ServiceConfig,
    ) -> Self {
        let schemas = SchemaStore::new(storage.clone());
        Self {
            datasets: DatasetCatalog::new(storage.clone()),
            batches: BatchRegistry::new(storage, tables.clone()),
            rows: Arc::new(RowStore::new(tables, schemas.clone(), cfg.row_store())),
            schemas,
            cache,
            masking: MaskingEngine::new(cfg.unmask_roles.clone()),
        }
    }

    /// Memory-backed store with the in-process cache backend.
    pub fn in_memory(cfg: &ServiceConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let cache = pagecache::connect(
            Arc::new(MokaBackend::new(cfg.cache_max_entries)),
            cfg.cache_ttl,
        );
        Self::new(store.clone(), store, cache, cfg)
    }
}

/// One writer at a time per dataset.
#[derive(Clone, Default)]
pub struct DatasetLocks {
    locks: Arc<RwLock<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl DatasetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, dataset_id: Uuid) -> OwnedMutexGuard<()> {
        let existing = self.locks.read().await.get(&dataset_id).cloned();
        let lock = match existing {
            Some(lock) => lock,
            None => self
                .locks
                .write()
                .await
                .entry(dataset_id)
                .or_default()
                .clone(),
        };
        lock.lock_owned().await
    }

    /// Drops the lock of a deleted dataset. Holders keep their guard.
    pub async fn forget(&self, dataset_id: &Uuid) {
        self.locks.write().await.remove(dataset_id);
    }

    pub async fn len(&self) -> usize {
        self.locks.read().await.len()
    }
}
