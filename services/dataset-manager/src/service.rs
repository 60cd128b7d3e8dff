use std::time::Duration;

use bytes::Bytes;
use catalog::{Batch, Column, Dataset, DatasetUpdate, NewDataset, SchemaVersion};
use masking::MaskRule;
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::coordinator::{IngestCoordinator, IngestOutcome, IngestRequest};
use crate::error::Result;
use crate::exec::run_blocking;
use crate::export::ExportFormat;
use crate::reader::{DatasetPage, DatasetReader, RowsPage, RowsQuery};
use crate::state::{DatasetLocks, Stores};

/// Async entry point. Store calls run on the blocking pool under the
/// configured timeout; writes to one dataset are serialized.
#[derive(Clone)]
pub struct DatasetService {
    coordinator: IngestCoordinator,
    reader: DatasetReader,
    locks: DatasetLocks,
    timeout: Duration,
}

impl DatasetService {
    pub fn new(stores: Stores, cfg: &ServiceConfig) -> Self {
        Self {
            coordinator: IngestCoordinator::new(stores.clone()),
            reader: DatasetReader::new(stores),
            locks: DatasetLocks::new(),
            timeout: cfg.call_timeout,
        }
    }

    pub fn in_memory(cfg: &ServiceConfig) -> Self {
        Self::new(Stores::in_memory(cfg), cfg)
    }

    pub fn coordinator(&self) -> &IngestCoordinator {
        &self.coordinator
    }

    pub fn reader(&self) -> &DatasetReader {
        &self.reader
    }

    /// Runs `f` holding the dataset's write lock. The lock is released when
    /// the call finishes, even if the caller already gave up on it.
    async fn write<R, F>(&self, dataset_id: Uuid, op: &str, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&IngestCoordinator) -> Result<R> + Send + 'static,
    {
        let guard = self.locks.acquire(dataset_id).await;
        let coordinator = self.coordinator.clone();
        run_blocking(format!("{op} dataset {dataset_id}"), self.timeout, move || {
            let _guard = guard;
            f(&coordinator)
        })
        .await
    }

    async fn read<R, F>(&self, op: String, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&DatasetReader) -> Result<R> + Send + 'static,
    {
        let reader = self.reader.clone();
        run_blocking(op, self.timeout, move || f(&reader)).await
    }

    pub async fn create_dataset(&self, new: NewDataset) -> Result<Dataset> {
        let coordinator = self.coordinator.clone();
        run_blocking("create dataset".into(), self.timeout, move || {
            coordinator.create_dataset(new)
        })
        .await
    }

    pub async fn update_dataset(&self, dataset_id: Uuid, update: DatasetUpdate) -> Result<Dataset> {
        self.write(dataset_id, "update", move |c| c.update_dataset(&dataset_id, update))
            .await
    }

    pub async fn delete_dataset(&self, dataset_id: Uuid) -> Result<bool> {
        let deleted = self
            .write(dataset_id, "delete", move |c| c.delete_dataset(&dataset_id))
            .await?;
        if deleted {
            self.locks.forget(&dataset_id).await;
        }
        Ok(deleted)
    }

    pub async fn ingest(&self, dataset_id: Uuid, req: IngestRequest) -> Result<IngestOutcome> {
        self.write(dataset_id, "ingest", move |c| c.ingest(&dataset_id, req))
            .await
    }

    pub async fn update_masking_rule(
        &self,
        dataset_id: Uuid,
        column: String,
        rule: Option<MaskRule>,
    ) -> Result<Dataset> {
        self.write(dataset_id, "mask", move |c| {
            c.update_masking_rule(&dataset_id, &column, rule)
        })
        .await
    }

    pub async fn drop_column(&self, dataset_id: Uuid, column: String) -> Result<u32> {
        self.write(dataset_id, "drop column", move |c| c.drop_column(&dataset_id, &column))
            .await
    }

    pub async fn delete_batch(&self, dataset_id: Uuid, batch_id: Uuid) -> Result<Option<Batch>> {
        self.write(dataset_id, "delete batch", move |c| {
            c.delete_batch(&dataset_id, &batch_id)
        })
        .await
    }

    pub async fn get_dataset(&self, dataset_id: Uuid) -> Result<Dataset> {
        self.read(format!("get dataset {dataset_id}"), move |r| r.get_dataset(&dataset_id))
            .await
    }

    pub async fn list_datasets(
        &self,
        page: usize,
        page_size: usize,
        search: Option<String>,
    ) -> Result<DatasetPage> {
        self.read("list datasets".into(), move |r| {
            r.list_datasets(page, page_size, search.as_deref())
        })
        .await
    }

    pub async fn get_rows(&self, dataset_id: Uuid, query: RowsQuery) -> Result<RowsPage> {
        self.read(format!("rows dataset {dataset_id}"), move |r| {
            r.get_rows(&dataset_id, &query)
        })
        .await
    }

    pub async fn export(
        &self,
        dataset_id: Uuid,
        format: ExportFormat,
        role: String,
        batch_id: Option<Uuid>,
    ) -> Result<Bytes> {
        self.read(format!("export dataset {dataset_id}"), move |r| {
            r.export(&dataset_id, format, &role, batch_id)
        })
        .await
    }

    pub async fn get_schema(&self, dataset_id: Uuid, include_inactive: bool) -> Result<Vec<Column>> {
        self.read(format!("schema dataset {dataset_id}"), move |r| {
            r.get_schema(&dataset_id, include_inactive)
        })
        .await
    }

    pub async fn get_schema_history(&self, dataset_id: Uuid) -> Result<Vec<SchemaVersion>> {
        self.read(format!("schema history dataset {dataset_id}"), move |r| {
            r.get_schema_history(&dataset_id)
        })
        .await
    }

    pub async fn list_batches(
        &self,
        dataset_id: Uuid,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<Batch>, u64)> {
        self.read(format!("batches dataset {dataset_id}"), move |r| {
            r.list_batches(&dataset_id, page, page_size)
        })
        .await
    }

    pub async fn get_batch(&self, dataset_id: Uuid, batch_id: Uuid) -> Result<Batch> {
        self.read(format!("batch {batch_id} dataset {dataset_id}"), move |r| {
            r.get_batch(&dataset_id, &batch_id)
        })
        .await
    }
}
