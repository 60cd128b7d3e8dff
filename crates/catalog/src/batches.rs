use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;
use widestore::{PartitionKey, Storage, TableStore};

use crate::keys::{batch_key, batches_prefix, decode, encode};
use crate::naming::table_name;
use crate::{page_window, Batch, BatchStatus, CatalogError, NewBatch, Result};

/// Chunk ids `0..BATCH_DELETE_CHUNK_CEILING` are purged when a batch is
/// deleted. Rows of larger batches beyond the ceiling are not reclaimed.
pub const BATCH_DELETE_CHUNK_CEILING: u32 = 100;

/// Batch lifecycle records, ordered by batch date within a dataset.
#[derive(Clone)]
pub struct BatchRegistry {
    storage: Arc<dyn Storage>,
    tables: Arc<dyn TableStore>,
}

impl BatchRegistry {
    pub fn new(storage: Arc<dyn Storage>, tables: Arc<dyn TableStore>) -> Self {
        Self { storage, tables }
    }

    fn put(&self, batch: &Batch) -> Result<()> {
        let key = batch_key(&batch.dataset_id, &batch.batch_date, &batch.batch_id);
        self.storage.put(&key, &encode(batch)?)?;
        Ok(())
    }

    /// All batches of a dataset, oldest first.
    fn all(&self, dataset_id: &Uuid) -> Result<Vec<Batch>> {
        self.storage
            .scan_prefix(&batches_prefix(dataset_id))?
            .iter()
            .map(|(_, bytes)| decode::<Batch>(bytes))
            .collect()
    }

    pub fn create_batch(&self, dataset_id: &Uuid, new: NewBatch) -> Result<Batch> {
        let batch = Batch {
            dataset_id: *dataset_id,
            batch_id: Uuid::new_v4(),
            batch_date: new.batch_date,
            schema_version: None,
            row_count: 0,
            size_bytes: new.size_bytes,
            file_format: new.file_format,
            status: BatchStatus::Uploading,
            uploaded_by: new.uploaded_by,
            created_at: Utc::now(),
        };
        self.put(&batch)?;
        info!(
            dataset_id = %dataset_id,
            batch_id = %batch.batch_id,
            format = %batch.file_format,
            "batch: created"
        );
        Ok(batch)
    }

    /// Moves an uploading batch to `ready` or `failed`.
    pub fn update_batch_status(
        &self,
        dataset_id: &Uuid,
        batch_id: &Uuid,
        batch_date: &DateTime<Utc>,
        status: BatchStatus,
        row_count: u64,
        schema_version: Option<u32>,
    ) -> Result<Batch> {
        let key = batch_key(dataset_id, batch_date, batch_id);
        let mut batch: Batch = match self.storage.get(&key)? {
            Some(bytes) => decode(&bytes)?,
            None => return Err(CatalogError::not_found("batch", batch_id)),
        };

        if !batch.status.can_become(status) {
            return Err(CatalogError::InvalidTransition {
                batch_id: *batch_id,
                from: batch.status,
                to: status,
            });
        }

        batch.status = status;
        batch.row_count = row_count;
        if schema_version.is_some() {
            batch.schema_version = schema_version;
        }
        self.put(&batch)?;

        match status {
            BatchStatus::Failed => warn!(
                dataset_id = %dataset_id,
                batch_id = %batch_id,
                rows = row_count,
                "batch: failed"
            ),
            _ => info!(
                dataset_id = %dataset_id,
                batch_id = %batch_id,
                rows = row_count,
                status = %status,
                "batch: finished"
            ),
        }
        Ok(batch)
    }

    pub fn get_batch(&self, dataset_id: &Uuid, batch_id: &Uuid) -> Result<Option<Batch>> {
        Ok(self
            .all(dataset_id)?
            .into_iter()
            .find(|b| b.batch_id == *batch_id))
    }

    /// Newest batch by date, batch id breaking ties.
    pub fn get_latest_batch(&self, dataset_id: &Uuid) -> Result<Option<Batch>> {
        Ok(self.all(dataset_id)?.pop())
    }

    pub fn get_latest_ready_batch(&self, dataset_id: &Uuid) -> Result<Option<Batch>> {
        Ok(self
            .all(dataset_id)?
            .into_iter()
            .rev()
            .find(|b| b.status == BatchStatus::Ready))
    }

    /// Newest-first page of batches and the total count.
    pub fn list_batches(
        &self,
        dataset_id: &Uuid,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<Batch>, usize)> {
        let mut batches = self.all(dataset_id)?;
        batches.reverse();
        let total = batches.len();
        let window = page_window(total, page, page_size);
        Ok((batches.drain(window).collect(), total))
    }

    /// Purges the batch's row partitions, then its record. Returns the
    /// removed record, `None` when the batch does not exist.
    pub fn delete_batch(&self, dataset_id: &Uuid, batch_id: &Uuid) -> Result<Option<Batch>> {
        let Some(batch) = self.get_batch(dataset_id, batch_id)? else {
            return Ok(None);
        };

        let table = table_name(dataset_id);
        let batched = self
            .tables
            .describe_table(&table)?
            .is_some_and(|def| def.is_batched());
        if batched {
            for chunk_id in 0..BATCH_DELETE_CHUNK_CEILING {
                self.tables
                    .delete_partition(&table, &PartitionKey::batched(*batch_id, chunk_id))?;
            }
        }

        self.storage
            .delete(&batch_key(dataset_id, &batch.batch_date, batch_id))?;
        info!(dataset_id = %dataset_id, batch_id = %batch_id, rows = batch.row_count, "batch: deleted");
        Ok(Some(batch))
    }

    /// Drops every batch record of a dataset. Row data goes with the table.
    pub fn delete_all_batches(&self, dataset_id: &Uuid) -> Result<usize> {
        let removed = self.storage.delete_prefix(&batches_prefix(dataset_id))?;
        info!(dataset_id = %dataset_id, batches = removed, "batch: all records deleted");
        Ok(removed)
    }

    pub fn count_batches(&self, dataset_id: &Uuid) -> Result<usize> {
        Ok(self.storage.scan_prefix(&batches_prefix(dataset_id))?.len())
    }
}
