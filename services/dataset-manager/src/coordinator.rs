use catalog::{
    Batch, BatchStatus, Dataset, DatasetStatus, DatasetUpdate, IngestAggregates, NewBatch, NewDataset, Row,
};
use chrono::{DateTime, Utc};
use masking::MaskRule;
use rowstore::{IngestTarget, TableLayout};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{DatasetError, ErrorContext, Result};
use crate::state::Stores;

/// One parsed upload.
#[derive(Clone, Debug)]
pub struct IngestRequest {
    pub rows: Vec<Row>,
    pub uploaded_by: String,
    pub batch_date: DateTime<Utc>,
    pub file_format: String,
    pub size_bytes: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IngestOutcome {
    pub batch_id: Uuid,
    pub rows_ingested: u64,
    /// `None` only for an empty first upload.
    pub schema_version: Option<u32>,
}

/// Pairs a failure with the rows committed before it.
fn after<E: Into<DatasetError>>(written: u64) -> impl FnOnce(E) -> (DatasetError, u64) {
    move |e| (e.into(), written)
}

/// Write path. Callers serialize calls per dataset.
#[derive(Clone)]
pub struct IngestCoordinator {
    stores: Stores,
}

impl IngestCoordinator {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    pub fn create_dataset(&self, new: NewDataset) -> Result<Dataset> {
        let dataset = self.stores.datasets.create(new)?;
        self.stores.cache.invalidate_datasets_list();
        Ok(dataset)
    }

    pub fn update_dataset(&self, dataset_id: &Uuid, update: DatasetUpdate) -> Result<Dataset> {
        let dataset = self
            .stores
            .datasets
            .update(dataset_id, update)
            .within(|| format!("dataset {dataset_id}"))?;
        self.stores.cache.invalidate_all_for_dataset(dataset_id);
        Ok(dataset)
    }

    /// Registers a batch, evolves the schema from the first row, makes sure
    /// the table can hold every active column, then writes the rows.
    ///
    /// On a write failure the batch is marked failed with the rows already
    /// committed; those rows stay in the table.
    pub fn ingest(&self, dataset_id: &Uuid, req: IngestRequest) -> Result<IngestOutcome> {
        let ctx = || format!("dataset {dataset_id}");
        let dataset = self.stores.datasets.get(dataset_id).within(ctx)?;
        self.stores
            .datasets
            .set_status(dataset_id, DatasetStatus::Processing)
            .within(ctx)?;

        let batch = self
            .stores
            .batches
            .create_batch(
                dataset_id,
                NewBatch {
                    batch_date: req.batch_date,
                    file_format: req.file_format.clone(),
                    size_bytes: req.size_bytes,
                    uploaded_by: req.uploaded_by.clone(),
                },
            )
            .within(ctx)?;

        match self.write_batch(&dataset, &batch, &req.rows) {
            Ok((written, version)) => self.finish_batch(&dataset, &batch, &req, written, version),
            Err((e, written)) => Err(self.fail_batch(&dataset, &batch, e, written)),
        }
    }

    fn write_batch(
        &self,
        dataset: &Dataset,
        batch: &Batch,
        rows: &[Row],
    ) -> std::result::Result<(u64, Option<u32>), (DatasetError, u64)> {
        let dataset_id = &dataset.id;
        let Some(first) = rows.first() else {
            let version = self
                .stores
                .schemas
                .latest_version(dataset_id)
                .map_err(after(0))?;
            return Ok((0, version));
        };

        // A batch the table cannot hold must not register a schema version.
        self.stores
            .rows
            .check_storable(dataset_id, rows)
            .map_err(after(0))?;
        let version = self
            .stores
            .schemas
            .evolve_schema(dataset_id, first, Some(batch.batch_id))
            .map_err(after(0))?;
        let columns = self
            .stores
            .schemas
            .get_schema(dataset_id, Some(version), false)
            .map_err(after(0))?;
        let layout = self
            .stores
            .rows
            .provision(dataset_id, first, &columns)
            .map_err(after(0))?;

        let target = match layout {
            TableLayout::Batched => IngestTarget::Batch(batch.batch_id),
            TableLayout::Legacy => IngestTarget::Legacy {
                start: dataset.row_count,
            },
        };
        let written = self.stores.rows.ingest(dataset_id, target, rows).map_err(|e| {
            let written = e.rows_written();
            (DatasetError::from(e), written)
        })?;
        Ok((written, Some(version)))
    }

    fn finish_batch(
        &self,
        dataset: &Dataset,
        batch: &Batch,
        req: &IngestRequest,
        written: u64,
        version: Option<u32>,
    ) -> Result<IngestOutcome> {
        let dataset_id = &dataset.id;
        let ctx = || format!("dataset {dataset_id}, batch {}", batch.batch_id);
        self.stores
            .batches
            .update_batch_status(
                dataset_id,
                &batch.batch_id,
                &batch.batch_date,
                BatchStatus::Ready,
                written,
                version,
            )
            .within(ctx)?;
        self.stores
            .datasets
            .record_ingest(
                dataset_id,
                &IngestAggregates {
                    batch_id: batch.batch_id,
                    batch_date: batch.batch_date,
                    rows: written,
                    size_bytes: req.size_bytes,
                    file_format: req.file_format.clone(),
                    schema_version: version,
                },
            )
            .within(ctx)?;
        self.stores.cache.invalidate_all_for_dataset(dataset_id);

        info!(
            dataset_id = %dataset_id,
            batch_id = %batch.batch_id,
            rows = written,
            version = ?version,
            "ingest: batch ready"
        );
        Ok(IngestOutcome {
            batch_id: batch.batch_id,
            rows_ingested: written,
            schema_version: version,
        })
    }

    /// Records the failure and returns the error for the caller. A dataset
    /// that already holds ready batches stays ready.
    ///
    /// The dataset keeps pointing at the latest registered schema version,
    /// and rows left behind in a legacy table move the append index.
    fn fail_batch(&self, dataset: &Dataset, batch: &Batch, cause: DatasetError, written: u64) -> DatasetError {
        let dataset_id = &dataset.id;
        let ctx = format!("dataset {dataset_id}, batch {}", batch.batch_id);
        warn!(
            dataset_id = %dataset_id,
            batch_id = %batch.batch_id,
            rows = written,
            error = %cause,
            "ingest: batch failed"
        );

        if let Err(e) = self.stores.batches.update_batch_status(
            dataset_id,
            &batch.batch_id,
            &batch.batch_date,
            BatchStatus::Failed,
            written,
            None,
        ) {
            warn!(dataset_id = %dataset_id, batch_id = %batch.batch_id, error = %e, "ingest: could not mark batch failed");
        }
        match self.stores.schemas.latest_version(dataset_id) {
            Ok(Some(latest)) if dataset.schema_version != Some(latest) => {
                if let Err(e) = self.stores.datasets.set_schema_version(dataset_id, latest) {
                    warn!(dataset_id = %dataset_id, error = %e, "ingest: could not sync schema version");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(dataset_id = %dataset_id, error = %e, "ingest: could not read schema version"),
        }
        if written > 0 && matches!(self.stores.rows.layout(dataset_id), Ok(Some(TableLayout::Legacy))) {
            if let Err(e) = self.stores.datasets.record_partial_rows(dataset_id, written) {
                warn!(dataset_id = %dataset_id, rows = written, error = %e, "ingest: could not count partial rows");
            }
        }
        let status = if dataset.total_batches > 0 {
            DatasetStatus::Ready
        } else {
            DatasetStatus::Failed
        };
        if let Err(e) = self.stores.datasets.set_status(dataset_id, status) {
            warn!(dataset_id = %dataset_id, error = %e, "ingest: could not update dataset status");
        }
        self.stores.cache.invalidate_all_for_dataset(dataset_id);

        match cause {
            DatasetError::Storage { context, message } => DatasetError::Storage {
                context: format!("{ctx}: {context}"),
                message,
            },
            other => other,
        }
    }

    /// Sets or clears the rule on the latest schema column and in the
    /// dataset's read-time map. Datasets without a schema only update the map.
    pub fn update_masking_rule(
        &self,
        dataset_id: &Uuid,
        column: &str,
        rule: Option<MaskRule>,
    ) -> Result<Dataset> {
        let ctx = || format!("dataset {dataset_id}");
        self.stores.datasets.get(dataset_id).within(ctx)?;
        if self.stores.schemas.latest_version(dataset_id).within(ctx)?.is_some() {
            self.stores
                .schemas
                .update_masking_rule(dataset_id, column, rule.clone())
                .within(ctx)?;
        }
        let dataset = self
            .stores
            .datasets
            .set_masking_rule(dataset_id, column, rule)
            .within(ctx)?;
        self.stores.cache.invalidate_all_for_dataset(dataset_id);
        Ok(dataset)
    }

    /// Soft-deletes a column. Returns the new schema version.
    pub fn drop_column(&self, dataset_id: &Uuid, column: &str) -> Result<u32> {
        let ctx = || format!("dataset {dataset_id}");
        self.stores.datasets.get(dataset_id).within(ctx)?;
        let version = self.stores.schemas.drop_column(dataset_id, column).within(ctx)?;
        self.stores
            .datasets
            .set_schema_version(dataset_id, version)
            .within(ctx)?;
        self.stores.cache.invalidate_all_for_dataset(dataset_id);
        Ok(version)
    }

    /// Removes a batch and its rows. `None` when the batch does not exist.
    ///
    /// Rows of a legacy table carry no batch key, so their batches cannot be
    /// deleted.
    pub fn delete_batch(&self, dataset_id: &Uuid, batch_id: &Uuid) -> Result<Option<Batch>> {
        let ctx = || format!("dataset {dataset_id}, batch {batch_id}");
        self.stores.datasets.get(dataset_id).within(ctx)?;
        if self.stores.rows.layout(dataset_id).within(ctx)? == Some(TableLayout::Legacy) {
            return Err(DatasetError::InvalidState(format!(
                "dataset {dataset_id} has a legacy table; rows of batch {batch_id} cannot be removed"
            )));
        }
        let Some(removed) = self.stores.batches.delete_batch(dataset_id, batch_id).within(ctx)? else {
            return Ok(None);
        };
        let latest = self
            .stores
            .batches
            .get_latest_ready_batch(dataset_id)
            .within(ctx)?;
        self.stores
            .datasets
            .record_batch_removal(dataset_id, &removed, latest.as_ref())
            .within(ctx)?;
        self.stores.cache.invalidate_all_for_dataset(dataset_id);
        Ok(Some(removed))
    }

    /// Drops the table, batch records, schema and the dataset record.
    /// Returns `false` when the dataset does not exist.
    pub fn delete_dataset(&self, dataset_id: &Uuid) -> Result<bool> {
        let ctx = || format!("dataset {dataset_id}");
        if self.stores.datasets.find(dataset_id).within(ctx)?.is_none() {
            return Ok(false);
        }
        self.stores.rows.drop_table(dataset_id).within(ctx)?;
        self.stores.batches.delete_all_batches(dataset_id).within(ctx)?;
        self.stores.schemas.delete_schema(dataset_id).within(ctx)?;
        let deleted = self.stores.datasets.delete(dataset_id).within(ctx)?;
        self.stores.cache.invalidate_all_for_dataset(dataset_id);
        Ok(deleted)
    }
}
