use bytes::Bytes;
use catalog::{Batch, Column, Dataset, Row, SchemaVersion};
use pagecache::{CachedPage, RowsPageKey};
use rowstore::{ReadScope, TableLayout};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DatasetError, ErrorContext, Result};
use crate::export::ExportFormat;
use crate::state::Stores;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowsQuery {
    pub page: usize,
    pub page_size: usize,
    pub role: String,
    /// Display names to return, in this order.
    pub columns: Option<Vec<String>>,
    /// Defaults to the latest ready batch.
    pub batch_id: Option<Uuid>,
}

impl RowsQuery {
    pub fn new(page: usize, page_size: usize, role: impl Into<String>) -> Self {
        Self {
            page,
            page_size,
            role: role.into(),
            columns: None,
            batch_id: None,
        }
    }

    pub fn columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }

    pub fn batch(mut self, batch_id: Uuid) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    fn cache_key(&self, dataset_id: Uuid) -> RowsPageKey {
        RowsPageKey::new(dataset_id, self.page, self.page_size, self.role.as_str())
            .with_columns(self.columns.as_deref())
            .with_batch(self.batch_id)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RowsPage {
    pub items: Vec<Row>,
    /// Rows in the whole scope, not in this page.
    pub total: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DatasetPage {
    pub items: Vec<Dataset>,
    pub total: u64,
}

/// Resolved read target.
struct Scope {
    scope: ReadScope,
    total: u64,
}

/// Read path: cache first, then the row store, masked per role.
#[derive(Clone)]
pub struct DatasetReader {
    stores: Stores,
}

impl DatasetReader {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    pub fn get_dataset(&self, dataset_id: &Uuid) -> Result<Dataset> {
        Ok(self.stores.datasets.get(dataset_id)?)
    }

    pub fn list_datasets(&self, page: usize, page_size: usize, search: Option<&str>) -> Result<DatasetPage> {
        let search = search.map(str::trim).filter(|s| !s.is_empty());
        if let Some(cached) = self.stores.cache.get_datasets_list(page, page_size, search) {
            let items: std::result::Result<Vec<Dataset>, _> =
                cached.items.into_iter().map(serde_json::from_value).collect();
            match items {
                Ok(items) => return Ok(DatasetPage { items, total: cached.total }),
                Err(e) => debug!(error = %e, "reader: stale dataset listing ignored"),
            }
        }

        let (items, total) = self.stores.datasets.list(page, page_size, search)?;
        let listing = CachedPage {
            items: items
                .iter()
                .filter_map(|d| serde_json::to_value(d).ok())
                .collect(),
            total: total as u64,
        };
        if listing.items.len() == items.len() {
            self.stores
                .cache
                .set_datasets_list(page, page_size, search, &listing);
        }
        Ok(DatasetPage {
            items,
            total: total as u64,
        })
    }

    /// One page of display-named, masked rows.
    pub fn get_rows(&self, dataset_id: &Uuid, query: &RowsQuery) -> Result<RowsPage> {
        let key = query.cache_key(*dataset_id);
        if let Some(cached) = self.stores.cache.get_rows_page(&key) {
            let items = cached
                .items
                .into_iter()
                .filter_map(|v| match v {
                    Value::Object(row) => Some(row),
                    _ => None,
                })
                .collect();
            return Ok(RowsPage {
                items,
                total: cached.total,
            });
        }

        let ctx = || format!("dataset {dataset_id}");
        let dataset = self.stores.datasets.get(dataset_id).within(ctx)?;
        let Some(scope) = self.resolve_scope(&dataset, query.batch_id)? else {
            return Ok(RowsPage {
                items: vec![],
                total: 0,
            });
        };

        let mut items = self
            .stores
            .rows
            .read_page(
                dataset_id,
                scope.scope,
                query.page,
                query.page_size,
                query.columns.as_deref(),
            )
            .within(ctx)?;
        self.stores
            .masking
            .mask_rows(&mut items, &dataset.masking_rules, &query.role);

        let page = CachedPage {
            items: items.iter().cloned().map(Value::Object).collect(),
            total: scope.total,
        };
        self.stores.cache.set_rows_page(&key, &page);
        Ok(RowsPage {
            items,
            total: scope.total,
        })
    }

    /// Full scan of the scope, masked per role and encoded.
    pub fn export(
        &self,
        dataset_id: &Uuid,
        format: ExportFormat,
        role: &str,
        batch_id: Option<Uuid>,
    ) -> Result<Bytes> {
        let ctx = || format!("dataset {dataset_id}");
        let dataset = self.stores.datasets.get(dataset_id).within(ctx)?;
        let mut rows = match self.resolve_scope(&dataset, batch_id)? {
            Some(scope) => self.stores.rows.scan_all(dataset_id, scope.scope).within(ctx)?,
            None => vec![],
        };
        self.stores
            .masking
            .mask_rows(&mut rows, &dataset.masking_rules, role);
        debug!(dataset_id = %dataset_id, rows = rows.len(), format = %format, "reader: export");
        format.encode(&rows)
    }

    pub fn get_schema(&self, dataset_id: &Uuid, include_inactive: bool) -> Result<Vec<Column>> {
        self.stores.datasets.get(dataset_id)?;
        Ok(self
            .stores
            .schemas
            .get_schema(dataset_id, None, include_inactive)?)
    }

    /// Newest version first.
    pub fn get_schema_history(&self, dataset_id: &Uuid) -> Result<Vec<SchemaVersion>> {
        self.stores.datasets.get(dataset_id)?;
        Ok(self.stores.schemas.get_schema_history(dataset_id)?)
    }

    pub fn list_batches(&self, dataset_id: &Uuid, page: usize, page_size: usize) -> Result<(Vec<Batch>, u64)> {
        self.stores.datasets.get(dataset_id)?;
        let (batches, total) = self
            .stores
            .batches
            .list_batches(dataset_id, page, page_size)?;
        Ok((batches, total as u64))
    }

    pub fn get_batch(&self, dataset_id: &Uuid, batch_id: &Uuid) -> Result<Batch> {
        self.stores
            .batches
            .get_batch(dataset_id, batch_id)?
            .ok_or_else(|| DatasetError::NotFound {
                entity: "batch",
                id: format!("{dataset_id}/{batch_id}"),
            })
    }

    /// `None` when there is nothing to read yet. A batch named on a legacy
    /// table has no rows of its own to read.
    fn resolve_scope(&self, dataset: &Dataset, batch_id: Option<Uuid>) -> Result<Option<Scope>> {
        let ctx = || format!("dataset {}", dataset.id);
        if let Some(batch_id) = batch_id {
            let batch = self.get_batch(&dataset.id, &batch_id)?;
            let layout = self.stores.rows.layout(&dataset.id).within(ctx)?;
            if layout != Some(TableLayout::Batched) {
                debug!(dataset_id = %dataset.id, batch_id = %batch_id, ?layout, "reader: batch scope not addressable");
                return Ok(None);
            }
            return Ok(Some(Scope {
                scope: ReadScope::Batch(batch.batch_id),
                total: batch.row_count,
            }));
        }

        match self.stores.rows.layout(&dataset.id).within(ctx)? {
            None => Ok(None),
            Some(TableLayout::Legacy) => Ok(Some(Scope {
                scope: ReadScope::Legacy,
                total: dataset.row_count,
            })),
            Some(TableLayout::Batched) => Ok(self
                .stores
                .batches
                .get_latest_ready_batch(&dataset.id)
                .within(ctx)?
                .map(|batch| Scope {
                    scope: ReadScope::Batch(batch.batch_id),
                    total: batch.row_count,
                })),
        }
    }
}
