use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use catalog::{storage_collisions, storage_column_name, table_name, Column, ColumnType, Row, SchemaStore};
use tracing::{debug, info, warn};
use uuid::Uuid;
use widestore::{Cells, ColumnDef, RowWrite, StoreError, TableStore};

use crate::layout::TableRegistry;
use crate::{store_err, ColumnMap, Result, RowStoreConfig, RowStoreError, TableLayout};

/// Where an ingest lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestTarget {
    /// Batched table: indices restart at 0 for every batch.
    Batch(Uuid),
    /// Legacy table: rows continue the dataset-wide index from `start`.
    Legacy { start: u64 },
}

/// Which rows a read covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadScope {
    Batch(Uuid),
    Legacy,
}

impl ReadScope {
    fn batch_id(&self) -> Option<Uuid> {
        match self {
            ReadScope::Batch(id) => Some(*id),
            ReadScope::Legacy => None,
        }
    }
}

pub struct RowStore {
    registry: TableRegistry,
    schemas: SchemaStore,
    config: RowStoreConfig,
    column_maps: RwLock<HashMap<(Uuid, u32), Arc<ColumnMap>>>,
}

fn dedup_defs(defs: impl Iterator<Item = ColumnDef>) -> Vec<ColumnDef> {
    let mut out: Vec<ColumnDef> = Vec::new();
    for def in defs {
        if !out.iter().any(|c| c.name == def.name) {
            out.push(def);
        }
    }
    out
}

/// Stored cells of an input row. Nulls are left out. Display names sharing a
/// storage column keep the last value.
fn to_cells(row: &Row) -> Cells {
    row.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (storage_column_name(k), v.clone()))
        .collect()
}

impl RowStore {
    pub fn new(tables: Arc<dyn TableStore>, schemas: SchemaStore, config: RowStoreConfig) -> Self {
        Self {
            registry: TableRegistry::new(tables),
            schemas,
            config,
            column_maps: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RowStoreConfig {
        &self.config
    }

    /// Layout of the dataset's table, `None` before the first ingest.
    pub fn layout(&self, dataset_id: &Uuid) -> Result<Option<TableLayout>> {
        Ok(self
            .registry
            .describe(&table_name(dataset_id))?
            .map(|def| TableLayout::of(&def)))
    }

    /// Makes sure the table exists and holds a column for every active
    /// schema column. A new table takes its columns from `first_row`.
    pub fn provision(
        &self,
        dataset_id: &Uuid,
        first_row: &Row,
        columns: &[Column],
    ) -> Result<TableLayout> {
        let names = first_row
            .keys()
            .map(String::as_str)
            .chain(columns.iter().filter(|c| c.is_active).map(|c| c.name.as_str()));
        for (earlier, later, storage) in storage_collisions(names) {
            warn!(
                dataset_id = %dataset_id,
                earlier = %earlier,
                later = %later,
                storage = %storage,
                "rowstore: display names share a storage column"
            );
        }

        let initial = dedup_defs(first_row.iter().map(|(name, value)| {
            ColumnDef::new(storage_column_name(name), ColumnType::of(value).cell_type())
        }));
        let required = dedup_defs(columns.iter().filter(|c| c.is_active).map(|c| {
            ColumnDef::new(storage_column_name(&c.name), c.column_type.cell_type())
        }));

        let def = self
            .registry
            .ensure(&table_name(dataset_id), initial, &required)?;
        Ok(TableLayout::of(&def))
    }

    /// Name mapping of the latest schema version, cached per version.
    pub fn column_map(&self, dataset_id: &Uuid) -> Result<Arc<ColumnMap>> {
        let Some(version) = self.schemas.latest_version(dataset_id)? else {
            return Ok(Arc::new(ColumnMap::default()));
        };
        let key = (*dataset_id, version);
        if let Some(map) = self
            .column_maps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(map.clone());
        }

        let columns = self.schemas.get_schema(dataset_id, Some(version), false)?;
        let map = Arc::new(ColumnMap::from_schema(&columns));
        self.column_maps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, map.clone());
        Ok(map)
    }

    /// Checks that every non-null value fits the type of the table column it
    /// would land in. Columns the table does not hold yet are not checked.
    pub fn check_storable(&self, dataset_id: &Uuid, rows: &[Row]) -> Result<()> {
        let table = table_name(dataset_id);
        let Some(def) = self.registry.describe(&table)? else {
            return Ok(());
        };
        for row in rows {
            for (name, value) in row.iter().filter(|(_, v)| !v.is_null()) {
                let storage = storage_column_name(name);
                let Some(col) = def.column(&storage) else {
                    continue;
                };
                if col.ty.coerce(value).is_none() {
                    return Err(RowStoreError::Store {
                        source: StoreError::TypeMismatch {
                            table: table.clone(),
                            column: storage,
                            expected: col.ty,
                            found: value.to_string(),
                        },
                        table,
                    });
                }
            }
        }
        Ok(())
    }

    /// Writes `rows` in chunk order using unlogged sub-batches.
    ///
    /// Returns the number of rows written. On failure the error carries the
    /// count of rows committed by earlier sub-batches; those are not undone.
    pub fn ingest(&self, dataset_id: &Uuid, target: IngestTarget, rows: &[Row]) -> Result<u64> {
        let table = table_name(dataset_id);
        let layout = self
            .layout(dataset_id)?
            .ok_or_else(|| RowStoreError::MissingTable(table.clone()))?;

        let (start, batch_id) = match target {
            IngestTarget::Batch(id) => (0, Some(id)),
            IngestTarget::Legacy { start } => (start, None),
        };
        if layout.partition(batch_id, 0).is_none() {
            return Err(RowStoreError::Store {
                source: StoreError::KeyMismatch(table.clone()),
                table,
            });
        }

        let chunk_size = self.config.chunk_size.max(1) as u64;
        let write_batch = self.config.write_batch_size.max(1);
        let store = self.registry.store();

        let mut written: u64 = 0;
        let mut pending: Vec<RowWrite> = Vec::with_capacity(write_batch);
        let mut flush = |pending: &mut Vec<RowWrite>| -> Result<()> {
            if pending.is_empty() {
                return Ok(());
            }
            store
                .write_rows(&table, pending)
                .map_err(|source| RowStoreError::PartialWrite {
                    table: table.clone(),
                    written,
                    source,
                })?;
            written += pending.len() as u64;
            pending.clear();
            Ok(())
        };

        for (i, row) in rows.iter().enumerate() {
            let index = start + i as u64;
            let chunk_id = u32::try_from(index / chunk_size).unwrap_or(u32::MAX);
            let Some(partition) = layout.partition(batch_id, chunk_id) else {
                continue;
            };
            // Sub-batches never span two partitions.
            if pending.last().is_some_and(|w| w.partition != partition) {
                flush(&mut pending)?;
            }
            pending.push(RowWrite {
                partition,
                row_id: index % chunk_size,
                cells: to_cells(row),
            });
            if pending.len() >= write_batch {
                flush(&mut pending)?;
            }
        }
        flush(&mut pending)?;
        drop(flush);

        info!(
            dataset_id = %dataset_id,
            batch_id = ?batch_id,
            rows = written,
            "rowstore: rows ingested"
        );
        Ok(written)
    }

    /// One page of display-named rows, in ingest order.
    ///
    /// The store can only scan a partition from its start, so the rows before
    /// the page offset are fetched and dropped. A page crossing a chunk
    /// boundary continues at the start of the next chunk.
    pub fn read_page(
        &self,
        dataset_id: &Uuid,
        scope: ReadScope,
        page: usize,
        page_size: usize,
        selected: Option<&[String]>,
    ) -> Result<Vec<Row>> {
        let table = table_name(dataset_id);
        let Some(def) = self.registry.describe(&table)? else {
            return Ok(vec![]);
        };
        let layout = TableLayout::of(&def);
        let batch_id = scope.batch_id();
        if layout.partition(batch_id, 0).is_none() {
            debug!(dataset_id = %dataset_id, ?scope, ?layout, "rowstore: scope does not fit table layout");
            return Ok(vec![]);
        }

        let map = self.column_map(dataset_id)?;
        let projection: Option<Vec<String>> = selected.map(|names| {
            let mut cols: Vec<String> = Vec::new();
            for storage in names.iter().map(|n| map.storage_name(n)) {
                if def.has_column(&storage) && !cols.contains(&storage) {
                    cols.push(storage);
                }
            }
            cols
        });

        let chunk_size = self.config.chunk_size.max(1);
        let offset = page.max(1).saturating_sub(1).saturating_mul(page_size);
        let mut chunk = offset / chunk_size;
        let mut skip = offset % chunk_size;
        let mut out: Vec<Row> = Vec::with_capacity(page_size.min(chunk_size));
        let store = self.registry.store();

        while out.len() < page_size {
            let Some(partition) = u32::try_from(chunk)
                .ok()
                .and_then(|id| layout.partition(batch_id, id))
            else {
                break;
            };
            let limit = skip + (page_size - out.len());
            let fetched = store
                .scan_partition(&table, &partition, projection.as_deref(), Some(limit))
                .map_err(store_err(&table))?;
            let n = fetched.len();
            out.extend(
                fetched
                    .into_iter()
                    .skip(skip)
                    .map(|r| map.reconstruct(&r.cells, selected)),
            );
            // A short read from a chunk that is not full means the scope ended.
            if n < limit && n < chunk_size {
                break;
            }
            chunk += 1;
            skip = 0;
        }
        Ok(out)
    }

    /// Every row of the scope, chunk by chunk until an empty chunk.
    pub fn scan_all(&self, dataset_id: &Uuid, scope: ReadScope) -> Result<Vec<Row>> {
        let table = table_name(dataset_id);
        let Some(def) = self.registry.describe(&table)? else {
            return Ok(vec![]);
        };
        let layout = TableLayout::of(&def);
        let map = self.column_map(dataset_id)?;
        let store = self.registry.store();

        let mut out = Vec::new();
        for chunk_id in 0..=u32::MAX {
            let Some(partition) = layout.partition(scope.batch_id(), chunk_id) else {
                break;
            };
            let fetched = store
                .scan_partition(&table, &partition, None, None)
                .map_err(store_err(&table))?;
            if fetched.is_empty() {
                break;
            }
            out.extend(fetched.iter().map(|r| map.reconstruct(&r.cells, None)));
        }
        Ok(out)
    }

    /// Drops the dataset's table outright.
    pub fn drop_table(&self, dataset_id: &Uuid) -> Result<bool> {
        let table = table_name(dataset_id);
        let dropped = self
            .registry
            .store()
            .drop_table(&table)
            .map_err(store_err(&table))?;
        self.registry.forget(&table);
        self.column_maps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(id, _), _| id != dataset_id);
        if dropped {
            info!(dataset_id = %dataset_id, table = %table, "rowstore: table dropped");
        }
        Ok(dropped)
    }
}
