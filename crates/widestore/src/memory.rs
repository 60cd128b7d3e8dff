//! In-process backend implementing both store surfaces

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::{
    Cells, ColumnDef, PartitionKey, Result, RowWrite, Storage, StoreError, StoredRow, TableDef,
    TableStore,
};

struct MemTable {
    def: TableDef,
    partitions: BTreeMap<PartitionKey, BTreeMap<u64, Cells>>,
}

/// In-memory store (for tests, demos and embedding)
///
/// Behaves like a strict wide-column store: writes naming a column that is
/// not part of the table definition are rejected, and cell values are
/// coerced to the declared column type or rejected.
#[derive(Clone, Default)]
pub struct MemoryStore {
    kv: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
    tables: Arc<RwLock<HashMap<String, MemTable>>>,
}

fn poisoned<E>(_: E) -> StoreError {
    StoreError::Unavailable("memory store lock poisoned".to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn kv_read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>>> {
        self.kv.read().map_err(poisoned)
    }

    fn kv_write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>>> {
        self.kv.write().map_err(poisoned)
    }

    fn tables_read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, MemTable>>> {
        self.tables.read().map_err(poisoned)
    }

    fn tables_write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, MemTable>>> {
        self.tables.write().map_err(poisoned)
    }

    /// Number of live rows in a table, across all partitions.
    pub fn row_count(&self, table: &str) -> Result<usize> {
        let tables = self.tables_read()?;
        let t = tables
            .get(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        Ok(t.partitions.values().map(BTreeMap::len).sum())
    }
}

impl Storage for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.kv_read()?.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.kv_write()?.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn put_if_absent(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        let mut kv = self.kv_write()?;
        if kv.contains_key(key) {
            return Ok(false);
        }
        kv.insert(key.to_vec(), value.to_vec());
        Ok(true)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.kv_write()?.remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let kv = self.kv_read()?;
        Ok(kv
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn delete_prefix(&self, prefix: &[u8]) -> Result<usize> {
        let mut kv = self.kv_write()?;
        let doomed: Vec<Vec<u8>> = kv
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &doomed {
            kv.remove(k);
        }
        Ok(doomed.len())
    }
}

impl TableStore for MemoryStore {
    fn describe_table(&self, table: &str) -> Result<Option<TableDef>> {
        Ok(self.tables_read()?.get(table).map(|t| t.def.clone()))
    }

    fn create_table(&self, def: &TableDef) -> Result<bool> {
        let mut tables = self.tables_write()?;
        if tables.contains_key(&def.name) {
            return Ok(false);
        }
        tables.insert(
            def.name.clone(),
            MemTable {
                def: def.clone(),
                partitions: BTreeMap::new(),
            },
        );
        debug!(table = %def.name, columns = def.columns.len(), "memory store: table created");
        Ok(true)
    }

    fn add_columns(&self, table: &str, columns: &[ColumnDef]) -> Result<usize> {
        let mut tables = self.tables_write()?;
        let t = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;

        let mut added = 0;
        for col in columns {
            if !t.def.has_column(&col.name) {
                t.def.columns.push(col.clone());
                added += 1;
            }
        }
        Ok(added)
    }

    fn drop_table(&self, table: &str) -> Result<bool> {
        Ok(self.tables_write()?.remove(table).is_some())
    }

    fn write_rows(&self, table: &str, rows: &[RowWrite]) -> Result<()> {
        let mut tables = self.tables_write()?;
        let t = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;

        for row in rows {
            if t.def.is_batched() != row.partition.batch_id.is_some() {
                return Err(StoreError::KeyMismatch(table.to_string()));
            }

            let mut accepted = Cells::new();
            for (name, value) in &row.cells {
                let col = t
                    .def
                    .column(name)
                    .filter(|_| !t.def.is_key_column(name))
                    .ok_or_else(|| StoreError::UnknownColumn {
                        table: table.to_string(),
                        column: name.clone(),
                    })?;
                let coerced = col.ty.coerce(value).ok_or_else(|| StoreError::TypeMismatch {
                    table: table.to_string(),
                    column: name.clone(),
                    expected: col.ty,
                    found: value.to_string(),
                })?;
                accepted.insert(name.clone(), coerced);
            }

            // Upsert: cells of an existing row are overwritten one by one.
            let stored = t
                .partitions
                .entry(row.partition)
                .or_default()
                .entry(row.row_id)
                .or_default();
            for (name, value) in accepted {
                stored.insert(name, value);
            }
        }
        Ok(())
    }

    fn scan_partition(
        &self,
        table: &str,
        key: &PartitionKey,
        projection: Option<&[String]>,
        limit: Option<usize>,
    ) -> Result<Vec<StoredRow>> {
        let tables = self.tables_read()?;
        let t = tables
            .get(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;

        if let Some(cols) = projection {
            if let Some(missing) = cols.iter().find(|c| !t.def.has_column(c)) {
                return Err(StoreError::UnknownColumn {
                    table: table.to_string(),
                    column: missing.clone(),
                });
            }
        }

        let Some(partition) = t.partitions.get(key) else {
            return Ok(vec![]);
        };

        Ok(partition
            .iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|(row_id, cells)| {
                let cells = match projection {
                    Some(cols) => cells
                        .iter()
                        .filter(|(name, _)| cols.iter().any(|c| c == *name))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                    None => cells.clone(),
                };
                StoredRow {
                    partition: *key,
                    row_id: *row_id,
                    cells,
                }
            })
            .collect())
    }

    fn delete_partition(&self, table: &str, key: &PartitionKey) -> Result<()> {
        let mut tables = self.tables_write()?;
        let t = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        t.partitions.remove(key);
        Ok(())
    }
}
