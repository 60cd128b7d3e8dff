use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;
use uuid::Uuid;
use widestore::{ColumnDef, PartitionKey, TableDef, TableStore};

use crate::{store_err, Result, RowStoreError};

/// Key layout of a row table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableLayout {
    /// `((row_chunk_id), row_id)`, tables from before batch tracking.
    Legacy,
    /// `((batch_id, row_chunk_id), row_id)`
    Batched,
}

impl TableLayout {
    pub fn of(def: &TableDef) -> Self {
        if def.is_batched() {
            TableLayout::Batched
        } else {
            TableLayout::Legacy
        }
    }

    /// Partition of `chunk_id`, `None` when the batch does not fit the layout.
    pub fn partition(&self, batch_id: Option<Uuid>, chunk_id: u32) -> Option<PartitionKey> {
        match (self, batch_id) {
            (TableLayout::Batched, Some(id)) => Some(PartitionKey::batched(id, chunk_id)),
            (TableLayout::Legacy, None) => Some(PartitionKey::legacy(chunk_id)),
            _ => None,
        }
    }
}

/// Table definitions probed once and then served from memory.
pub(crate) struct TableRegistry {
    tables: Arc<dyn TableStore>,
    known: RwLock<HashMap<String, TableDef>>,
}

impl TableRegistry {
    pub(crate) fn new(tables: Arc<dyn TableStore>) -> Self {
        Self {
            tables,
            known: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn store(&self) -> &dyn TableStore {
        self.tables.as_ref()
    }

    fn remember(&self, def: TableDef) {
        self.known
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(def.name.clone(), def);
    }

    pub(crate) fn forget(&self, table: &str) {
        self.known
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(table);
    }

    /// Definition of `table`. Only existing tables are cached.
    pub(crate) fn describe(&self, table: &str) -> Result<Option<TableDef>> {
        let cached = self
            .known
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned();
        if cached.is_some() {
            return Ok(cached);
        }

        let probed = self.tables.describe_table(table).map_err(store_err(table))?;
        if let Some(def) = &probed {
            info!(table, layout = ?TableLayout::of(def), "rowstore: table layout probed");
            self.remember(def.clone());
        }
        Ok(probed)
    }

    /// Creates the table from `initial` if needed, then adds whatever of
    /// `required` it lacks.
    pub(crate) fn ensure(
        &self,
        table: &str,
        initial: Vec<ColumnDef>,
        required: &[ColumnDef],
    ) -> Result<TableDef> {
        let mut def = match self.describe(table)? {
            Some(def) => def,
            None => self.create(table, initial)?,
        };

        let missing: Vec<ColumnDef> = required
            .iter()
            .filter(|c| !def.has_column(&c.name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            self.tables
                .add_columns(table, &missing)
                .map_err(store_err(table))?;
            info!(
                table,
                added = missing.len(),
                "rowstore: table re-provisioned with new columns"
            );
            def.columns.extend(missing);
            self.remember(def.clone());
        }
        Ok(def)
    }

    fn create(&self, table: &str, initial: Vec<ColumnDef>) -> Result<TableDef> {
        let def = TableDef::batched(table, initial);
        if self.tables.create_table(&def).map_err(store_err(table))? {
            info!(table, columns = def.columns.len(), "rowstore: table provisioned");
            self.remember(def.clone());
            return Ok(def);
        }
        // Someone else created it first.
        let existing = self
            .tables
            .describe_table(table)
            .map_err(store_err(table))?
            .ok_or_else(|| RowStoreError::MissingTable(table.to_string()))?;
        self.remember(existing.clone());
        Ok(existing)
    }
}
