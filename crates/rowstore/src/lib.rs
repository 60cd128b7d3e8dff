//! Chunked row storage in per-dataset tables.
//!
//! Rows of one ingest are addressed by `(batch_id, chunk_id, row_id)` with
//! `chunk_id = index / chunk_size` and `row_id = index % chunk_size`. Tables
//! written before batches existed have no batch column; those use a global
//! row index instead and are detected once per table.

mod columns;
mod layout;
mod store;

pub use columns::ColumnMap;
pub use layout::TableLayout;
pub use store::{IngestTarget, ReadScope, RowStore};

use catalog::CatalogError;
use thiserror::Error;
use widestore::StoreError;

pub const DEFAULT_CHUNK_SIZE: usize = 10_000;
pub const DEFAULT_WRITE_BATCH_SIZE: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RowStoreConfig {
    /// Rows per partition.
    pub chunk_size: usize,
    /// Rows per unlogged write call.
    pub write_batch_size: usize,
}

impl Default for RowStoreConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            write_batch_size: DEFAULT_WRITE_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Error)]
pub enum RowStoreError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Table {table}: {source}")]
    Store {
        table: String,
        #[source]
        source: StoreError,
    },

    #[error("Table {table}: write failed after {written} rows: {source}")]
    PartialWrite {
        table: String,
        written: u64,
        #[source]
        source: StoreError,
    },

    #[error("Table {0} has not been provisioned")]
    MissingTable(String),
}

impl RowStoreError {
    /// Rows known to be committed before the failure.
    pub fn rows_written(&self) -> u64 {
        match self {
            RowStoreError::PartialWrite { written, .. } => *written,
            _ => 0,
        }
    }
}

pub type Result<T> = std::result::Result<T, RowStoreError>;

pub(crate) fn store_err(table: &str) -> impl FnOnce(StoreError) -> RowStoreError + '_ {
    move |source| RowStoreError::Store {
        table: table.to_string(),
        source,
    }
}
