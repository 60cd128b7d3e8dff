//! Key-Partitioned Wide-Column Store
//!
//! Two surfaces over one backend: an ordered key/value space for metadata
//! records, and dynamically created tables whose rows are addressed by a
//! partition key plus a clustering row id. The store is append and
//! range-scan oriented: a partition can be scanned from its start in
//! clustering order with a row limit, never seeked into.

mod storage;
mod table;
mod types;
mod memory;

pub use storage::Storage;
pub use table::TableStore;
pub use types::{
    CellType, Cells, ColumnDef, PartitionKey, RowWrite, StoredRow, TableDef,
    BATCH_COLUMN, CHUNK_COLUMN, ROW_COLUMN,
};
pub use memory::MemoryStore;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Unknown column '{column}' in table {table}")]
    UnknownColumn { table: String, column: String },

    #[error("Column '{column}' of table {table} expects {expected}, got {found}")]
    TypeMismatch {
        table: String,
        column: String,
        expected: CellType,
        found: String,
    },

    #[error("Partition key does not match the key layout of table {0}")]
    KeyMismatch(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
