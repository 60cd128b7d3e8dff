//! Dataset metadata over the key/value surface of the store: dataset
//! records, versioned column schemas and batch lifecycle records.

pub mod schema;
pub mod keys;
pub mod naming;
pub mod datasets;
pub mod schema_store;
pub mod batches;

pub use schema::*;
pub use datasets::DatasetCatalog;
pub use schema_store::{SchemaDiff, SchemaStore};
pub use batches::{BatchRegistry, BATCH_DELETE_CHUNK_CEILING};
pub use naming::{storage_collisions, storage_column_name, table_name};

use std::ops::Range;

use thiserror::Error;
use uuid::Uuid;
use widestore::StoreError;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Schema version {version} of dataset {dataset_id} was claimed by a concurrent writer")]
    SchemaConflict { dataset_id: Uuid, version: u32 },

    #[error("Batch {batch_id} cannot move from {from} to {to}")]
    InvalidTransition {
        batch_id: Uuid,
        from: BatchStatus,
        to: BatchStatus,
    },
}

impl CatalogError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CatalogError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;

/// Index range of a 1-based page over `len` items. Pages past the end are empty.
pub fn page_window(len: usize, page: usize, page_size: usize) -> Range<usize> {
    let start = page.max(1).saturating_sub(1).saturating_mul(page_size).min(len);
    let end = start.saturating_add(page_size).min(len);
    start..end
}
