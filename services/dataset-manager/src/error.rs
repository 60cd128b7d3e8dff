use std::time::Duration;

use catalog::CatalogError;
use rowstore::RowStoreError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Any failed read or write against the store, including timeouts.
    #[error("Storage error ({context}): {message}")]
    Storage { context: String, message: String },

    #[error("Schema version {version} of dataset {dataset_id} was claimed by a concurrent writer")]
    SchemaConflict { dataset_id: Uuid, version: u32 },

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl DatasetError {
    pub fn storage(context: impl Into<String>, message: impl ToString) -> Self {
        DatasetError::Storage {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn timeout(context: impl Into<String>, after: Duration) -> Self {
        DatasetError::storage(context, format!("timed out after {}ms", after.as_millis()))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DatasetError::NotFound { .. })
    }
}

impl From<CatalogError> for DatasetError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::NotFound { entity, id } => DatasetError::NotFound { entity, id },
            CatalogError::SchemaConflict { dataset_id, version } => {
                DatasetError::SchemaConflict { dataset_id, version }
            }
            CatalogError::InvalidTransition { .. } => DatasetError::InvalidState(e.to_string()),
            CatalogError::Storage(_) | CatalogError::Serialization(_) => {
                DatasetError::storage("catalog", e)
            }
        }
    }
}

impl From<RowStoreError> for DatasetError {
    fn from(e: RowStoreError) -> Self {
        match e {
            RowStoreError::Catalog(inner) => inner.into(),
            other => DatasetError::storage("rowstore", other),
        }
    }
}

pub type Result<T> = std::result::Result<T, DatasetError>;

/// Prefixes the context of storage failures with the ids involved.
pub(crate) trait ErrorContext<T> {
    fn within(self, context: impl FnOnce() -> String) -> Result<T>;
}

impl<T, E: Into<DatasetError>> ErrorContext<T> for std::result::Result<T, E> {
    fn within(self, context: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|e| match e.into() {
            DatasetError::Storage { context: inner, message } => DatasetError::Storage {
                context: format!("{}: {inner}", context()),
                message,
            },
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use widestore::StoreError;

    #[test]
    fn test_catalog_errors_map_to_taxonomy() {
        let nf: DatasetError = CatalogError::NotFound {
            entity: "batch",
            id: "b1".into(),
        }
        .into();
        assert!(nf.is_not_found());

        let storage: DatasetError = CatalogError::Storage(StoreError::Unavailable("down".into())).into();
        assert!(matches!(storage, DatasetError::Storage { .. }));
    }

    #[test]
    fn test_context_names_the_dataset() {
        let id = Uuid::new_v4();
        let res: std::result::Result<(), CatalogError> = Err(CatalogError::Storage(StoreError::Unavailable("down".into())));
        let err = res.within(|| format!("dataset {id}")).unwrap_err();
        assert!(err.to_string().contains(&id.to_string()));
    }
}
