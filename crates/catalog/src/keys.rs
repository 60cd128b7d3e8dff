//! Key layout and record encoding.
//!
//! Numbers are zero padded so that a prefix scan returns versions,
//! positions and batch dates in ascending order.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::{CatalogError, Result};

pub const DATASET_PREFIX: &str = "dataset:";

/// dataset:<id>
pub fn dataset_key(dataset_id: &Uuid) -> Vec<u8> {
    format!("{DATASET_PREFIX}{dataset_id}").into_bytes()
}

/// schema:<id>:  (every version and column of a dataset)
pub fn schema_prefix(dataset_id: &Uuid) -> Vec<u8> {
    format!("schema:{dataset_id}:").into_bytes()
}

/// schema:<id>:version:
pub fn versions_prefix(dataset_id: &Uuid) -> Vec<u8> {
    format!("schema:{dataset_id}:version:").into_bytes()
}

/// schema:<id>:version:<v>
pub fn version_key(dataset_id: &Uuid, version: u32) -> Vec<u8> {
    format!("schema:{dataset_id}:version:{version:010}").into_bytes()
}

/// schema:<id>:column:<v>:
pub fn columns_prefix(dataset_id: &Uuid, version: u32) -> Vec<u8> {
    format!("schema:{dataset_id}:column:{version:010}:").into_bytes()
}

/// schema:<id>:column:<v>:<pos>
pub fn column_key(dataset_id: &Uuid, version: u32, position: u32) -> Vec<u8> {
    format!("schema:{dataset_id}:column:{version:010}:{position:06}").into_bytes()
}

/// batch:<id>:
pub fn batches_prefix(dataset_id: &Uuid) -> Vec<u8> {
    format!("batch:{dataset_id}:").into_bytes()
}

/// batch:<id>:<date>:<batch>
pub fn batch_key(dataset_id: &Uuid, batch_date: &DateTime<Utc>, batch_id: &Uuid) -> Vec<u8> {
    format!(
        "batch:{dataset_id}:{}:{batch_id}",
        batch_date.format("%Y%m%d%H%M%S%6f")
    )
    .into_bytes()
}

pub fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    bincode::serialize(record).map_err(|e| CatalogError::Serialization(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| CatalogError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_version_keys_sort_numerically() {
        let id = Uuid::new_v4();
        assert!(version_key(&id, 9) < version_key(&id, 10));
        assert!(version_key(&id, 10).starts_with(&versions_prefix(&id)));
        assert!(column_key(&id, 2, 11).starts_with(&columns_prefix(&id, 2)));
        assert!(!column_key(&id, 2, 11).starts_with(&columns_prefix(&id, 1)));
    }

    #[test]
    fn test_batch_keys_sort_by_date() {
        let id = Uuid::new_v4();
        let early = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 11, 2, 3, 4, 5).unwrap();
        let b = Uuid::new_v4();
        assert!(batch_key(&id, &early, &b) < batch_key(&id, &late, &b));
        assert!(batch_key(&id, &late, &b).starts_with(&batches_prefix(&id)));
    }
}
