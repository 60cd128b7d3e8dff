use std::sync::Arc;

use chrono::Utc;
use masking::MaskRule;
use tracing::info;
use uuid::Uuid;
use widestore::Storage;

use crate::keys::{dataset_key, decode, encode, DATASET_PREFIX};
use crate::{
    page_window, Batch, BatchStatus, CatalogError, Dataset, DatasetStatus, DatasetUpdate,
    IngestAggregates, NewDataset, Result,
};

/// Dataset records.
#[derive(Clone)]
pub struct DatasetCatalog {
    storage: Arc<dyn Storage>,
}

impl DatasetCatalog {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    fn put(&self, dataset: &Dataset) -> Result<()> {
        self.storage.put(&dataset_key(&dataset.id), &encode(dataset)?)?;
        Ok(())
    }

    pub fn create(&self, new: NewDataset) -> Result<Dataset> {
        let now = Utc::now();
        let dataset = Dataset {
            id: Uuid::new_v4(),
            name: new.name,
            description: new.description,
            owner: new.owner,
            tags: new.tags,
            is_public: new.is_public,
            masking_rules: new.masking_rules,
            row_count: 0,
            size_bytes: 0,
            file_format: None,
            status: DatasetStatus::Pending,
            batch_frequency: new.batch_frequency,
            latest_batch_id: None,
            latest_batch_date: None,
            total_batches: 0,
            schema_version: None,
            created_at: now,
            updated_at: now,
        };
        self.put(&dataset)?;
        info!(dataset_id = %dataset.id, owner = %dataset.owner, "catalog: dataset created");
        Ok(dataset)
    }

    pub fn find(&self, dataset_id: &Uuid) -> Result<Option<Dataset>> {
        match self.storage.get(&dataset_key(dataset_id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get(&self, dataset_id: &Uuid) -> Result<Dataset> {
        self.find(dataset_id)?
            .ok_or_else(|| CatalogError::not_found("dataset", dataset_id))
    }

    /// Page of datasets ordered by creation time, plus the match count.
    /// `search` is a case-insensitive substring of name or description.
    pub fn list(
        &self,
        page: usize,
        page_size: usize,
        search: Option<&str>,
    ) -> Result<(Vec<Dataset>, usize)> {
        let needle = search
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        let mut all = Vec::new();
        for (_, bytes) in self.storage.scan_prefix(DATASET_PREFIX.as_bytes())? {
            let dataset: Dataset = decode(&bytes)?;
            let matches = match &needle {
                None => true,
                Some(n) => {
                    dataset.name.to_lowercase().contains(n)
                        || dataset
                            .description
                            .as_deref()
                            .is_some_and(|d| d.to_lowercase().contains(n))
                }
            };
            if matches {
                all.push(dataset);
            }
        }
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let total = all.len();
        let window = page_window(total, page, page_size);
        let items = all.drain(window).collect();
        Ok((items, total))
    }

    fn modify(&self, dataset_id: &Uuid, f: impl FnOnce(&mut Dataset)) -> Result<Dataset> {
        let mut dataset = self.get(dataset_id)?;
        f(&mut dataset);
        dataset.updated_at = Utc::now();
        self.put(&dataset)?;
        Ok(dataset)
    }

    pub fn update(&self, dataset_id: &Uuid, update: DatasetUpdate) -> Result<Dataset> {
        if update.is_empty() {
            return self.get(dataset_id);
        }
        let dataset = self.modify(dataset_id, |d| {
            if let Some(name) = update.name {
                d.name = name;
            }
            if let Some(description) = update.description {
                d.description = Some(description);
            }
            if let Some(tags) = update.tags {
                d.tags = tags;
            }
            if let Some(is_public) = update.is_public {
                d.is_public = is_public;
            }
            if let Some(rules) = update.masking_rules {
                d.masking_rules = rules;
            }
            if let Some(freq) = update.batch_frequency {
                d.batch_frequency = Some(freq);
            }
        })?;
        info!(dataset_id = %dataset_id, "catalog: dataset updated");
        Ok(dataset)
    }

    /// Sets or clears the read-time masking rule of one display column.
    pub fn set_masking_rule(
        &self,
        dataset_id: &Uuid,
        column: &str,
        rule: Option<MaskRule>,
    ) -> Result<Dataset> {
        self.modify(dataset_id, |d| match rule {
            Some(rule) => {
                d.masking_rules.insert(column.to_string(), rule);
            }
            None => {
                d.masking_rules.remove(column);
            }
        })
    }

    pub fn set_status(&self, dataset_id: &Uuid, status: DatasetStatus) -> Result<Dataset> {
        self.modify(dataset_id, |d| d.status = status)
    }

    pub fn set_schema_version(&self, dataset_id: &Uuid, version: u32) -> Result<Dataset> {
        self.modify(dataset_id, |d| d.schema_version = Some(version))
    }

    /// Folds a finished batch into the dataset counters and marks it ready.
    pub fn record_ingest(&self, dataset_id: &Uuid, agg: &IngestAggregates) -> Result<Dataset> {
        self.modify(dataset_id, |d| {
            d.row_count += agg.rows;
            d.size_bytes += agg.size_bytes;
            d.total_batches += 1;
            d.file_format = Some(agg.file_format.clone());
            if agg.schema_version.is_some() {
                d.schema_version = agg.schema_version;
            }
            let newer = d
                .latest_batch_date
                .map_or(true, |latest| agg.batch_date >= latest);
            if newer {
                d.latest_batch_id = Some(agg.batch_id);
                d.latest_batch_date = Some(agg.batch_date);
            }
            d.status = DatasetStatus::Ready;
        })
    }

    /// Counts rows a failed ingest left in a table without batch keys. They
    /// stay readable and the next append has to start after them.
    pub fn record_partial_rows(&self, dataset_id: &Uuid, rows: u64) -> Result<Dataset> {
        self.modify(dataset_id, |d| d.row_count += rows)
    }

    /// Takes a deleted batch back out of the counters. Only ready batches were
    /// ever counted. `latest` is the newest remaining ready batch.
    pub fn record_batch_removal(
        &self,
        dataset_id: &Uuid,
        removed: &Batch,
        latest: Option<&Batch>,
    ) -> Result<Dataset> {
        self.modify(dataset_id, |d| {
            if removed.status == BatchStatus::Ready {
                d.row_count = d.row_count.saturating_sub(removed.row_count);
                d.size_bytes = d.size_bytes.saturating_sub(removed.size_bytes);
                d.total_batches = d.total_batches.saturating_sub(1);
            }
            d.latest_batch_id = latest.map(|b| b.batch_id);
            d.latest_batch_date = latest.map(|b| b.batch_date);
        })
    }

    /// Removes the record. Returns `false` when it did not exist.
    pub fn delete(&self, dataset_id: &Uuid) -> Result<bool> {
        if self.find(dataset_id)?.is_none() {
            return Ok(false);
        }
        self.storage.delete(&dataset_key(dataset_id))?;
        info!(dataset_id = %dataset_id, "catalog: dataset deleted");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use widestore::MemoryStore;

    fn catalog() -> DatasetCatalog {
        DatasetCatalog::new(Arc::new(MemoryStore::new()))
    }

    fn named(name: &str, description: Option<&str>) -> NewDataset {
        NewDataset {
            name: name.to_string(),
            description: description.map(str::to_string),
            owner: "alice".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_and_get() {
        let catalog = catalog();
        let ds = catalog.create(named("sales", None)).unwrap();
        assert_eq!(ds.status, DatasetStatus::Pending);
        assert_eq!(ds.row_count, 0);
        assert_eq!(catalog.get(&ds.id).unwrap(), ds);

        let missing = catalog.get(&Uuid::new_v4()).unwrap_err();
        assert!(matches!(missing, CatalogError::NotFound { entity: "dataset", .. }));
    }

    #[test]
    fn test_list_search_and_paging() {
        let catalog = catalog();
        catalog.create(named("Sales 2023", None)).unwrap();
        catalog.create(named("inventory", Some("warehouse SALES feed"))).unwrap();
        catalog.create(named("hr", None)).unwrap();

        let (all, total) = catalog.list(1, 10, None).unwrap();
        assert_eq!((all.len(), total), (3, 3));

        let (hits, total) = catalog.list(1, 10, Some("sales")).unwrap();
        assert_eq!(total, 2);
        assert_eq!(hits.len(), 2);

        let (first, _) = catalog.list(1, 2, None).unwrap();
        let (second, total) = catalog.list(2, 2, None).unwrap();
        assert_eq!((second.len(), total), (1, 3));
        let mut names: Vec<String> = first.iter().chain(&second).map(|d| d.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["Sales 2023", "hr", "inventory"]);
    }

    #[test]
    fn test_update_and_masking_rule() {
        let catalog = catalog();
        let ds = catalog.create(named("a", None)).unwrap();

        let updated = catalog
            .update(
                &ds.id,
                DatasetUpdate {
                    name: Some("b".into()),
                    tags: Some(vec!["x".into()]),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "b");
        assert_eq!(updated.tags, vec!["x".to_string()]);

        let masked = catalog
            .set_masking_rule(&ds.id, "email", Some(MaskRule::Email))
            .unwrap();
        assert_eq!(masked.masking_rules.get("email"), Some(&MaskRule::Email));
        let cleared = catalog.set_masking_rule(&ds.id, "email", None).unwrap();
        assert!(cleared.masking_rules.is_empty());
    }

    #[test]
    fn test_ingest_and_removal_aggregates() {
        let catalog = catalog();
        let ds = catalog.create(named("a", None)).unwrap();
        let day = |n: i64| Utc::now() + chrono::Duration::days(n);
        let agg = |rows: u64, date| IngestAggregates {
            batch_id: Uuid::new_v4(),
            batch_date: date,
            rows,
            size_bytes: rows * 10,
            file_format: "csv".into(),
            schema_version: Some(1),
        };

        let newer = agg(5, day(2));
        let older = agg(3, day(1));
        catalog.record_ingest(&ds.id, &newer).unwrap();
        let after = catalog.record_ingest(&ds.id, &older).unwrap();
        assert_eq!((after.row_count, after.size_bytes, after.total_batches), (8, 80, 2));
        assert_eq!(after.latest_batch_id, Some(newer.batch_id));
        assert_eq!(after.status, DatasetStatus::Ready);

        let removed = Batch {
            dataset_id: ds.id,
            batch_id: newer.batch_id,
            batch_date: newer.batch_date,
            schema_version: Some(1),
            row_count: 5,
            size_bytes: 50,
            file_format: "csv".into(),
            status: BatchStatus::Ready,
            uploaded_by: "alice".into(),
            created_at: Utc::now(),
        };
        let remaining = Batch {
            batch_id: older.batch_id,
            batch_date: older.batch_date,
            row_count: 3,
            size_bytes: 30,
            ..removed.clone()
        };
        let after = catalog
            .record_batch_removal(&ds.id, &removed, Some(&remaining))
            .unwrap();
        assert_eq!((after.row_count, after.size_bytes, after.total_batches), (3, 30, 1));
        assert_eq!(after.latest_batch_id, Some(older.batch_id));

        let failed = Batch {
            status: BatchStatus::Failed,
            ..removed
        };
        let after = catalog.record_batch_removal(&ds.id, &failed, Some(&remaining)).unwrap();
        assert_eq!(after.row_count, 3);

        assert_eq!(catalog.set_schema_version(&ds.id, 4).unwrap().schema_version, Some(4));
        let after = catalog.record_partial_rows(&ds.id, 2).unwrap();
        assert_eq!((after.row_count, after.total_batches), (5, 1));
    }

    #[test]
    fn test_delete() {
        let catalog = catalog();
        let ds = catalog.create(named("a", None)).unwrap();
        assert!(catalog.delete(&ds.id).unwrap());
        assert!(!catalog.delete(&ds.id).unwrap());
        assert!(catalog.find(&ds.id).unwrap().is_none());
    }
}
