//! Versioned column schemas.
//!
//! A version is claimed with a conditional insert of its version record and
//! only then are its columns written. Columns of a version never change
//! afterwards except for their masking rule.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use masking::MaskRule;
use tracing::info;
use uuid::Uuid;
use widestore::Storage;

use crate::keys::{
    column_key, columns_prefix, decode, encode, schema_prefix, version_key, versions_prefix,
};
use crate::{CatalogError, Column, ColumnType, Result, Row, SchemaVersion};

/// Shape difference between the active columns of a version and a sample row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchemaDiff {
    /// In sample order.
    pub added: Vec<String>,
    /// In position order.
    pub removed: Vec<String>,
    /// Active columns whose sample value has another type. Null samples
    /// never count as a change.
    pub changed: Vec<String>,
}

impl SchemaDiff {
    pub fn between(columns: &[Column], sample: &Row) -> Self {
        let active: Vec<&Column> = columns.iter().filter(|c| c.is_active).collect();

        let added = sample
            .keys()
            .filter(|name| !active.iter().any(|c| &c.name == *name))
            .cloned()
            .collect();
        let removed = active
            .iter()
            .filter(|c| !sample.contains_key(&c.name))
            .map(|c| c.name.clone())
            .collect();
        let changed = active
            .iter()
            .filter(|c| match sample.get(&c.name) {
                Some(value) if !value.is_null() => ColumnType::of(value) != c.column_type,
                _ => false,
            })
            .map(|c| c.name.clone())
            .collect();

        Self {
            added,
            removed,
            changed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// `+2 cols, -1 cols, ~1 type changes`
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.added.is_empty() {
            parts.push(format!("+{} cols", self.added.len()));
        }
        if !self.removed.is_empty() {
            parts.push(format!("-{} cols", self.removed.len()));
        }
        if !self.changed.is_empty() {
            parts.push(format!("~{} type changes", self.changed.len()));
        }
        parts.join(", ")
    }
}

#[derive(Clone)]
pub struct SchemaStore {
    storage: Arc<dyn Storage>,
}

impl SchemaStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Highest registered version, `None` before the first ingest.
    pub fn latest_version(&self, dataset_id: &Uuid) -> Result<Option<u32>> {
        let entries = self.storage.scan_prefix(&versions_prefix(dataset_id))?;
        match entries.last() {
            Some((_, bytes)) => Ok(Some(decode::<SchemaVersion>(bytes)?.version)),
            None => Ok(None),
        }
    }

    /// Registers version 1 from a sample row; columns follow the row's key order.
    pub fn create_schema(
        &self,
        dataset_id: &Uuid,
        sample: &Row,
        batch_id: Option<Uuid>,
    ) -> Result<u32> {
        let now = Utc::now();
        let columns: Vec<Column> = sample
            .iter()
            .enumerate()
            .map(|(position, (name, value))| Column {
                name: name.clone(),
                column_type: ColumnType::of(value),
                position: position as u32,
                is_active: true,
                masking_rule: None,
                added_at: now,
                removed_at: None,
            })
            .collect();
        self.write_version(dataset_id, 1, batch_id, &columns, "Initial schema", now)
    }

    /// Returns the version in effect for `sample`, registering a new one when
    /// the shape differs from the latest version.
    pub fn evolve_schema(
        &self,
        dataset_id: &Uuid,
        sample: &Row,
        batch_id: Option<Uuid>,
    ) -> Result<u32> {
        let Some(latest) = self.latest_version(dataset_id)? else {
            return self.create_schema(dataset_id, sample, batch_id);
        };

        let mut columns = self.columns(dataset_id, latest)?;
        let diff = SchemaDiff::between(&columns, sample);
        if diff.is_empty() {
            return Ok(latest);
        }

        let now = Utc::now();
        let sample_type = |name: &str| sample.get(name).map_or(ColumnType::Null, ColumnType::of);

        for col in columns.iter_mut().filter(|c| c.is_active) {
            if diff.removed.contains(&col.name) {
                col.is_active = false;
                col.removed_at = Some(now);
            } else if diff.changed.contains(&col.name) {
                col.column_type = sample_type(col.name.as_str());
            }
        }

        let mut next_position = columns.iter().map(|c| c.position + 1).max().unwrap_or(0);
        for name in &diff.added {
            let column_type = sample_type(name.as_str());
            // A column that comes back keeps the position it had.
            if let Some(col) = columns.iter_mut().find(|c| !c.is_active && &c.name == name) {
                col.is_active = true;
                col.removed_at = None;
                col.added_at = now;
                col.column_type = column_type;
                continue;
            }
            columns.push(Column {
                name: name.clone(),
                column_type,
                position: next_position,
                is_active: true,
                masking_rule: None,
                added_at: now,
                removed_at: None,
            });
            next_position += 1;
        }

        self.write_version(dataset_id, latest + 1, batch_id, &columns, &diff.summary(), now)
    }

    /// Columns of a version (latest when `None`) in position order.
    pub fn get_schema(
        &self,
        dataset_id: &Uuid,
        version: Option<u32>,
        include_inactive: bool,
    ) -> Result<Vec<Column>> {
        let version = match version {
            Some(v) => v,
            None => match self.latest_version(dataset_id)? {
                Some(v) => v,
                None => return Ok(vec![]),
            },
        };
        let mut columns = self.columns(dataset_id, version)?;
        if !include_inactive {
            columns.retain(|c| c.is_active);
        }
        Ok(columns)
    }

    pub fn get_version(&self, dataset_id: &Uuid, version: u32) -> Result<Option<SchemaVersion>> {
        match self.storage.get(&version_key(dataset_id, version))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every version, newest first.
    pub fn get_schema_history(&self, dataset_id: &Uuid) -> Result<Vec<SchemaVersion>> {
        let mut history = self
            .storage
            .scan_prefix(&versions_prefix(dataset_id))?
            .iter()
            .map(|(_, bytes)| decode::<SchemaVersion>(bytes))
            .collect::<Result<Vec<_>>>()?;
        history.reverse();
        Ok(history)
    }

    /// Sets or clears the masking rule of a column in the latest version.
    /// No new version is created.
    pub fn update_masking_rule(
        &self,
        dataset_id: &Uuid,
        column: &str,
        rule: Option<MaskRule>,
    ) -> Result<()> {
        let version = self
            .latest_version(dataset_id)?
            .ok_or_else(|| CatalogError::not_found("schema", dataset_id))?;
        let columns = self.columns(dataset_id, version)?;
        let mut target = columns
            .iter()
            .find(|c| c.is_active && c.name == column)
            .or_else(|| columns.iter().find(|c| c.name == column))
            .cloned()
            .ok_or_else(|| CatalogError::not_found("column", format!("{dataset_id}/{column}")))?;

        target.masking_rule = rule;
        self.storage.put(
            &column_key(dataset_id, version, target.position),
            &encode(&target)?,
        )?;
        info!(
            dataset_id = %dataset_id,
            version,
            column,
            rule = ?target.masking_rule.as_ref().map(ToString::to_string),
            "schema: masking rule updated"
        );
        Ok(())
    }

    /// Soft-deletes an active column. Always registers a new version.
    pub fn drop_column(&self, dataset_id: &Uuid, column: &str) -> Result<u32> {
        let latest = self
            .latest_version(dataset_id)?
            .ok_or_else(|| CatalogError::not_found("schema", dataset_id))?;
        let mut columns = self.columns(dataset_id, latest)?;
        let now = Utc::now();

        let target = columns
            .iter_mut()
            .find(|c| c.is_active && c.name == column)
            .ok_or_else(|| CatalogError::not_found("column", format!("{dataset_id}/{column}")))?;
        target.is_active = false;
        target.removed_at = Some(now);

        let summary = format!("Dropped column: {column}");
        self.write_version(dataset_id, latest + 1, None, &columns, &summary, now)
    }

    /// Removes every version and column. Irreversible.
    pub fn delete_schema(&self, dataset_id: &Uuid) -> Result<usize> {
        let removed = self.storage.delete_prefix(&schema_prefix(dataset_id))?;
        info!(dataset_id = %dataset_id, entries = removed, "schema: deleted");
        Ok(removed)
    }

    fn columns(&self, dataset_id: &Uuid, version: u32) -> Result<Vec<Column>> {
        self.storage
            .scan_prefix(&columns_prefix(dataset_id, version))?
            .iter()
            .map(|(_, bytes)| decode::<Column>(bytes))
            .collect()
    }

    fn write_version(
        &self,
        dataset_id: &Uuid,
        version: u32,
        batch_id: Option<Uuid>,
        columns: &[Column],
        summary: &str,
        now: DateTime<Utc>,
    ) -> Result<u32> {
        let record = SchemaVersion {
            dataset_id: *dataset_id,
            version,
            batch_id,
            created_at: now,
            column_count: columns.iter().filter(|c| c.is_active).count() as u32,
            change_summary: summary.to_string(),
        };

        let claimed = self
            .storage
            .put_if_absent(&version_key(dataset_id, version), &encode(&record)?)?;
        if !claimed {
            return Err(CatalogError::SchemaConflict {
                dataset_id: *dataset_id,
                version,
            });
        }

        for col in columns {
            self.storage
                .put(&column_key(dataset_id, version, col.position), &encode(col)?)?;
        }

        info!(
            dataset_id = %dataset_id,
            version,
            columns = record.column_count,
            summary,
            "schema: version registered"
        );
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Value};
    use widestore::MemoryStore;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("row must be an object"),
        }
    }

    fn store() -> SchemaStore {
        SchemaStore::new(Arc::new(MemoryStore::new()))
    }

    fn names(columns: &[Column]) -> Vec<&str> {
        columns.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_create_infers_types_in_key_order() {
        let s = store();
        let ds = Uuid::new_v4();
        let v = s.create_schema(&ds, &row(json!({"id": 1, "name": "Alice", "score": 1.5})), None).unwrap();
        assert_eq!(v, 1);

        let cols = s.get_schema(&ds, None, false).unwrap();
        assert_eq!(names(&cols), vec!["id", "name", "score"]);
        assert_eq!(cols[0].column_type, ColumnType::Int);
        assert_eq!(cols[1].column_type, ColumnType::String);
        assert_eq!(cols[2].column_type, ColumnType::Float);
        assert_eq!(cols.iter().map(|c| c.position).collect::<Vec<_>>(), vec![0, 1, 2]);

        let history = s.get_schema_history(&ds).unwrap();
        assert_eq!(history[0].change_summary, "Initial schema");
        assert_eq!(history[0].column_count, 3);
    }

    #[test]
    fn test_same_shape_reuses_version() {
        let s = store();
        let ds = Uuid::new_v4();
        let first = s.evolve_schema(&ds, &row(json!({"a": 1, "b": "x"})), None).unwrap();
        let second = s.evolve_schema(&ds, &row(json!({"b": "y", "a": 2})), None).unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 1);
        assert_eq!(s.get_schema_history(&ds).unwrap().len(), 1);
    }

    #[test]
    fn test_added_column_keeps_existing_positions() {
        let s = store();
        let ds = Uuid::new_v4();
        s.evolve_schema(&ds, &row(json!({"a": 1, "b": "x"})), None).unwrap();
        let batch = Uuid::new_v4();
        let v = s.evolve_schema(&ds, &row(json!({"a": 1, "b": "x", "c": true})), Some(batch)).unwrap();
        assert_eq!(v, 2);

        let cols = s.get_schema(&ds, None, false).unwrap();
        assert_eq!(names(&cols), vec!["a", "b", "c"]);
        assert_eq!(cols.iter().map(|c| c.position).collect::<Vec<_>>(), vec![0, 1, 2]);

        let latest = s.get_version(&ds, 2).unwrap().unwrap();
        assert_eq!(latest.batch_id, Some(batch));
        assert_eq!(latest.change_summary, "+1 cols");
        assert_eq!(s.get_schema(&ds, Some(1), false).unwrap().len(), 2);
    }

    #[test]
    fn test_removed_column_goes_inactive() {
        let s = store();
        let ds = Uuid::new_v4();
        s.evolve_schema(&ds, &row(json!({"a": 1, "b": "x"})), None).unwrap();
        let v = s.evolve_schema(&ds, &row(json!({"a": 2})), None).unwrap();
        assert_eq!(v, 2);

        assert_eq!(names(&s.get_schema(&ds, None, false).unwrap()), vec!["a"]);
        let all = s.get_schema(&ds, None, true).unwrap();
        let b = all.iter().find(|c| c.name == "b").unwrap();
        assert!(!b.is_active);
        assert!(b.removed_at.is_some());
        assert_eq!(s.get_version(&ds, 2).unwrap().unwrap().column_count, 1);
    }

    #[test]
    fn test_returning_column_is_reactivated_in_place() {
        let s = store();
        let ds = Uuid::new_v4();
        s.evolve_schema(&ds, &row(json!({"a": 1, "b": "x"})), None).unwrap();
        s.evolve_schema(&ds, &row(json!({"a": 1})), None).unwrap();
        let v = s.evolve_schema(&ds, &row(json!({"a": 1, "b": "y"})), None).unwrap();
        assert_eq!(v, 3);

        let cols = s.get_schema(&ds, None, true).unwrap();
        assert_eq!(cols.len(), 2);
        let b = &cols[1];
        assert_eq!((b.name.as_str(), b.position, b.is_active), ("b", 1, true));
        assert!(b.removed_at.is_none());
    }

    #[test]
    fn test_type_change_and_null_sample() {
        let s = store();
        let ds = Uuid::new_v4();
        s.evolve_schema(&ds, &row(json!({"a": 1})), None).unwrap();
        assert_eq!(s.evolve_schema(&ds, &row(json!({"a": null})), None).unwrap(), 1);

        let v = s.evolve_schema(&ds, &row(json!({"a": "one"})), None).unwrap();
        assert_eq!(v, 2);
        let cols = s.get_schema(&ds, None, false).unwrap();
        assert_eq!(cols[0].column_type, ColumnType::String);
        assert_eq!(s.get_version(&ds, 2).unwrap().unwrap().change_summary, "~1 type changes");
    }

    #[test]
    fn test_drop_column_always_versions() {
        let s = store();
        let ds = Uuid::new_v4();
        s.evolve_schema(&ds, &row(json!({"a": 1, "b": 2})), None).unwrap();
        assert_eq!(s.drop_column(&ds, "b").unwrap(), 2);
        assert_eq!(
            s.get_version(&ds, 2).unwrap().unwrap().change_summary,
            "Dropped column: b"
        );
        assert!(matches!(
            s.drop_column(&ds, "b"),
            Err(CatalogError::NotFound { entity: "column", .. })
        ));
    }

    #[test]
    fn test_masking_rule_touches_latest_version_only() {
        let s = store();
        let ds = Uuid::new_v4();
        s.evolve_schema(&ds, &row(json!({"email": "a@b.c"})), None).unwrap();
        s.evolve_schema(&ds, &row(json!({"email": "a@b.c", "n": 1})), None).unwrap();

        s.update_masking_rule(&ds, "email", Some(MaskRule::Email)).unwrap();
        assert_eq!(s.latest_version(&ds).unwrap(), Some(2));
        assert_eq!(
            s.get_schema(&ds, Some(2), false).unwrap()[0].masking_rule,
            Some(MaskRule::Email)
        );
        assert_eq!(s.get_schema(&ds, Some(1), false).unwrap()[0].masking_rule, None);

        assert!(matches!(
            s.update_masking_rule(&ds, "missing", None),
            Err(CatalogError::NotFound { .. })
        ));
        assert!(matches!(
            s.update_masking_rule(&Uuid::new_v4(), "email", None),
            Err(CatalogError::NotFound { entity: "schema", .. })
        ));
    }

    #[test]
    fn test_concurrent_claim_is_a_conflict() {
        let s = store();
        let ds = Uuid::new_v4();
        s.create_schema(&ds, &row(json!({"a": 1})), None).unwrap();
        let err = s.create_schema(&ds, &row(json!({"b": 1})), None).unwrap_err();
        assert!(matches!(err, CatalogError::SchemaConflict { version: 1, .. }));
        assert_eq!(names(&s.get_schema(&ds, None, false).unwrap()), vec!["a"]);
    }

    #[test]
    fn test_delete_schema() {
        let s = store();
        let ds = Uuid::new_v4();
        let other = Uuid::new_v4();
        s.evolve_schema(&ds, &row(json!({"a": 1})), None).unwrap();
        s.evolve_schema(&other, &row(json!({"a": 1})), None).unwrap();

        assert!(s.delete_schema(&ds).unwrap() > 0);
        assert_eq!(s.latest_version(&ds).unwrap(), None);
        assert!(s.get_schema(&ds, None, true).unwrap().is_empty());
        assert_eq!(s.latest_version(&other).unwrap(), Some(1));
    }

    proptest! {
        #[test]
        fn versions_strictly_increase(shapes in prop::collection::vec(prop::collection::btree_set("[a-e]", 1..4), 1..12)) {
            let s = store();
            let ds = Uuid::new_v4();
            let mut last = 0u32;
            for shape in shapes {
                let sample: Row = shape.into_iter().map(|k| (k, json!(1))).collect();
                let v = s.evolve_schema(&ds, &sample, None).unwrap();
                prop_assert!(v >= last);
                prop_assert!(v <= last + 1);
                last = v;

                let active = s.get_schema(&ds, None, false).unwrap();
                let mut positions: Vec<u32> = active.iter().map(|c| c.position).collect();
                positions.dedup();
                prop_assert_eq!(positions.len(), active.len());
            }

            let history: Vec<u32> = s.get_schema_history(&ds).unwrap().iter().map(|h| h.version).collect();
            let expected: Vec<u32> = (1..=last).rev().collect();
            prop_assert_eq!(history, expected);
        }
    }
}
