use catalog::{storage_column_name, Column, Row};
use serde_json::Value;
use widestore::Cells;

#[derive(Clone, Debug, PartialEq, Eq)]
struct MappedColumn {
    display: String,
    storage: String,
}

/// Display <-> storage name mapping built from the active columns of a
/// schema version, in position order.
///
/// An empty map (dataset without any schema) shows storage names as they are.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ColumnMap {
    entries: Vec<MappedColumn>,
}

impl ColumnMap {
    pub fn from_schema(columns: &[Column]) -> Self {
        let mut active: Vec<&Column> = columns.iter().filter(|c| c.is_active).collect();
        active.sort_by_key(|c| c.position);
        Self {
            entries: active
                .into_iter()
                .map(|c| MappedColumn {
                    display: c.name.clone(),
                    storage: storage_column_name(&c.name),
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn storage_name(&self, display: &str) -> String {
        self.entries
            .iter()
            .find(|e| e.display == display)
            .map(|e| e.storage.clone())
            .unwrap_or_else(|| storage_column_name(display))
    }

    /// Display-named row from stored cells.
    ///
    /// With `selected`, exactly those names in that order. Otherwise every
    /// mapped column. Absent cells come back as null.
    pub fn reconstruct(&self, cells: &Cells, selected: Option<&[String]>) -> Row {
        let cell = |storage: &str| cells.get(storage).cloned().unwrap_or(Value::Null);

        if let Some(names) = selected {
            return names
                .iter()
                .map(|name| (name.clone(), cell(&self.storage_name(name))))
                .collect();
        }
        if self.entries.is_empty() {
            return cells.clone();
        }
        self.entries
            .iter()
            .map(|e| (e.display.clone(), cell(&e.storage)))
            .collect()
    }
}
