//! Core types for partitioned tables

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Named cell values of one stored row.
pub type Cells = Map<String, Value>;

/// Partition key column carrying the batch identity.
pub const BATCH_COLUMN: &str = "batch_id";
/// Partition key column carrying the chunk number.
pub const CHUNK_COLUMN: &str = "row_chunk_id";
/// Clustering column, ascending.
pub const ROW_COLUMN: &str = "row_id";

/// Physical column type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellType {
    Int,
    BigInt,
    Double,
    Boolean,
    Text,
    Uuid,
}

impl CellType {
    /// Physical type for a sample value.
    pub fn infer(value: &Value) -> CellType {
        match value {
            Value::Bool(_) => CellType::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => CellType::BigInt,
            Value::Number(_) => CellType::Double,
            _ => CellType::Text,
        }
    }

    /// Converts `value` into a form a column of this type accepts.
    pub fn coerce(self, value: &Value) -> Option<Value> {
        match (self, value) {
            (CellType::Text, Value::String(_)) => Some(value.clone()),
            (CellType::Text, other) => Some(Value::String(other.to_string())),
            (CellType::Int, Value::Number(n)) => n
                .as_i64()
                .filter(|v| i32::try_from(*v).is_ok())
                .map(|_| value.clone()),
            (CellType::BigInt, Value::Number(n)) if n.is_i64() => Some(value.clone()),
            (CellType::Double, Value::Number(n)) => n.as_f64().map(Value::from),
            (CellType::Boolean, Value::Bool(_)) => Some(value.clone()),
            (CellType::Uuid, Value::String(s)) if Uuid::parse_str(s).is_ok() => {
                Some(value.clone())
            }
            _ => None,
        }
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CellType::Int => "INT",
            CellType::BigInt => "BIGINT",
            CellType::Double => "DOUBLE",
            CellType::Boolean => "BOOLEAN",
            CellType::Text => "TEXT",
            CellType::Uuid => "UUID",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub ty: CellType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: CellType) -> Self {
        Self { name: name.into(), ty }
    }
}

/// Table definition as created, or as reported by a describe probe.
///
/// `columns` lists every column including the key columns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub partition_key: Vec<String>,
    pub clustering_key: String,
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    /// `PRIMARY KEY ((batch_id, row_chunk_id), row_id)`
    pub fn batched(name: impl Into<String>, data_columns: Vec<ColumnDef>) -> Self {
        let mut columns = vec![
            ColumnDef::new(BATCH_COLUMN, CellType::Uuid),
            ColumnDef::new(CHUNK_COLUMN, CellType::Int),
            ColumnDef::new(ROW_COLUMN, CellType::BigInt),
        ];
        columns.extend(data_columns);
        Self {
            name: name.into(),
            partition_key: vec![BATCH_COLUMN.to_string(), CHUNK_COLUMN.to_string()],
            clustering_key: ROW_COLUMN.to_string(),
            columns,
        }
    }

    /// `PRIMARY KEY (row_chunk_id, row_id)`, the layout of tables written
    /// before batches were tracked.
    pub fn legacy(name: impl Into<String>, data_columns: Vec<ColumnDef>) -> Self {
        let mut columns = vec![
            ColumnDef::new(CHUNK_COLUMN, CellType::Int),
            ColumnDef::new(ROW_COLUMN, CellType::BigInt),
        ];
        columns.extend(data_columns);
        Self {
            name: name.into(),
            partition_key: vec![CHUNK_COLUMN.to_string()],
            clustering_key: ROW_COLUMN.to_string(),
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn is_batched(&self) -> bool {
        self.partition_key.iter().any(|k| k == BATCH_COLUMN)
    }

    pub fn is_key_column(&self, name: &str) -> bool {
        name == self.clustering_key || self.partition_key.iter().any(|k| k == name)
    }
}

/// Partition address. `batch_id` is `None` only for legacy tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub batch_id: Option<Uuid>,
    pub chunk_id: u32,
}

impl PartitionKey {
    pub fn batched(batch_id: Uuid, chunk_id: u32) -> Self {
        Self { batch_id: Some(batch_id), chunk_id }
    }

    pub fn legacy(chunk_id: u32) -> Self {
        Self { batch_id: None, chunk_id }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RowWrite {
    pub partition: PartitionKey,
    pub row_id: u64,
    pub cells: Cells,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StoredRow {
    pub partition: PartitionKey,
    pub row_id: u64,
    pub cells: Cells,
}
