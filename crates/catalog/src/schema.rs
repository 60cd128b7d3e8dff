use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use masking::MaskRule;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;
use widestore::CellType;

/// One parsed input row: display column name -> value, in file order.
pub type Row = Map<String, Value>;

/// Logical type of a column, taken from the runtime type of a sample value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int,
    Float,
    Bool,
    String,
    Null,
    Json,
}

impl ColumnType {
    pub fn of(value: &Value) -> ColumnType {
        match value {
            Value::Null => ColumnType::Null,
            Value::Bool(_) => ColumnType::Bool,
            Value::Number(n) if n.is_i64() || n.is_u64() => ColumnType::Int,
            Value::Number(_) => ColumnType::Float,
            Value::String(_) => ColumnType::String,
            Value::Array(_) | Value::Object(_) => ColumnType::Json,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Bool => "bool",
            ColumnType::String => "string",
            ColumnType::Null => "null",
            ColumnType::Json => "json",
        }
    }

    /// Physical column type used when the column is provisioned.
    pub fn cell_type(&self) -> CellType {
        match self {
            ColumnType::Int => CellType::BigInt,
            ColumnType::Float => CellType::Double,
            ColumnType::Bool => CellType::Boolean,
            ColumnType::String | ColumnType::Null | ColumnType::Json => CellType::Text,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column of one schema version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    /// Stable ordinal, never handed to another column in the same lineage.
    pub position: u32,
    pub is_active: bool,
    pub masking_rule: Option<MaskRule>,
    pub added_at: DateTime<Utc>,
    pub removed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaVersion {
    pub dataset_id: Uuid,
    pub version: u32,
    /// Batch whose ingest produced this version, `None` for explicit edits.
    pub batch_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    /// Active columns only.
    pub column_count: u32,
    pub change_summary: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Uploading,
    Ready,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Uploading => "uploading",
            BatchStatus::Ready => "ready",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BatchStatus::Uploading)
    }

    /// `uploading -> ready` and `uploading -> failed` are the only moves.
    pub fn can_become(&self, next: BatchStatus) -> bool {
        *self == BatchStatus::Uploading && next.is_terminal()
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub dataset_id: Uuid,
    pub batch_id: Uuid,
    pub batch_date: DateTime<Utc>,
    /// Schema version in effect after this batch was ingested.
    pub schema_version: Option<u32>,
    pub row_count: u64,
    pub size_bytes: u64,
    pub file_format: String,
    pub status: BatchStatus,
    pub uploaded_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewBatch {
    pub batch_date: DateTime<Utc>,
    pub file_format: String,
    pub size_bytes: u64,
    pub uploaded_by: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl fmt::Display for DatasetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DatasetStatus::Pending => "pending",
            DatasetStatus::Processing => "processing",
            DatasetStatus::Ready => "ready",
            DatasetStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub owner: String,
    pub tags: Vec<String>,
    pub is_public: bool,
    /// Display column name -> rule applied on reads.
    pub masking_rules: BTreeMap<String, MaskRule>,
    pub row_count: u64,
    pub size_bytes: u64,
    pub file_format: Option<String>,
    pub status: DatasetStatus,
    pub batch_frequency: Option<String>,
    pub latest_batch_id: Option<Uuid>,
    pub latest_batch_date: Option<DateTime<Utc>>,
    pub total_batches: u64,
    pub schema_version: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default)]
pub struct NewDataset {
    pub name: String,
    pub description: Option<String>,
    pub owner: String,
    pub tags: Vec<String>,
    pub is_public: bool,
    pub batch_frequency: Option<String>,
    pub masking_rules: BTreeMap<String, MaskRule>,
}

/// Metadata edit. `None` fields are left as they are.
#[derive(Clone, Debug, Default)]
pub struct DatasetUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub is_public: Option<bool>,
    pub masking_rules: Option<BTreeMap<String, MaskRule>>,
    pub batch_frequency: Option<String>,
}

impl DatasetUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.tags.is_none()
            && self.is_public.is_none()
            && self.masking_rules.is_none()
            && self.batch_frequency.is_none()
    }
}

/// Counters folded into the dataset after a successful ingest.
#[derive(Clone, Debug)]
pub struct IngestAggregates {
    pub batch_id: Uuid,
    pub batch_date: DateTime<Utc>,
    pub rows: u64,
    pub size_bytes: u64,
    pub file_format: String,
    pub schema_version: Option<u32>,
}
