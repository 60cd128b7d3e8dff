//! Dynamic table trait

use crate::{ColumnDef, PartitionKey, Result, RowWrite, StoredRow, TableDef};

/// Per-entity physical tables created at runtime.
///
/// Implementations must tolerate concurrent callers; each call is a single
/// round trip and none of them is transactional across partitions.
pub trait TableStore: Send + Sync {
    /// Column set and key layout of a table, `None` if it does not exist.
    fn describe_table(&self, table: &str) -> Result<Option<TableDef>>;

    /// `CREATE TABLE IF NOT EXISTS`. Returns `true` when the table was created.
    fn create_table(&self, def: &TableDef) -> Result<bool>;

    /// `ALTER TABLE ADD` for each column not already present.
    /// Returns the number of columns added.
    fn add_columns(&self, table: &str, columns: &[ColumnDef]) -> Result<usize>;

    /// `DROP TABLE IF EXISTS`. Returns `true` when a table was dropped.
    fn drop_table(&self, table: &str) -> Result<bool>;

    /// Unlogged batch write. Rows land independently: a failure part way
    /// through leaves the earlier rows of the same call committed.
    fn write_rows(&self, table: &str, rows: &[RowWrite]) -> Result<()>;

    /// Rows of one partition in ascending row id order, at most `limit` of
    /// them. `projection` restricts the returned cells to the named columns.
    fn scan_partition(
        &self,
        table: &str,
        key: &PartitionKey,
        projection: Option<&[String]>,
        limit: Option<usize>,
    ) -> Result<Vec<StoredRow>>;

    /// Removes a whole partition. Deleting an absent partition is a no-op.
    fn delete_partition(&self, table: &str, key: &PartitionKey) -> Result<()>;
}
