//! Ordered key/value trait for metadata records

use crate::Result;

pub trait Storage: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Conditional insert (`IF NOT EXISTS`). Returns `false` and leaves the
    /// stored value untouched when the key is already present.
    fn put_if_absent(&self, key: &[u8], value: &[u8]) -> Result<bool>;

    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Every entry whose key starts with `prefix`, in ascending key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Removes every entry under `prefix` and returns how many went.
    fn delete_prefix(&self, prefix: &[u8]) -> Result<usize> {
        let entries = self.scan_prefix(prefix)?;
        for (key, _) in &entries {
            self.delete(key)?;
        }
        Ok(entries.len())
    }
}
