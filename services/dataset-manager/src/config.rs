use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rowstore::{DEFAULT_CHUNK_SIZE, DEFAULT_WRITE_BATCH_SIZE};

#[derive(Clone, Debug, PartialEq)]
pub struct ServiceConfig {
    pub chunk_size: usize,
    pub write_batch_size: usize,
    pub cache_ttl: Duration,
    pub cache_max_entries: u64,
    pub call_timeout: Duration,
    pub unmask_roles: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            write_batch_size: DEFAULT_WRITE_BATCH_SIZE,
            cache_ttl: pagecache::DEFAULT_TTL,
            cache_max_entries: 10_000,
            call_timeout: Duration::from_millis(5_000),
            unmask_roles: vec!["admin".to_string()],
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let chunk_size = parse_or(&lookup, "DM_CHUNK_SIZE", defaults.chunk_size)?;
        let write_batch_size = parse_or(&lookup, "DM_WRITE_BATCH_SIZE", defaults.write_batch_size)?;
        let ttl_secs = parse_or(&lookup, "DM_CACHE_TTL_SECS", defaults.cache_ttl.as_secs())?;
        let cache_max_entries = parse_or(&lookup, "DM_CACHE_MAX_ENTRIES", defaults.cache_max_entries)?;
        let timeout_ms = parse_or(&lookup, "DM_CALL_TIMEOUT_MS", 5_000u64)?;
        let unmask_roles = match lookup("DM_UNMASK_ROLES") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect(),
            None => defaults.unmask_roles,
        };

        // Fail fast on values that would stall or disable the store
        if chunk_size == 0 {
            bail!("DM_CHUNK_SIZE must be greater than zero");
        }
        if write_batch_size == 0 {
            bail!("DM_WRITE_BATCH_SIZE must be greater than zero");
        }
        if ttl_secs == 0 {
            bail!("DM_CACHE_TTL_SECS must be greater than zero");
        }
        if timeout_ms == 0 {
            bail!("DM_CALL_TIMEOUT_MS must be greater than zero");
        }
        if unmask_roles.is_empty() {
            bail!("DM_UNMASK_ROLES must name at least one role");
        }

        Ok(Self {
            chunk_size,
            write_batch_size,
            cache_ttl: Duration::from_secs(ttl_secs),
            cache_max_entries,
            call_timeout: Duration::from_millis(timeout_ms),
            unmask_roles,
        })
    }

    pub fn row_store(&self) -> rowstore::RowStoreConfig {
        rowstore::RowStoreConfig {
            chunk_size: self.chunk_size,
            write_batch_size: self.write_batch_size,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ServiceConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        assert_eq!(config(&[]).unwrap(), ServiceConfig::default());
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("DM_CHUNK_SIZE", "500"),
            ("DM_CACHE_TTL_SECS", "60"),
            ("DM_UNMASK_ROLES", "admin, auditor ,"),
        ])
        .unwrap();
        assert_eq!(cfg.chunk_size, 500);
        assert_eq!(cfg.cache_ttl, Duration::from_secs(60));
        assert_eq!(cfg.unmask_roles, vec!["admin".to_string(), "auditor".to_string()]);
        assert_eq!(cfg.row_store().chunk_size, 500);
    }

    #[test]
    fn test_invalid_values_fail() {
        assert!(config(&[("DM_CHUNK_SIZE", "0")]).is_err());
        assert!(config(&[("DM_WRITE_BATCH_SIZE", "lots")]).is_err());
        assert!(config(&[("DM_UNMASK_ROLES", " , ")]).is_err());
        let err = config(&[("DM_CALL_TIMEOUT_MS", "-1")]).unwrap_err();
        assert!(err.to_string().contains("DM_CALL_TIMEOUT_MS"));
    }
}
