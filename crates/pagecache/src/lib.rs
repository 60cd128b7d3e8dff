//! Read-through cache for rendered row pages and dataset listings.
//!
//! The cache is never the source of truth. When the backend cannot be
//! reached at startup every operation becomes a no-op (see [`connect`]).

mod backend;
mod cache;
mod keys;

pub use backend::{CacheBackend, MokaBackend};
pub use cache::{connect, BackendCache, CachedPage, DisabledCache, PageCache};
pub use keys::{datasets_list_key, RowsPageKey, DATASETS_LIST_PREFIX};

use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("Cache payload error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;
