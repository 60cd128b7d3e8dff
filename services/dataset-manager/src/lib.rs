//! Dataset manager core: versioned schemas, batch lifecycle, chunked row
//! storage, a disposable page cache and role-based masking, wired behind an
//! async service.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod exec;
pub mod export;
pub mod reader;
pub mod service;
pub mod state;

pub use config::ServiceConfig;
pub use coordinator::{IngestCoordinator, IngestOutcome, IngestRequest};
pub use error::{DatasetError, Result};
pub use export::ExportFormat;
pub use reader::{DatasetPage, DatasetReader, RowsPage, RowsQuery};
pub use service::DatasetService;
pub use state::{DatasetLocks, Stores};
