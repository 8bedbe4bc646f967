//! IoT Bridge Store - Device store backends
//!
//! Two implementations of [`iotbridge_core::DeviceStore`]:
//! - [`MemoryStore`]: a lock-guarded map, lost on restart
//! - [`SqliteStore`]: a pooled SQLite database with one transaction per write

pub mod memory;
mod schema;
pub mod sqlite;

pub use memory::MemoryStore;
pub use schema::SCHEMA_VERSION;
pub use sqlite::SqliteStore;

use iotbridge_core::{DeviceStore, StoreError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Which store backend to run with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

/// Open a store for the given backend; `path` is only used by SQLite
pub fn open(backend: StoreBackend, path: &Path) -> Result<Arc<dyn DeviceStore>, StoreError> {
    match backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Sqlite => Ok(Arc::new(SqliteStore::open(path)?)),
    }
}
