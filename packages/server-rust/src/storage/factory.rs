//! Backend selection for the [`RequestStore`].
//!
//! [`open_store`] is the dependency injection point: it turns a
//! [`StorageConfig`] into a shared `Arc<dyn RequestStore>`.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::storage::engines::MemoryRequestStore;
use crate::storage::error::StoreError;
use crate::storage::store::RequestStore;

/// Which medium backs the request store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Process memory. Lost on restart.
    Memory,
    /// Embedded redb database file. Requires the `redb` feature.
    Redb { path: PathBuf },
    /// `PostgreSQL` server. Requires the `postgres` feature.
    Postgres { url: String, max_connections: u32 },
}

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
        }
    }
}

/// Opens the configured backend and returns it as a shared trait object.
///
/// # Errors
///
/// Returns [`StoreError::Unavailable`] if the medium cannot be opened, or if
/// the selected backend was not compiled in.
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn RequestStore>, StoreError> {
    let store: Arc<dyn RequestStore> = match &config.backend {
        StorageBackend::Memory => Arc::new(MemoryRequestStore::new()),
        StorageBackend::Redb { path } => open_redb(path)?,
        StorageBackend::Postgres {
            url,
            max_connections,
        } => open_postgres(url, *max_connections).await?,
    };
    info!(backend = store.backend_name(), "Request store opened");
    Ok(store)
}

#[cfg(feature = "redb")]
fn open_redb(path: &std::path::Path) -> Result<Arc<dyn RequestStore>, StoreError> {
    Ok(Arc::new(crate::storage::engines::RedbRequestStore::open(path)?))
}

#[cfg(not(feature = "redb"))]
fn open_redb(_path: &std::path::Path) -> Result<Arc<dyn RequestStore>, StoreError> {
    Err(StoreError::Unavailable(
        "redb backend not compiled in (enable the `redb` feature)".to_string(),
    ))
}

#[cfg(feature = "postgres")]
async fn open_postgres(
    url: &str,
    max_connections: u32,
) -> Result<Arc<dyn RequestStore>, StoreError> {
    Ok(Arc::new(
        crate::storage::datastores::PostgresRequestStore::connect(url, max_connections).await?,
    ))
}

#[cfg(not(feature = "postgres"))]
#[allow(clippy::unused_async)]
async fn open_postgres(
    _url: &str,
    _max_connections: u32,
) -> Result<Arc<dyn RequestStore>, StoreError> {
    Err(StoreError::Unavailable(
        "postgres backend not compiled in (enable the `postgres` feature)".to_string(),
    ))
}
