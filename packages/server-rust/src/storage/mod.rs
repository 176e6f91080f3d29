//! Persistence for provisioning requests and their key batches.
//!
//! - [`RequestStore`]: the storage contract every backend implements
//! - [`engines`]: in-process backends (memory, redb)
//! - [`datastores`]: external database backends (`PostgreSQL`)
//! - [`factory`]: backend selection from configuration

pub mod datastores;
pub mod engines;
pub mod error;
pub mod factory;
pub mod store;

#[cfg(feature = "postgres")]
pub use datastores::PostgresRequestStore;
pub use engines::MemoryRequestStore;
#[cfg(feature = "redb")]
pub use engines::RedbRequestStore;
pub use error::StoreError;
pub use factory::{open_store, StorageBackend, StorageConfig};
pub use store::{RequestSnapshot, RequestStore};
