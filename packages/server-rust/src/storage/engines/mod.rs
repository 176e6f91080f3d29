//! Request store backends that live in-process.

pub mod memory;
#[cfg(feature = "redb")]
pub mod redb_store;

pub use memory::MemoryRequestStore;
#[cfg(feature = "redb")]
pub use redb_store::RedbRequestStore;
