//! Durable [`RequestStore`] backed by an embedded `redb` database.
//!
//! Each store operation is exactly one redb transaction, so the batch
//! insert, the status flip (with its key purge on failure), and every read
//! are atomic and isolated. Records are stored as JSON.
//!
//! redb is synchronous; operations run on the blocking thread pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use provisioner_core::{GeneratedKey, KeyRecord, RequestId, RequestStatus, ValidatorRequest};
use redb::backends::InMemoryBackend;
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::storage::error::StoreError;
use crate::storage::store::{check_batch, check_transition, RequestSnapshot, RequestStore};

/// request id -> `ValidatorRequest`
const REQUESTS: TableDefinition<&str, &[u8]> = TableDefinition::new("validator_requests");
/// key id -> `KeyRecord`
const KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("validator_keys");
/// request id -> ordered key ids
const BATCHES: TableDefinition<&str, &[u8]> = TableDefinition::new("validator_batches");

/// Request store persisted in a single redb database file.
#[derive(Clone)]
pub struct RedbRequestStore {
    db: Arc<Database>,
}

impl RedbRequestStore {
    /// Opens (or creates) the database at `path` and ensures all tables exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(StoreError::unavailable)?;
        Self::from_database(db)
    }

    /// Creates a store on a non-persistent in-memory backend.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the backend cannot be initialized.
    pub fn in_memory() -> Result<Self, StoreError> {
        let db = Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .map_err(StoreError::unavailable)?;
        Self::from_database(db)
    }

    fn from_database(db: Database) -> Result<Self, StoreError> {
        let txn = db.begin_write().map_err(StoreError::unavailable)?;
        {
            txn.open_table(REQUESTS).map_err(StoreError::unavailable)?;
            txn.open_table(KEYS).map_err(StoreError::unavailable)?;
            txn.open_table(BATCHES).map_err(StoreError::unavailable)?;
        }
        txn.commit().map_err(StoreError::unavailable)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Runs a blocking database closure on the blocking thread pool.
    async fn with_db<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(StoreError::unavailable)?
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(StoreError::unavailable)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(StoreError::unavailable)
}

fn load_request(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    id: &RequestId,
) -> Result<Option<ValidatorRequest>, StoreError> {
    table
        .get(id.as_str())
        .map_err(StoreError::unavailable)?
        .map(|guard| decode(guard.value()))
        .transpose()
}

fn load_batch(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    id: &RequestId,
) -> Result<Vec<String>, StoreError> {
    Ok(table
        .get(id.as_str())
        .map_err(StoreError::unavailable)?
        .map(|guard| decode(guard.value()))
        .transpose()?
        .unwrap_or_default())
}

#[async_trait]
impl RequestStore for RedbRequestStore {
    fn backend_name(&self) -> &'static str {
        "redb"
    }

    async fn create(&self, request: &ValidatorRequest) -> Result<(), StoreError> {
        let stored = ValidatorRequest {
            status: RequestStatus::Pending,
            ..request.clone()
        };
        self.with_db(move |db| {
            let txn = db.begin_write().map_err(StoreError::unavailable)?;
            {
                let mut requests = txn.open_table(REQUESTS).map_err(StoreError::unavailable)?;
                if load_request(&requests, &stored.request_id)?.is_some() {
                    return Err(StoreError::AlreadyExists(stored.request_id));
                }
                let bytes = encode(&stored)?;
                requests
                    .insert(stored.request_id.as_str(), bytes.as_slice())
                    .map_err(StoreError::unavailable)?;
            }
            txn.commit().map_err(StoreError::unavailable)
        })
        .await
    }

    async fn update_status(
        &self,
        id: &RequestId,
        status: RequestStatus,
    ) -> Result<(), StoreError> {
        let id = id.clone();
        self.with_db(move |db| {
            let txn = db.begin_write().map_err(StoreError::unavailable)?;
            {
                let mut requests = txn.open_table(REQUESTS).map_err(StoreError::unavailable)?;
                let mut request =
                    load_request(&requests, &id)?.ok_or_else(|| StoreError::NotFound(id.clone()))?;
                let mut batches = txn.open_table(BATCHES).map_err(StoreError::unavailable)?;
                let batch = load_batch(&batches, &id)?;
                check_transition(&request, status, batch.len())?;

                if status == RequestStatus::Failed && !batch.is_empty() {
                    let mut keys = txn.open_table(KEYS).map_err(StoreError::unavailable)?;
                    for key_id in &batch {
                        keys.remove(key_id.as_str()).map_err(StoreError::unavailable)?;
                    }
                    batches.remove(id.as_str()).map_err(StoreError::unavailable)?;
                }

                request.status = status;
                let bytes = encode(&request)?;
                requests
                    .insert(id.as_str(), bytes.as_slice())
                    .map_err(StoreError::unavailable)?;
            }
            txn.commit().map_err(StoreError::unavailable)
        })
        .await
    }

    async fn add_keys(
        &self,
        id: &RequestId,
        keys: &[GeneratedKey],
        fee_recipient: &str,
    ) -> Result<(), StoreError> {
        let id = id.clone();
        let keys = keys.to_vec();
        let fee_recipient = fee_recipient.to_string();
        self.with_db(move |db| {
            // Any early return drops `txn` uncommitted, which aborts it.
            let txn = db.begin_write().map_err(StoreError::unavailable)?;
            {
                let requests = txn.open_table(REQUESTS).map_err(StoreError::unavailable)?;
                let request =
                    load_request(&requests, &id)?.ok_or_else(|| StoreError::NotFound(id.clone()))?;
                let mut batches = txn.open_table(BATCHES).map_err(StoreError::unavailable)?;
                let existing = load_batch(&batches, &id)?.len();
                check_batch(&request, existing, &keys)?;

                let mut key_table = txn.open_table(KEYS).map_err(StoreError::unavailable)?;
                let mut ids = Vec::with_capacity(keys.len());
                for key in &keys {
                    let taken = key_table
                        .get(key.key_id.as_str())
                        .map_err(StoreError::unavailable)?
                        .is_some();
                    if taken {
                        return Err(StoreError::BatchRejected {
                            id: id.clone(),
                            reason: format!("key id already stored: {}", key.key_id),
                        });
                    }
                    let bytes = encode(&KeyRecord::from_generated(&id, key, &fee_recipient))?;
                    key_table
                        .insert(key.key_id.as_str(), bytes.as_slice())
                        .map_err(StoreError::unavailable)?;
                    ids.push(key.key_id.clone());
                }
                let bytes = encode(&ids)?;
                batches
                    .insert(id.as_str(), bytes.as_slice())
                    .map_err(StoreError::unavailable)?;
            }
            txn.commit().map_err(StoreError::unavailable)
        })
        .await
    }

    async fn read(&self, id: &RequestId) -> Result<RequestSnapshot, StoreError> {
        let id = id.clone();
        self.with_db(move |db| {
            let txn = db.begin_read().map_err(StoreError::unavailable)?;
            let requests = txn.open_table(REQUESTS).map_err(StoreError::unavailable)?;
            let request =
                load_request(&requests, &id)?.ok_or_else(|| StoreError::NotFound(id.clone()))?;
            let keys = if request.status == RequestStatus::Successful {
                let batches = txn.open_table(BATCHES).map_err(StoreError::unavailable)?;
                load_batch(&batches, &id)?
            } else {
                Vec::new()
            };
            Ok(RequestSnapshot { request, keys })
        })
        .await
    }

    async fn stored_key_count(&self, id: &RequestId) -> Result<usize, StoreError> {
        let id = id.clone();
        self.with_db(move |db| {
            let txn = db.begin_read().map_err(StoreError::unavailable)?;
            let requests = txn.open_table(REQUESTS).map_err(StoreError::unavailable)?;
            if load_request(&requests, &id)?.is_none() {
                return Err(StoreError::NotFound(id));
            }
            let batches = txn.open_table(BATCHES).map_err(StoreError::unavailable)?;
            Ok(load_batch(&batches, &id)?.len())
        })
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.with_db(|db| {
            let txn = db.begin_read().map_err(StoreError::unavailable)?;
            txn.open_table(REQUESTS).map_err(StoreError::unavailable)?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(id: &str, num_keys: u32) -> ValidatorRequest {
        ValidatorRequest::pending(RequestId::from(id), num_keys, "0xfee", 1_700_000_000_000)
    }

    fn batch(prefix: &str, n: usize) -> Vec<GeneratedKey> {
        (0..n)
            .map(|i| GeneratedKey {
                key_id: format!("{prefix}-{i}"),
                material: format!("{i:02x}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn full_success_path() {
        let store = RedbRequestStore::in_memory().unwrap();
        let id = RequestId::from("r-1");
        store.create(&pending("r-1", 2)).await.unwrap();
        store.add_keys(&id, &batch("k", 2), "0xfee").await.unwrap();

        // Keys stored but status not flipped yet: still hidden.
        assert!(store.read(&id).await.unwrap().keys.is_empty());

        store.update_status(&id, RequestStatus::Successful).await.unwrap();
        let snap = store.read(&id).await.unwrap();
        assert_eq!(snap.request.status, RequestStatus::Successful);
        assert_eq!(snap.keys, vec!["k-0", "k-1"]);
    }

    #[tokio::test]
    async fn failed_transition_purges_batch() {
        let store = RedbRequestStore::in_memory().unwrap();
        let id = RequestId::from("r-1");
        store.create(&pending("r-1", 2)).await.unwrap();
        store.add_keys(&id, &batch("k", 2), "0xfee").await.unwrap();
        store.update_status(&id, RequestStatus::Failed).await.unwrap();

        assert_eq!(store.stored_key_count(&id).await.unwrap(), 0);

        // Purged key ids are free again.
        store.create(&pending("r-2", 2)).await.unwrap();
        store
            .add_keys(&RequestId::from("r-2"), &batch("k", 2), "0xfee")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejected_batch_leaves_no_rows() {
        let store = RedbRequestStore::in_memory().unwrap();
        store.create(&pending("r-1", 1)).await.unwrap();
        store.create(&pending("r-2", 3)).await.unwrap();
        store
            .add_keys(&RequestId::from("r-1"), &batch("k", 1), "0xfee")
            .await
            .unwrap();

        // Third key collides with r-1's "k-0" only after two inserts succeeded.
        let mut keys = batch("x", 2);
        keys.push(GeneratedKey {
            key_id: "k-0".to_string(),
            material: "ff".to_string(),
        });
        let err = store
            .add_keys(&RequestId::from("r-2"), &keys, "0xfee")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::BatchRejected { .. }));
        assert_eq!(store.stored_key_count(&RequestId::from("r-2")).await.unwrap(), 0);

        // The aborted transaction did not leak "x-0"/"x-1" into the key index.
        store.create(&pending("r-3", 2)).await.unwrap();
        store
            .add_keys(&RequestId::from("r-3"), &batch("x", 2), "0xfee")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn guards_terminal_status() {
        let store = RedbRequestStore::in_memory().unwrap();
        let id = RequestId::from("r-1");
        store.create(&pending("r-1", 1)).await.unwrap();
        store.add_keys(&id, &batch("k", 1), "0xfee").await.unwrap();
        store.update_status(&id, RequestStatus::Successful).await.unwrap();

        let err = store.update_status(&id, RequestStatus::Failed).await.unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));
        assert_eq!(store.read(&id).await.unwrap().keys.len(), 1);
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provisioner.redb");
        let id = RequestId::from("r-1");

        {
            let store = RedbRequestStore::open(&path).unwrap();
            store.create(&pending("r-1", 1)).await.unwrap();
            store.add_keys(&id, &batch("k", 1), "0xfee").await.unwrap();
            store.update_status(&id, RequestStatus::Successful).await.unwrap();
        }

        let reopened = RedbRequestStore::open(&path).unwrap();
        let snap = reopened.read(&id).await.unwrap();
        assert_eq!(snap.request.status, RequestStatus::Successful);
        assert_eq!(snap.keys, vec!["k-0"]);
    }

    #[tokio::test]
    async fn duplicate_create_and_unknown_read() {
        let store = RedbRequestStore::in_memory().unwrap();
        store.create(&pending("r-1", 1)).await.unwrap();
        assert!(matches!(
            store.create(&pending("r-1", 1)).await.unwrap_err(),
            StoreError::AlreadyExists(_)
        ));
        assert!(store
            .read(&RequestId::from("nope"))
            .await
            .unwrap_err()
            .is_not_found());
        store.ping().await.unwrap();
    }
}
