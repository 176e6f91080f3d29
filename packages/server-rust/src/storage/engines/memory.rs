//! In-memory [`RequestStore`] implementation.
//!
//! All three tables live behind a single [`RwLock`], so every operation is
//! one critical section: a batch insert is invisible until complete, and a
//! read sees the status and the keys from the same instant. Not durable
//! across restarts.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use provisioner_core::{GeneratedKey, KeyRecord, RequestId, RequestStatus, ValidatorRequest};

use crate::storage::error::StoreError;
use crate::storage::store::{check_batch, check_transition, RequestSnapshot, RequestStore};

#[derive(Debug, Default)]
struct Tables {
    requests: HashMap<RequestId, ValidatorRequest>,
    /// Global key index: key id -> record. Enforces cross-request uniqueness.
    keys: HashMap<String, KeyRecord>,
    /// Key ids per request, in generation order.
    batches: HashMap<RequestId, Vec<String>>,
}

/// In-memory request store for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryRequestStore {
    tables: RwLock<Tables>,
}

impl MemoryRequestStore {
    /// Creates a new, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of requests currently stored.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.tables.read().requests.len()
    }

    /// Total number of key rows across all requests.
    #[must_use]
    pub fn total_key_count(&self) -> usize {
        self.tables.read().keys.len()
    }

    /// Stored key records for a request, in generation order.
    #[must_use]
    pub fn key_records(&self, id: &RequestId) -> Vec<KeyRecord> {
        let tables = self.tables.read();
        tables
            .batches
            .get(id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|key_id| tables.keys.get(key_id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl RequestStore for MemoryRequestStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, request: &ValidatorRequest) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if tables.requests.contains_key(&request.request_id) {
            return Err(StoreError::AlreadyExists(request.request_id.clone()));
        }
        let stored = ValidatorRequest {
            status: RequestStatus::Pending,
            ..request.clone()
        };
        tables.requests.insert(request.request_id.clone(), stored);
        Ok(())
    }

    async fn update_status(
        &self,
        id: &RequestId,
        status: RequestStatus,
    ) -> Result<(), StoreError> {
        let mut guard = self.tables.write();
        let tables = &mut *guard;

        let request = tables
            .requests
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let stored_keys = tables.batches.get(id).map_or(0, Vec::len);
        check_transition(request, status, stored_keys)?;

        if status == RequestStatus::Failed {
            if let Some(ids) = tables.batches.remove(id) {
                for key_id in ids {
                    tables.keys.remove(&key_id);
                }
            }
        }
        request.status = status;
        Ok(())
    }

    async fn add_keys(
        &self,
        id: &RequestId,
        keys: &[GeneratedKey],
        fee_recipient: &str,
    ) -> Result<(), StoreError> {
        let mut guard = self.tables.write();
        let tables = &mut *guard;

        let request = tables
            .requests
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let existing = tables.batches.get(id).map_or(0, Vec::len);
        check_batch(request, existing, keys)?;

        // Validate everything before the first insert so a rejection leaves
        // no partial rows behind.
        if let Some(taken) = keys.iter().find(|k| tables.keys.contains_key(&k.key_id)) {
            return Err(StoreError::BatchRejected {
                id: id.clone(),
                reason: format!("key id already stored: {}", taken.key_id),
            });
        }

        let mut ids = Vec::with_capacity(keys.len());
        for key in keys {
            tables.keys.insert(
                key.key_id.clone(),
                KeyRecord::from_generated(id, key, fee_recipient),
            );
            ids.push(key.key_id.clone());
        }
        tables.batches.insert(id.clone(), ids);
        Ok(())
    }

    async fn read(&self, id: &RequestId) -> Result<RequestSnapshot, StoreError> {
        let tables = self.tables.read();
        let request = tables
            .requests
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let keys = if request.status == RequestStatus::Successful {
            tables.batches.get(id).cloned().unwrap_or_default()
        } else {
            Vec::new()
        };
        Ok(RequestSnapshot { request, keys })
    }

    async fn stored_key_count(&self, id: &RequestId) -> Result<usize, StoreError> {
        let tables = self.tables.read();
        if !tables.requests.contains_key(id) {
            return Err(StoreError::NotFound(id.clone()));
        }
        Ok(tables.batches.get(id).map_or(0, Vec::len))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
