//! Request lifecycle: accept a provisioning request, process it in the
//! background, report its outcome.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use metrics::counter;
use provisioner_core::messages::PROCESSING_FAILED_MESSAGE;
use provisioner_core::{RequestId, RequestStatus, ValidatorRequest};
use tracing::info;

use super::config::ServiceConfig;
use super::generator::KeyGenerator;
use super::processor::RequestProcessor;
use super::worker::{SpawnError, TaskPool};
use crate::storage::{RequestStore, StoreError};

// ---------------------------------------------------------------------------
// Outcomes and errors
// ---------------------------------------------------------------------------

/// Client-visible state of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    InProgress,
    Succeeded { keys: Vec<String> },
    Failed { message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("num_validators must be positive")]
    InvalidKeyCount,
    #[error("num_validators must not exceed {max}")]
    KeyCountTooLarge { max: u32 },
    #[error("request {0} not found")]
    NotFound(RequestId),
    #[error("service is shutting down")]
    ShuttingDown,
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Store(other),
        }
    }
}

// ---------------------------------------------------------------------------
// LifecycleService
// ---------------------------------------------------------------------------

/// Entry point for the two core operations, `submit` and `query`.
pub struct LifecycleService {
    store: Arc<dyn RequestStore>,
    processor: Arc<RequestProcessor>,
    pool: TaskPool,
    max_keys_per_request: u32,
}

impl LifecycleService {
    #[must_use]
    pub fn new(
        store: Arc<dyn RequestStore>,
        generator: Arc<dyn KeyGenerator>,
        config: &ServiceConfig,
    ) -> Self {
        let processor = Arc::new(RequestProcessor::new(
            Arc::clone(&store),
            generator,
            config,
        ));
        Self {
            store,
            processor,
            pool: TaskPool::new(config.max_concurrent_tasks),
            max_keys_per_request: config.max_keys_per_request,
        }
    }

    /// Records a new `pending` request and schedules its processing.
    /// Returns as soon as the request is durable; keys are generated later.
    ///
    /// A pool slot is reserved before the request is recorded, so every
    /// stored request is guaranteed a background job even if a drain starts
    /// concurrently.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::InvalidKeyCount`] if `num_keys` is zero.
    /// - [`LifecycleError::KeyCountTooLarge`] above the configured maximum.
    /// - [`LifecycleError::ShuttingDown`] once [`drain`](Self::drain) started.
    /// - [`LifecycleError::Store`] if the request could not be recorded.
    ///
    /// Nothing is stored when an error is returned.
    pub async fn submit(
        &self,
        num_keys: u32,
        fee_recipient: &str,
    ) -> Result<RequestId, LifecycleError> {
        if num_keys == 0 {
            return Err(LifecycleError::InvalidKeyCount);
        }
        if num_keys > self.max_keys_per_request {
            return Err(LifecycleError::KeyCountTooLarge {
                max: self.max_keys_per_request,
            });
        }

        let id = RequestId::new(uuid::Uuid::new_v4().to_string());
        let reservation = match self.pool.reserve(id.clone()) {
            Ok(reservation) => reservation,
            Err(SpawnError::Closed) => return Err(LifecycleError::ShuttingDown),
            // Fresh UUIDs make this unreachable in practice.
            Err(SpawnError::AlreadyInFlight(id)) => {
                return Err(LifecycleError::Store(StoreError::AlreadyExists(id)));
            }
        };

        let request = ValidatorRequest::pending(id.clone(), num_keys, fee_recipient, now_millis());
        self.store.create(&request).await?;
        counter!("provisioner_requests_submitted_total").increment(1);

        let processor = Arc::clone(&self.processor);
        reservation.spawn(async move {
            processor.run(&request).await;
        });
        info!(request_id = %id, num_keys, "Request accepted");
        Ok(id)
    }

    /// Reports the current state of request `id`.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::NotFound`] for an unknown id.
    /// - [`LifecycleError::Store`] if the store cannot be read.
    pub async fn query(&self, id: &RequestId) -> Result<RequestOutcome, LifecycleError> {
        let snapshot = self.store.read(id).await?;
        Ok(match snapshot.request.status {
            RequestStatus::Pending => RequestOutcome::InProgress,
            RequestStatus::Successful => RequestOutcome::Succeeded {
                keys: snapshot.keys,
            },
            RequestStatus::Failed => RequestOutcome::Failed {
                message: PROCESSING_FAILED_MESSAGE.to_string(),
            },
        })
    }

    /// Requests accepted and not yet processed to completion.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pool.in_flight()
    }

    /// Requests currently generating keys, as opposed to queued for a slot.
    #[must_use]
    pub fn running(&self) -> usize {
        self.pool.running()
    }

    #[must_use]
    pub fn max_keys_per_request(&self) -> u32 {
        self.max_keys_per_request
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn RequestStore> {
        &self.store
    }

    /// Stops accepting submissions and waits up to `timeout` for background
    /// processing to finish. Returns `true` if everything completed.
    pub async fn drain(&self, timeout: Duration) -> bool {
        info!(in_flight = self.in_flight(), "Draining background processing");
        self.pool.drain(timeout).await
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
