//! Background processing of a single provisioning request.
//!
//! [`RequestProcessor::run`] drives one request from `pending` to a terminal
//! status:
//!
//! 1. generate the key batch
//! 2. persist the batch (atomic, all-or-nothing)
//! 3. flip the status to `successful`
//!
//! Keys are durable before the status flips, so a reader that observes
//! `successful` always finds the whole batch. Any fault records `failed`
//! instead. Only the terminal status write is retried, and only for
//! transient store errors.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use provisioner_core::{RequestId, RequestStatus, ValidatorRequest};
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::config::ServiceConfig;
use super::generator::KeyGenerator;
use crate::storage::{RequestStore, StoreError};

/// Final result of processing one request, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Keys are stored and the request is `successful`.
    Successful,
    /// The request is `failed`. `reason` is internal detail, never shown to
    /// clients.
    Failed { reason: String },
    /// No terminal status could be recorded; the request is still `pending`
    /// in the store.
    Stuck,
}

impl ProcessOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Successful => "successful",
            Self::Failed { .. } => "failed",
            Self::Stuck => "stuck",
        }
    }
}

/// Coordinates the key generator and the request store for one request.
pub struct RequestProcessor {
    store: Arc<dyn RequestStore>,
    generator: Arc<dyn KeyGenerator>,
    status_write_attempts: u32,
    status_retry_backoff: Duration,
}

impl RequestProcessor {
    #[must_use]
    pub fn new(
        store: Arc<dyn RequestStore>,
        generator: Arc<dyn KeyGenerator>,
        config: &ServiceConfig,
    ) -> Self {
        Self {
            store,
            generator,
            status_write_attempts: config.status_write_attempts.max(1),
            status_retry_backoff: config.status_retry_backoff(),
        }
    }

    /// Processes `request` to a terminal status. Never returns an error:
    /// every fault ends as [`ProcessOutcome::Failed`] or, if even that
    /// cannot be recorded, [`ProcessOutcome::Stuck`].
    pub async fn run(&self, request: &ValidatorRequest) -> ProcessOutcome {
        let span = info_span!(
            "process_request",
            request_id = %request.request_id,
            num_keys = request.num_keys,
        );
        self.run_inner(request).instrument(span).await
    }

    async fn run_inner(&self, request: &ValidatorRequest) -> ProcessOutcome {
        let id = &request.request_id;
        let started = Instant::now();

        let outcome = match self.provision(request).await {
            Ok(status) => Self::outcome_for(status, "request already failed"),
            Err(reason) => {
                warn!(%reason, "Request processing failed");
                match self.record_terminal(id, RequestStatus::Failed).await {
                    Ok(status) => Self::outcome_for(status, &reason),
                    Err(e) => {
                        error!(
                            error = %e,
                            attempts = self.status_write_attempts,
                            "Could not record terminal status; request left pending"
                        );
                        counter!("provisioner_requests_stuck_total").increment(1);
                        ProcessOutcome::Stuck
                    }
                }
            }
        };

        counter!("provisioner_requests_completed_total", "outcome" => outcome.as_str())
            .increment(1);
        info!(
            outcome = outcome.as_str(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Request processing finished"
        );
        outcome
    }

    /// Generate, persist, flip. Returns the terminal status now stored, or a
    /// failure reason.
    async fn provision(&self, request: &ValidatorRequest) -> Result<RequestStatus, String> {
        let id = &request.request_id;

        let started = Instant::now();
        let keys = self
            .generator
            .generate(request.num_keys)
            .await
            .map_err(|e| e.to_string())?;
        histogram!("provisioner_key_generation_seconds").record(started.elapsed().as_secs_f64());
        debug!(count = keys.len(), "Keys generated");

        self.store
            .add_keys(id, &keys, &request.fee_recipient)
            .await
            .map_err(|e| format!("persisting keys: {e}"))?;

        self.record_terminal(id, RequestStatus::Successful)
            .await
            .map_err(|e| format!("recording success: {e}"))
    }

    /// Writes a terminal status, retrying transient store errors.
    ///
    /// If the request is already terminal (for example an earlier attempt
    /// committed but reported an error), the stored status is returned.
    async fn record_terminal(
        &self,
        id: &RequestId,
        status: RequestStatus,
    ) -> Result<RequestStatus, StoreError> {
        let mut attempt = 1;
        loop {
            match self.store.update_status(id, status).await {
                Ok(()) => return Ok(status),
                Err(StoreError::IllegalTransition { from, .. }) if from.is_terminal() => {
                    return Ok(from);
                }
                Err(e) if e.is_retryable() && attempt < self.status_write_attempts => {
                    warn!(
                        error = %e,
                        attempt,
                        status = status.as_str(),
                        "Status write failed, retrying"
                    );
                    tokio::time::sleep(self.status_retry_backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn outcome_for(status: RequestStatus, reason: &str) -> ProcessOutcome {
        match status {
            RequestStatus::Successful => ProcessOutcome::Successful,
            _ => ProcessOutcome::Failed {
                reason: reason.to_string(),
            },
        }
    }
}
