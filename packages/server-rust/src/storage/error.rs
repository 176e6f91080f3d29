//! Error type shared by every [`RequestStore`](super::RequestStore) backend.

use std::fmt;

use provisioner_core::{RequestId, RequestStatus};

/// Errors returned by request store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("request not found: {0}")]
    NotFound(RequestId),
    #[error("request already exists: {0}")]
    AlreadyExists(RequestId),
    #[error("illegal status transition for {id}: {from} -> {to}")]
    IllegalTransition {
        id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
    },
    #[error("request {id} has {found} stored keys, expected {expected}")]
    IncompleteBatch {
        id: RequestId,
        expected: u32,
        found: usize,
    },
    #[error("key batch rejected for {id}: {reason}")]
    BatchRejected { id: RequestId, reason: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Wraps a backend failure (I/O, driver, serialization) as `Unavailable`.
    pub fn unavailable(err: impl fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }

    /// Returns `true` if retrying the same operation may succeed.
    ///
    /// Only medium failures are transient; every other variant is a
    /// deterministic rejection.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
