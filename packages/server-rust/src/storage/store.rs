//! The [`RequestStore`] trait: durable home of provisioning requests and
//! their key batches, and the single source of truth for request status.
//!
//! Backends share the rule checks in this module so that every medium
//! enforces the same invariants:
//!
//! - status only moves `pending -> successful | failed`
//! - a request becomes `successful` only with a complete key batch
//! - a `failed` request carries no keys (the transition purges them)
//! - a batch is written at most once, all-or-nothing

use std::collections::HashSet;

use async_trait::async_trait;
use provisioner_core::{GeneratedKey, RequestId, RequestStatus, ValidatorRequest};

use super::error::StoreError;

/// Result of [`RequestStore::read`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSnapshot {
    /// The request as currently stored.
    pub request: ValidatorRequest,
    /// Key identifiers in generation order. Empty unless the request is
    /// `successful`.
    pub keys: Vec<String>,
}

/// Durable storage for provisioning requests and key batches.
///
/// Implementations: in-memory (tests, ephemeral runs), `redb` (embedded,
/// durable), `PostgreSQL`.
///
/// Every method is a single atomic operation against the medium. A
/// concurrent [`read`](RequestStore::read) never observes a half-written
/// batch or a status that does not match the stored keys.
///
/// Used as `Arc<dyn RequestStore>`.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Short backend name for logs and health output.
    fn backend_name(&self) -> &'static str;

    /// Insert a new request. The stored status is always `pending`.
    async fn create(&self, request: &ValidatorRequest) -> Result<(), StoreError>;

    /// Move a request to a terminal status.
    ///
    /// Rejects transitions away from a terminal state and transitions to
    /// `successful` without a complete batch. A transition to `failed`
    /// removes any stored keys of the request in the same write.
    async fn update_status(&self, id: &RequestId, status: RequestStatus)
        -> Result<(), StoreError>;

    /// Persist the whole key batch of a `pending` request, or nothing.
    async fn add_keys(
        &self,
        id: &RequestId,
        keys: &[GeneratedKey],
        fee_recipient: &str,
    ) -> Result<(), StoreError>;

    /// Read a request and, when `successful`, its key identifiers.
    async fn read(&self, id: &RequestId) -> Result<RequestSnapshot, StoreError>;

    /// Number of key rows stored for a request, regardless of status.
    async fn stored_key_count(&self, id: &RequestId) -> Result<usize, StoreError>;

    /// Cheap round-trip to the medium.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Validates a status transition against the stored request and batch size.
pub(crate) fn check_transition(
    request: &ValidatorRequest,
    next: RequestStatus,
    stored_keys: usize,
) -> Result<(), StoreError> {
    if !request.status.can_transition_to(next) {
        return Err(StoreError::IllegalTransition {
            id: request.request_id.clone(),
            from: request.status,
            to: next,
        });
    }
    if next == RequestStatus::Successful && stored_keys != request.num_keys as usize {
        return Err(StoreError::IncompleteBatch {
            id: request.request_id.clone(),
            expected: request.num_keys,
            found: stored_keys,
        });
    }
    Ok(())
}

/// Validates a key batch before any of it is written.
///
/// Cross-request key uniqueness is checked by each backend against its own
/// key index; this covers everything decidable from the request alone.
pub(crate) fn check_batch(
    request: &ValidatorRequest,
    existing_keys: usize,
    keys: &[GeneratedKey],
) -> Result<(), StoreError> {
    let reject = |reason: String| StoreError::BatchRejected {
        id: request.request_id.clone(),
        reason,
    };

    if request.status != RequestStatus::Pending {
        return Err(reject(format!("request is {}", request.status)));
    }
    if existing_keys > 0 {
        return Err(reject("a key batch is already stored".to_string()));
    }
    if keys.len() != request.num_keys as usize {
        return Err(reject(format!(
            "batch has {} keys, request asked for {}",
            keys.len(),
            request.num_keys
        )));
    }
    let mut seen = HashSet::with_capacity(keys.len());
    if let Some(dup) = keys.iter().find(|k| !seen.insert(k.key_id.as_str())) {
        return Err(reject(format!("duplicate key id in batch: {}", dup.key_id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn request(status: RequestStatus, num_keys: u32) -> ValidatorRequest {
        ValidatorRequest {
            status,
            ..ValidatorRequest::pending(RequestId::from("r-1"), num_keys, "0xfee", 0)
        }
    }

    fn keys(ids: &[&str]) -> Vec<GeneratedKey> {
        ids.iter()
            .map(|id| GeneratedKey {
                key_id: (*id).to_string(),
                material: "00".to_string(),
            })
            .collect()
    }

    #[test]
    fn pending_to_failed_is_always_allowed() {
        assert!(check_transition(&request(RequestStatus::Pending, 2), RequestStatus::Failed, 0).is_ok());
        assert!(check_transition(&request(RequestStatus::Pending, 2), RequestStatus::Failed, 2).is_ok());
    }

    #[test]
    fn successful_requires_complete_batch() {
        let err = check_transition(&request(RequestStatus::Pending, 3), RequestStatus::Successful, 0)
            .unwrap_err();
        assert!(matches!(err, StoreError::IncompleteBatch { expected: 3, found: 0, .. }));
        assert!(
            check_transition(&request(RequestStatus::Pending, 3), RequestStatus::Successful, 3)
                .is_ok()
        );
    }

    #[test]
    fn terminal_states_are_final() {
        for from in [RequestStatus::Successful, RequestStatus::Failed] {
            for to in RequestStatus::ALL {
                let err = check_transition(&request(from, 1), to, 1).unwrap_err();
                assert!(matches!(err, StoreError::IllegalTransition { .. }));
            }
        }
    }

    #[test]
    fn pending_to_pending_is_rejected() {
        let err = check_transition(&request(RequestStatus::Pending, 1), RequestStatus::Pending, 0)
            .unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));
    }

    #[test]
    fn batch_must_match_requested_count() {
        let req = request(RequestStatus::Pending, 2);
        assert!(check_batch(&req, 0, &keys(&["a", "b"])).is_ok());
        assert!(check_batch(&req, 0, &keys(&["a"])).is_err());
        assert!(check_batch(&req, 0, &keys(&["a", "b", "c"])).is_err());
    }

    #[test]
    fn batch_rejected_when_not_pending_or_already_stored() {
        assert!(check_batch(&request(RequestStatus::Failed, 1), 0, &keys(&["a"])).is_err());
        assert!(check_batch(&request(RequestStatus::Pending, 1), 1, &keys(&["a"])).is_err());
    }

    #[test]
    fn batch_rejects_duplicate_ids() {
        let err = check_batch(&request(RequestStatus::Pending, 2), 0, &keys(&["a", "a"]))
            .unwrap_err();
        assert!(err.to_string().contains("duplicate key id"));
    }

    fn any_status() -> impl Strategy<Value = RequestStatus> {
        prop_oneof![
            Just(RequestStatus::Pending),
            Just(RequestStatus::Successful),
            Just(RequestStatus::Failed),
        ]
    }

    proptest! {
        #[test]
        fn transition_accepted_exactly_when_legal(
            from in any_status(),
            to in any_status(),
            num_keys in 1u32..8,
            stored in 0usize..10,
        ) {
            let legal = from == RequestStatus::Pending
                && (to == RequestStatus::Failed
                    || (to == RequestStatus::Successful && stored == num_keys as usize));
            prop_assert_eq!(check_transition(&request(from, num_keys), to, stored).is_ok(), legal);
        }

        #[test]
        fn batch_of_distinct_ids_accepted_exactly_when_it_fits(
            status in any_status(),
            num_keys in 1u32..8,
            existing in 0usize..3,
            batch_len in 0usize..10,
        ) {
            let ids: Vec<String> = (0..batch_len).map(|i| format!("k-{i}")).collect();
            let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            let fits = status == RequestStatus::Pending
                && existing == 0
                && batch_len == num_keys as usize;
            prop_assert_eq!(
                check_batch(&request(status, num_keys), existing, &keys(&refs)).is_ok(),
                fits
            );
        }

        #[test]
        fn accepted_batches_never_repeat_an_id(ids in prop::collection::vec("[a-d]", 1..6)) {
            let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            let len = u32::try_from(refs.len()).unwrap();
            let unique: HashSet<&str> = refs.iter().copied().collect();
            let accepted = check_batch(&request(RequestStatus::Pending, len), 0, &keys(&refs)).is_ok();
            prop_assert_eq!(accepted, unique.len() == refs.len());
        }
    }
}
