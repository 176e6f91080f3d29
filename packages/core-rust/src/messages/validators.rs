//! Request and response bodies for `POST /validators` and
//! `GET /validators/{request_id}`.

use serde::{Deserialize, Serialize};

use crate::types::{RequestId, RequestStatus};

/// Message returned alongside a freshly accepted request id.
pub const CREATION_ACCEPTED_MESSAGE: &str = "Validator creation in progress";

/// Message returned while a request is still `pending`.
pub const IN_PROGRESS_MESSAGE: &str = "Validator creation is in progress";

/// Message returned for every `failed` request, regardless of cause.
pub const PROCESSING_FAILED_MESSAGE: &str = "Error processing request";

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Body of `POST /validators`.
///
/// `num_validators` is signed so that negative counts deserialize and are
/// rejected by validation with a precise message instead of a parse error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateValidatorsRequest {
    /// Number of validator keys to generate.
    pub num_validators: i64,
    /// Address that receives fees for the generated keys.
    pub fee_recipient: String,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Body returned by `POST /validators` on acceptance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateValidatorsResponse {
    pub request_id: RequestId,
    pub message: String,
}

impl CreateValidatorsResponse {
    /// Builds the acceptance response for `request_id`.
    #[must_use]
    pub fn accepted(request_id: RequestId) -> Self {
        Self {
            request_id,
            message: CREATION_ACCEPTED_MESSAGE.to_string(),
        }
    }
}

/// Body returned by `GET /validators/{request_id}`.
///
/// Exactly one of `keys` (successful) or `message` (pending/failed) is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorStatusResponse {
    pub status: RequestStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub keys: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

impl ValidatorStatusResponse {
    /// Response for a request still being processed.
    #[must_use]
    pub fn in_progress() -> Self {
        Self {
            status: RequestStatus::Pending,
            keys: None,
            message: Some(IN_PROGRESS_MESSAGE.to_string()),
        }
    }

    /// Response for a request whose keys are ready.
    #[must_use]
    pub fn successful(keys: Vec<String>) -> Self {
        Self {
            status: RequestStatus::Successful,
            keys: Some(keys),
            message: None,
        }
    }

    /// Response for a failed request. The message is always the same text.
    #[must_use]
    pub fn failed() -> Self {
        Self {
            status: RequestStatus::Failed,
            keys: None,
            message: Some(PROCESSING_FAILED_MESSAGE.to_string()),
        }
    }
}

/// Error body for non-2xx responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn create_request_parses_snake_case() {
        let body = json!({
            "num_validators": 3,
            "fee_recipient": "0x1234567890abcdef1234567890abcdef12345678",
        });
        let req: CreateValidatorsRequest = serde_json::from_value(body).unwrap();
        assert_eq!(req.num_validators, 3);
        assert_eq!(req.fee_recipient, "0x1234567890abcdef1234567890abcdef12345678");
    }

    #[test]
    fn create_request_accepts_negative_count() {
        let body = json!({ "num_validators": -1, "fee_recipient": "x" });
        let req: CreateValidatorsRequest = serde_json::from_value(body).unwrap();
        assert_eq!(req.num_validators, -1);
    }

    #[test]
    fn accepted_response_shape() {
        let resp = CreateValidatorsResponse::accepted(RequestId::from("abc"));
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            value,
            json!({ "request_id": "abc", "message": "Validator creation in progress" })
        );
    }

    #[test]
    fn successful_status_omits_message() {
        let resp = ValidatorStatusResponse::successful(vec!["k1".into(), "k2".into()]);
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value, json!({ "status": "successful", "keys": ["k1", "k2"] }));
    }

    #[test]
    fn failed_status_has_fixed_message_and_no_keys() {
        let value = serde_json::to_value(ValidatorStatusResponse::failed()).unwrap();
        assert_eq!(
            value,
            json!({ "status": "failed", "message": "Error processing request" })
        );
    }

    #[test]
    fn pending_status_reports_in_progress() {
        let value = serde_json::to_value(ValidatorStatusResponse::in_progress()).unwrap();
        assert_eq!(value["status"], "pending");
        assert_eq!(value["message"], IN_PROGRESS_MESSAGE);
        assert!(value.get("keys").is_none());
    }
}
