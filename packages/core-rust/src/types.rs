//! Domain types for validator provisioning requests and their key batches.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Opaque, globally unique identifier of a provisioning request.
///
/// Generated by the server as a UUID v4 string, but treated as an opaque
/// string everywhere else (storage keys, URLs, logs).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Wraps an existing identifier string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the identifier, returning the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl AsRef<str> for RequestId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle status of a provisioning request.
///
/// State machine: `Pending -> Successful | Failed`. Both `Successful` and
/// `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Accepted and waiting for (or undergoing) key generation.
    Pending,
    /// Keys were generated and persisted.
    Successful,
    /// Processing failed; no keys are associated with the request.
    Failed,
}

impl RequestStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 3] = [Self::Pending, Self::Successful, Self::Failed];

    /// Returns the wire/storage representation of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Successful => "successful",
            Self::Failed => "failed",
        }
    }

    /// Returns `true` for `Successful` and `Failed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Returns `true` if moving from `self` to `next` is a legal transition.
    ///
    /// Only `Pending -> Successful` and `Pending -> Failed` are legal.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self == Self::Pending && next.is_terminal()
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown request status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for RequestStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "successful" => Ok(Self::Successful),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A request to provision a batch of validator keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorRequest {
    /// Unique request identifier.
    pub request_id: RequestId,
    /// Wall-clock creation time in millis since the Unix epoch.
    pub created_at: i64,
    /// Number of keys requested. Always positive.
    pub num_keys: u32,
    /// Address that receives fees for the generated keys.
    pub fee_recipient: String,
    /// Current lifecycle status.
    pub status: RequestStatus,
}

impl ValidatorRequest {
    /// Creates a new request in the `Pending` state.
    #[must_use]
    pub fn pending(
        request_id: RequestId,
        num_keys: u32,
        fee_recipient: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            request_id,
            created_at,
            num_keys,
            fee_recipient: fee_recipient.into(),
            status: RequestStatus::Pending,
        }
    }
}

/// A single key produced by a key generator, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedKey {
    /// Unique key identifier.
    pub key_id: String,
    /// Opaque key material (hex).
    pub material: String,
}

/// A persisted key belonging to a successful request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Unique key identifier.
    pub key_id: String,
    /// Request that owns this key.
    pub request_id: RequestId,
    /// Opaque key material (hex).
    pub material: String,
    /// Fee recipient copied from the request at generation time.
    pub fee_recipient: String,
}

impl KeyRecord {
    /// Builds the stored form of a generated key.
    #[must_use]
    pub fn from_generated(request_id: &RequestId, key: &GeneratedKey, fee_recipient: &str) -> Self {
        Self {
            key_id: key.key_id.clone(),
            request_id: request_id.clone(),
            material: key.material.clone(),
            fee_recipient: fee_recipient.to_string(),
        }
    }
}
