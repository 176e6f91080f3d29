//! Mapping of service errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use provisioner_core::messages::ErrorResponse;
use provisioner_core::ValidationError;
use tracing::error;

use crate::service::LifecycleError;

/// Errors returned by the provisioner HTTP handlers. The `Display` text is
/// the client-facing message.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request payload")]
    InvalidPayload,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Request not found")]
    NotFound,
    #[error("Service is shutting down")]
    ShuttingDown,
    #[error("Failed to create validator request")]
    CreateFailed(#[source] LifecycleError),
    #[error("Failed to read validator request")]
    ReadFailed(#[source] LifecycleError),
}

impl ApiError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidPayload | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::CreateFailed(_) | Self::ReadFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Maps a failed submission.
    #[must_use]
    pub fn from_submit(err: LifecycleError) -> Self {
        match err {
            LifecycleError::InvalidKeyCount => Self::Validation(ValidationError::InvalidKeyCount),
            LifecycleError::KeyCountTooLarge { max } => {
                Self::Validation(ValidationError::KeyCountTooLarge { max })
            }
            LifecycleError::ShuttingDown => Self::ShuttingDown,
            other => Self::CreateFailed(other),
        }
    }

    /// Maps a failed status lookup.
    #[must_use]
    pub fn from_query(err: LifecycleError) -> Self {
        match err {
            LifecycleError::NotFound(_) => Self::NotFound,
            other => Self::ReadFailed(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if let Self::CreateFailed(source) | Self::ReadFailed(source) = &self {
            error!(error = %source, "{}", self);
        }
        (status, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use provisioner_core::RequestId;

    use super::*;
    use crate::storage::StoreError;

    #[test]
    fn status_codes() {
        assert_eq!(ApiError::InvalidPayload.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(ValidationError::InvalidFeeRecipient).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::ShuttingDown.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn submit_errors_map_to_client_messages() {
        let store_down = LifecycleError::Store(StoreError::unavailable("pool timed out"));
        let err = ApiError::from_submit(store_down);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Failed to create validator request");

        let err = ApiError::from_submit(LifecycleError::InvalidKeyCount);
        assert_eq!(err.to_string(), "num_validators must be positive");

        let err = ApiError::from_submit(LifecycleError::KeyCountTooLarge { max: 10 });
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "num_validators must not exceed 10");
    }

    #[test]
    fn query_not_found_is_404() {
        let err = ApiError::from_query(LifecycleError::NotFound(RequestId::from("x")));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "Request not found");
    }
}
