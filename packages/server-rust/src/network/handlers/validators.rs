//! `POST /validators` and `GET /validators/{request_id}`.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use provisioner_core::messages::{
    CreateValidatorsRequest, CreateValidatorsResponse, ValidatorStatusResponse,
};
use provisioner_core::{validate_fee_recipient, validate_key_count, RequestId};
use tracing::debug;

use super::AppState;
use crate::network::error::ApiError;
use crate::service::RequestOutcome;

/// Accepts a provisioning request and returns its id immediately.
///
/// Checks run in order: body shape, key count, fee recipient. Keys are
/// generated in the background.
///
/// # Errors
///
/// - 400 for a malformed body, a non-positive or oversized count, or a bad
///   address
/// - 503 while the server is shutting down
/// - 500 if the request could not be recorded
pub async fn create_validators_handler(
    State(state): State<AppState>,
    payload: Result<Json<CreateValidatorsRequest>, JsonRejection>,
) -> Result<Json<CreateValidatorsResponse>, ApiError> {
    let Json(body) = payload.map_err(|rejection| {
        debug!(error = %rejection, "Rejected validator request body");
        ApiError::InvalidPayload
    })?;

    let max_keys = state.lifecycle.max_keys_per_request();
    let num_keys = validate_key_count(body.num_validators, max_keys)?;
    validate_fee_recipient(&body.fee_recipient)?;

    if state.shutdown.is_shutting_down() {
        return Err(ApiError::ShuttingDown);
    }

    let request_id = state
        .lifecycle
        .submit(num_keys, &body.fee_recipient)
        .await
        .map_err(ApiError::from_submit)?;

    Ok(Json(CreateValidatorsResponse::accepted(request_id)))
}

/// Reports the status of a request; keys are included only once it has
/// succeeded.
///
/// # Errors
///
/// - 404 for an unknown id
/// - 500 if the store cannot be read
pub async fn validator_status_handler(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<ValidatorStatusResponse>, ApiError> {
    let outcome = state
        .lifecycle
        .query(&RequestId::new(request_id))
        .await
        .map_err(ApiError::from_query)?;

    Ok(Json(match outcome {
        RequestOutcome::InProgress => ValidatorStatusResponse::in_progress(),
        RequestOutcome::Succeeded { keys } => ValidatorStatusResponse::successful(keys),
        RequestOutcome::Failed { .. } => ValidatorStatusResponse::failed(),
    }))
}
