//! Wire message schemas for the provisioner HTTP API.
//!
//! All bodies are JSON with `snake_case` field names.

pub mod validators;

pub use validators::{
    CreateValidatorsRequest, CreateValidatorsResponse, ErrorResponse, ValidatorStatusResponse,
    CREATION_ACCEPTED_MESSAGE, IN_PROGRESS_MESSAGE, PROCESSING_FAILED_MESSAGE,
};
