//! HTTP handlers for the provisioner API.
//!
//! `AppState` is the shared state handed to every handler through axum's
//! `State` extractor.

pub mod health;
pub mod validators;

pub use health::{health_handler, liveness_handler, metrics_handler, readiness_handler};
pub use validators::{create_validators_handler, validator_status_handler};

use std::sync::Arc;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusHandle;

use super::ShutdownController;
use crate::service::LifecycleService;

/// Shared application state. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Submit/query entry points and the background task pool.
    pub lifecycle: Arc<LifecycleService>,
    /// Health state and HTTP in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    /// Prometheus render handle; `None` when no recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Process start time, for uptime.
    pub start_time: Instant,
}
