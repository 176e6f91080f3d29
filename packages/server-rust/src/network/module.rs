//! HTTP server lifecycle.
//!
//! Deferred startup: `new()` wires shared state, `start()` binds the
//! listener, and `serve()` accepts requests until shutdown, then drains HTTP
//! requests and background processing.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{
    create_validators_handler, health_handler, liveness_handler, metrics_handler,
    readiness_handler, validator_status_handler, AppState,
};
use super::middleware::{build_http_layers, track_in_flight};
use super::shutdown::ShutdownController;
use crate::service::LifecycleService;

pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
    lifecycle: Arc<LifecycleService>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl NetworkModule {
    /// Creates the module without binding a port.
    #[must_use]
    pub fn new(config: NetworkConfig, lifecycle: Arc<LifecycleService>) -> Self {
        Self {
            config,
            listener: None,
            shutdown: Arc::new(ShutdownController::new()),
            lifecycle,
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Exposes `handle` on `GET /metrics`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the router with all routes and middleware.
    ///
    /// - `POST /validators`
    /// - `GET /validators/{request_id}`
    /// - `GET /health`, `/health/live`, `/health/ready`
    /// - `GET /metrics`
    pub fn build_router(&self) -> Router {
        let state = AppState {
            lifecycle: Arc::clone(&self.lifecycle),
            shutdown: Arc::clone(&self.shutdown),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
        };

        Router::new()
            .route("/validators", post(create_validators_handler))
            .route("/validators/{request_id}", get(validator_status_handler))
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .layer(axum::middleware::from_fn_with_state(
                Arc::clone(&self.shutdown),
                track_in_flight,
            ))
            .layer(RequestBodyLimitLayer::new(self.config.max_body_bytes))
            .layer(build_http_layers(&self.config))
            .with_state(state)
    }

    /// Binds the listener and returns the bound port (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let port = listener.local_addr()?.port();
        info!(host = %self.config.host, port, "HTTP listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves, then drains.
    ///
    /// On the shutdown signal the server moves to `Draining` (new submissions
    /// get 503), stops accepting connections, waits for open HTTP requests,
    /// and finally waits for background processing, each bounded by
    /// `drain_timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or the server hits a
    /// fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        let router = self.build_router();
        let controller = Arc::clone(&self.shutdown);

        self.shutdown.set_ready();
        info!("Serving HTTP");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("Shutdown signal received");
                controller.begin_draining();
            })
            .await?;

        self.drain().await;
        Ok(())
    }

    /// Waits for HTTP requests, then background processing, to finish.
    async fn drain(&self) {
        self.shutdown.begin_draining();
        let timeout = self.config.drain_timeout;

        if !self.shutdown.wait_for_drain(timeout).await {
            warn!(
                in_flight = self.shutdown.in_flight_count(),
                "HTTP drain timed out"
            );
        }

        if self.lifecycle.drain(timeout).await {
            info!("Background processing drained");
        } else {
            warn!(
                remaining = self.lifecycle.in_flight(),
                "Background drain timed out; remaining requests stay pending"
            );
        }
    }
}
