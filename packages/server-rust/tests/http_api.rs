//! HTTP API tests driving the full router in-process.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use provisioner_server::network::{NetworkConfig, NetworkModule};
use provisioner_server::service::{
    FailurePolicy, LifecycleService, ServiceConfig, SimulatedKeyGenerator,
};
use provisioner_server::storage::MemoryRequestStore;

const FEE: &str = "0x00000000219ab540356cBB839Cbe05303d7705Fa";

fn app(policy: FailurePolicy) -> (Router, Arc<LifecycleService>, NetworkModule) {
    let config = ServiceConfig {
        per_key_delay_ms: 0,
        failure_policy: policy,
        max_keys_per_request: 100,
        ..ServiceConfig::default()
    };
    let generator = Arc::new(SimulatedKeyGenerator::new(
        config.per_key_delay(),
        &config.failure_policy,
    ));
    let lifecycle = Arc::new(LifecycleService::new(
        Arc::new(MemoryRequestStore::new()),
        generator,
        &config,
    ));
    let module = NetworkModule::new(NetworkConfig::default(), Arc::clone(&lifecycle));
    (module.build_router(), lifecycle, module)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(body: &Value) -> Request<Body> {
    Request::post("/validators")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn create_and_fetch_successful_request() {
    let (app, lifecycle, _module) = app(FailurePolicy::Never);

    let (status, created) = send(
        &app,
        post_json(&json!({"num_validators": 3, "fee_recipient": FEE})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["message"], "Validator creation in progress");
    let id = created["request_id"].as_str().unwrap().to_string();

    assert!(lifecycle.drain(Duration::from_secs(5)).await);

    let (status, body) = send(&app, get(&format!("/validators/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "successful");
    assert_eq!(body["keys"].as_array().unwrap().len(), 3);
    assert!(body.get("message").is_none());
}

#[tokio::test]
async fn failed_request_reports_generic_message() {
    let (app, lifecycle, _module) = app(FailurePolicy::Always);

    let (_, created) = send(
        &app,
        post_json(&json!({"num_validators": 2, "fee_recipient": FEE})),
    )
    .await;
    let id = created["request_id"].as_str().unwrap().to_string();
    assert!(lifecycle.drain(Duration::from_secs(5)).await);

    let (status, body) = send(&app, get(&format!("/validators/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"status": "failed", "message": "Error processing request"})
    );
}

#[tokio::test]
async fn invalid_submissions_are_400() {
    let (app, _lifecycle, _module) = app(FailurePolicy::Never);

    let cases = [
        (json!({"num_validators": 0, "fee_recipient": FEE}), "num_validators must be positive"),
        (json!({"num_validators": -4, "fee_recipient": FEE}), "num_validators must be positive"),
        (json!({"num_validators": 1, "fee_recipient": "0x1234"}), "Invalid Ethereum address"),
        (json!({"num_validators": "two", "fee_recipient": FEE}), "Invalid request payload"),
        (json!({"fee_recipient": FEE}), "Invalid request payload"),
    ];
    for (payload, message) in cases {
        let (status, body) = send(&app, post_json(&payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{payload}");
        assert_eq!(body["error"], message, "{payload}");
    }

    let (status, body) = send(
        &app,
        Request::post("/validators")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid request payload");
}

#[tokio::test]
async fn unknown_request_is_404() {
    let (app, _lifecycle, _module) = app(FailurePolicy::Never);
    let (status, body) = send(&app, get("/validators/no-such-request")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Request not found");
}

#[tokio::test]
async fn pending_request_reports_progress() {
    let config = ServiceConfig {
        per_key_delay_ms: 200,
        failure_policy: FailurePolicy::Never,
        ..ServiceConfig::default()
    };
    let generator = Arc::new(SimulatedKeyGenerator::new(
        config.per_key_delay(),
        &config.failure_policy,
    ));
    let lifecycle = Arc::new(LifecycleService::new(
        Arc::new(MemoryRequestStore::new()),
        generator,
        &config,
    ));
    let app = NetworkModule::new(NetworkConfig::default(), lifecycle).build_router();

    let (_, created) = send(
        &app,
        post_json(&json!({"num_validators": 5, "fee_recipient": FEE})),
    )
    .await;
    let id = created["request_id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, get(&format!("/validators/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"status": "pending", "message": "Validator creation is in progress"})
    );
}

#[tokio::test]
async fn draining_server_refuses_submissions() {
    let (app, _lifecycle, module) = app(FailurePolicy::Never);
    module.shutdown_controller().begin_draining();

    let (status, body) = send(
        &app,
        post_json(&json!({"num_validators": 1, "fee_recipient": FEE})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "Service is shutting down");
}

#[tokio::test]
async fn health_reports_store_status() {
    let (app, _lifecycle, _module) = app(FailurePolicy::Never);
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, _) = send(&app, get("/health/live")).await;
    assert_eq!(status, StatusCode::OK);

    // Readiness only flips once the server is serving.
    let (status, _) = send(&app, get("/health/ready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn responses_carry_request_id() {
    let (app, _lifecycle, _module) = app(FailurePolicy::Never);
    let response = app.oneshot(get("/health/live")).await.unwrap();
    assert!(response.headers().contains_key("x-request-id"));
}
