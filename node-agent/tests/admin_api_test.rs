//! Admin API Integration Tests

mod support;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::runtime::Handle;
use tower::ServiceExt;

use node_agent::api;
use node_agent::config::Config;
use node_agent::registry::WorkerRegistry;
use node_agent::AppState;
use shared_types::WorkerId;
use support::RecordingFactory;

fn test_config() -> Config {
    Config {
        port: 0,
        node_ip_address: "10.0.0.5".to_string(),
        kill_worker_timeout: Duration::from_millis(100),
        reap_interval: Duration::from_secs(1),
        rpc_call_timeout: Duration::from_secs(5),
    }
}

fn setup_test_app() -> (axum::Router, Arc<AppState>, Arc<RecordingFactory>) {
    let factory = RecordingFactory::new();
    let state = Arc::new(AppState {
        config: test_config(),
        registry: WorkerRegistry::new(Handle::current()),
        client_factory: factory.clone(),
    });
    (api::router(Arc::clone(&state)), state, factory)
}

async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .expect("Failed to build request");

    let response = app.clone().oneshot(request).await.expect("Request failed");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("Invalid JSON response")
    };
    (status, value)
}

#[tokio::test]
async fn test_list_workers_empty() {
    let (app, _, _) = setup_test_app();
    let (status, body) = send(&app, "GET", "/admin/workers", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::Array(vec![]));
}

#[tokio::test]
async fn test_list_workers_reports_registered_worker() {
    let (app, state, _) = setup_test_app();
    let (worker, _) = support::worker();
    worker.connect(5000);
    state.registry.register(Arc::clone(&worker)).unwrap();

    let (status, body) = send(&app, "GET", "/admin/workers", None).await;
    assert_eq!(status, StatusCode::OK);
    let workers = body.as_array().unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0]["worker_id"], worker.worker_id().to_string());
    assert_eq!(workers[0]["port"], 5000);
    assert_eq!(workers[0]["language"], "python");
    assert_eq!(workers[0]["kill_state"], "alive");
    assert_eq!(workers[0]["blocked"], false);
}

#[cfg(unix)]
#[tokio::test]
async fn test_adopt_then_force_kill_real_process() {
    let (app, state, factory) = setup_test_app();
    let mut child = std::process::Command::new("sleep")
        .arg("30")
        .spawn()
        .expect("Failed to spawn sleep");

    let (status, body) = send(
        &app,
        "POST",
        "/admin/workers",
        Some(serde_json::json!({
            "pid": child.id(),
            "language": "python",
            "worker_type": "worker",
            "port": 6000,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let worker_id: WorkerId = serde_json::from_value(body["worker_id"].clone()).unwrap();

    let worker = state.registry.get(&worker_id).expect("worker registered");
    assert_eq!(worker.port(), 6000);
    assert_eq!(worker.process().map(|p| p.id()), Some(child.id()));
    assert_eq!(factory.last_address().endpoint(), "10.0.0.5:6000");

    let uri = format!("/admin/workers/{worker_id}/kill?force=true");
    let (status, body) = send(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["started"], true);

    let exit = child.wait().expect("Failed to wait for child");
    assert!(!exit.success());

    let (status, body) = send(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["started"], false);
}

#[tokio::test]
async fn test_adopt_rejects_bad_port() {
    let (app, state, _) = setup_test_app();
    let (status, body) = send(
        &app,
        "POST",
        "/admin/workers",
        Some(serde_json::json!({
            "pid": 1,
            "language": "java",
            "worker_type": "driver",
            "port": 0,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "InvalidArgument");
    assert!(state.registry.is_empty());
}

#[tokio::test]
async fn test_adopt_rejects_process_group_and_own_pid() {
    let (app, state, _) = setup_test_app();
    for pid in [0, std::process::id()] {
        let (status, body) = send(
            &app,
            "POST",
            "/admin/workers",
            Some(serde_json::json!({
                "pid": pid,
                "language": "python",
                "worker_type": "worker",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "pid {pid}");
        assert_eq!(body["code"], "InvalidArgument");
    }
    assert!(state.registry.is_empty());
}

#[tokio::test]
async fn test_kill_unknown_worker_is_404() {
    let (app, _, _) = setup_test_app();
    let uri = format!("/admin/workers/{}/kill", WorkerId::new());
    let (status, body) = send(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NotFound");
}

#[tokio::test]
async fn test_malformed_worker_id_is_400() {
    let (app, _, _) = setup_test_app();
    let (status, _) = send(&app, "POST", "/admin/workers/not-a-uuid/kill", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, "POST", "/admin/workers/not-a-uuid/block", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_block_and_unblock() {
    let (app, state, _) = setup_test_app();
    let (worker, _) = support::worker();
    state.registry.register(Arc::clone(&worker)).unwrap();

    let uri = format!("/admin/workers/{}/block", worker.worker_id());
    let (status, _) = send(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(worker.is_blocked());

    let uri = format!("/admin/workers/{}/unblock", worker.worker_id());
    let (status, _) = send(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!worker.is_blocked());

    let uri = format!("/admin/workers/{}/unblock", WorkerId::new());
    let (status, _) = send(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_gcs_restarted_notifies_connected_workers() {
    let (app, state, _) = setup_test_app();
    let (connected, connected_factory) = support::worker();
    connected.connect(5000);
    state.registry.register(connected).unwrap();
    let (pending, pending_factory) = support::worker();
    state.registry.register(Arc::clone(&pending)).unwrap();

    let (status, _) = send(&app, "POST", "/admin/gcs-restarted", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(connected_factory.last_client().notify_count(), 1);

    pending.connect(5001);
    assert_eq!(pending_factory.last_client().notify_count(), 1);
}
