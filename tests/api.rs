//! Status API tests, run in-process with axum-test

use axum_test::TestServer;
use comfy_deploy::{
    AppStatus, MirrorReport,
    api::routes::{AppState, MirrorState, create_router},
    metrics,
};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;

// Global metrics handle - only initialize once per test process
static METRICS_HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> metrics_exporter_prometheus::PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| metrics::setup_metrics().expect("Failed to setup metrics"))
        .clone()
}

fn create_test_server(status: AppStatus, mirror: MirrorState) -> TestServer {
    let state = AppState {
        app_status: Arc::new(RwLock::new(status)),
        mirror: Arc::new(RwLock::new(mirror)),
        prometheus_handle: get_metrics_handle(),
    };

    TestServer::try_new(create_router(state)).expect("Failed to create test server")
}

#[tokio::test]
async fn test_health_ready() {
    let server = create_test_server(AppStatus::Ready, MirrorState::Pending);

    let response = server.get("/health").await;
    assert_eq!(response.status_code(), 200);

    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["app"], "ready");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_health_starting_is_unavailable() {
    let server = create_test_server(AppStatus::Starting, MirrorState::Pending);

    let response = server.get("/health").await;
    assert_eq!(response.status_code(), 503);

    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "starting");
    assert_eq!(body["app"], "starting");
}

#[tokio::test]
async fn test_health_failed_is_unavailable() {
    let server = create_test_server(AppStatus::Failed, MirrorState::Pending);

    let response = server.get("/health").await;
    assert_eq!(response.status_code(), 503);
    assert_eq!(response.json::<serde_json::Value>()["status"], "unhealthy");
}

#[tokio::test]
async fn test_mirror_report() {
    let report = MirrorReport {
        created: 4,
        replaced: 2,
        skipped: 1,
    };
    let server = create_test_server(AppStatus::Ready, MirrorState::Done(report));

    let body: serde_json::Value = server.get("/mirror").await.json();
    assert_eq!(body["completed"], true);
    assert_eq!(body["report"]["created"], 4);
    assert_eq!(body["report"]["replaced"], 2);
    assert_eq!(body["report"]["skipped"], 1);
}

#[tokio::test]
async fn test_mirror_not_run() {
    let server = create_test_server(AppStatus::Starting, MirrorState::Pending);

    let body: serde_json::Value = server.get("/mirror").await.json();
    assert_eq!(body["completed"], false);
    assert!(body.get("report").is_none());
}

#[tokio::test]
async fn test_mirror_cache_not_mounted() {
    let server = create_test_server(
        AppStatus::Ready,
        MirrorState::SourceMissing(PathBuf::from("/models")),
    );

    let response = server.get("/mirror").await;
    assert_eq!(response.status_code(), 404);

    let body: serde_json::Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("/models"));
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let server = create_test_server(AppStatus::Ready, MirrorState::Pending);
    metrics::record_download("civitai", true);

    let response = server.get("/metrics").await;
    assert_eq!(response.status_code(), 200);
    assert!(response.text().contains("comfy_deploy_downloads_total"));
}
