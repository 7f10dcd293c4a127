//! API request handlers

use super::models::{HealthResponse, MirrorResponse};
use super::routes::{AppState, MirrorState};
use crate::error::{DeployError, DeployResult};
use crate::launcher::AppStatus;
use axum::{Json, extract::State, http::StatusCode};

/// GET /health - 200 once the web application accepts connections, 503 otherwise
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let app = *state.app_status.read().await;

    let (code, status) = match app {
        AppStatus::Ready => (StatusCode::OK, "healthy"),
        AppStatus::Starting => (StatusCode::SERVICE_UNAVAILABLE, "starting"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            app,
            timestamp: chrono::Utc::now(),
        }),
    )
}

/// GET /metrics - Prometheus metrics
pub async fn metrics(State(state): State<AppState>) -> String {
    state.prometheus_handle.render()
}

/// GET /mirror - Result of the startup mirror pass, 404 when the cache was not mounted
pub async fn mirror(State(state): State<AppState>) -> DeployResult<Json<MirrorResponse>> {
    let report = match &*state.mirror.read().await {
        MirrorState::Pending => None,
        MirrorState::Done(report) => Some(*report),
        MirrorState::SourceMissing(path) => {
            return Err(DeployError::MirrorSourceMissing(path.clone()));
        }
    };

    Ok(Json(MirrorResponse {
        completed: report.is_some(),
        report,
    }))
}
