//! API route definitions

use crate::launcher::AppStatus;
use crate::mirror::MirrorReport;
use axum::{Router, routing::get};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::handlers;

/// Outcome of the startup mirror pass
#[derive(Debug, Clone, Default)]
pub enum MirrorState {
    #[default]
    Pending,
    Done(MirrorReport),
    /// The cache volume was not mounted
    SourceMissing(PathBuf),
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub app_status: Arc<RwLock<AppStatus>>,
    pub mirror: Arc<RwLock<MirrorState>>,
    pub prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
}

/// Create the status router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/mirror", get(handlers::mirror))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}
