//! API response models

use crate::launcher::AppStatus;
use crate::mirror::MirrorReport;
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub app: AppStatus,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Last mirror pass over the model cache
#[derive(Debug, Serialize)]
pub struct MirrorResponse {
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<MirrorReport>,
}
