//! Error types for the deploy jobs and the status API

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitStatus;

/// Result alias used across the crate
pub type DeployResult<T> = Result<T, DeployError>;

/// Errors raised by the preparation and serving jobs
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("failed to read {kind} list {path:?}: {source}")]
    ListRead {
        kind: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{source_kind} download of '{identifier}' failed: {reason}")]
    DownloadFailed {
        source_kind: &'static str,
        identifier: String,
        reason: String,
    },

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{failed} of {attempted} downloads failed")]
    DownloadsIncomplete { failed: usize, attempted: usize },

    #[error("mirror source directory does not exist: {0:?}")]
    MirrorSourceMissing(PathBuf),

    #[error("mirror target {target_dir:?} lies inside source {source_dir:?}")]
    MirrorTargetInsideSource {
        source_dir: PathBuf,
        target_dir: PathBuf,
    },

    #[error("failed to link {link:?} -> {target:?}: {source}")]
    Symlink {
        link: PathBuf,
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("web application did not accept connections on {addr} within {timeout_secs}s")]
    StartupTimeout { addr: String, timeout_secs: u64 },

    #[error("web application exited with {0}")]
    AppExited(ExitStatus),

    #[error("no GPU visible to this container")]
    NoGpu,

    #[error("workflow file {path:?} is not valid JSON: {source}")]
    InvalidWorkflow {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("plugin name '{0}' contains characters outside [A-Za-z0-9._@/:+-]")]
    InvalidPlugin(String),

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DeployError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl IntoResponse for DeployError {
    fn into_response(self) -> Response {
        let status = match self {
            DeployError::MirrorSourceMissing(_) => StatusCode::NOT_FOUND,
            DeployError::StartupTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Internal error");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            timestamp: chrono::Utc::now(),
        });

        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}
