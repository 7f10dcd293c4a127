//! Preparation job: populate the cache volume from the model list

use crate::config::FailurePolicy;
use crate::download::Downloader;
use crate::error::{DeployError, DeployResult};
use crate::manifest::{Manifest, ModelSource};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// A download that did not complete
#[derive(Debug, Clone, Serialize)]
pub struct FailedEntry {
    pub line: usize,
    pub kind: &'static str,
    pub error: String,
}

/// Summary of one preparation run
#[derive(Debug, Clone, Default, Serialize)]
pub struct PrepareReport {
    /// Successful Civitai downloads
    pub civitai: usize,
    /// Successful Hugging Face downloads
    pub huggingface: usize,
    pub unknown: usize,
    pub skipped_lines: usize,
    pub failed: Vec<FailedEntry>,
}

impl PrepareReport {
    pub fn attempted(&self) -> usize {
        self.civitai + self.huggingface + self.failed.len()
    }

    /// Turn recorded failures into an error for the process exit code
    pub fn into_result(self) -> DeployResult<Self> {
        if self.failed.is_empty() {
            Ok(self)
        } else {
            Err(DeployError::DownloadsIncomplete {
                failed: self.failed.len(),
                attempted: self.attempted(),
            })
        }
    }
}

/// Dispatches manifest entries to a downloader, one at a time in file order
pub struct PrepareJob {
    downloader: Arc<dyn Downloader>,
    cache_dir: PathBuf,
    policy: FailurePolicy,
}

impl PrepareJob {
    pub fn new(downloader: Arc<dyn Downloader>, cache_dir: PathBuf, policy: FailurePolicy) -> Self {
        Self {
            downloader,
            cache_dir,
            policy,
        }
    }

    /// Download every entry of the manifest
    ///
    /// With [`FailurePolicy::FailFast`] the first failure is returned as the error.
    /// With [`FailurePolicy::Continue`] failures are collected in the report.
    pub async fn run(&self, manifest: &Manifest) -> DeployResult<PrepareReport> {
        let mut report = PrepareReport {
            skipped_lines: manifest.skipped_lines,
            ..Default::default()
        };

        tracing::info!(
            entries = manifest.entries.len(),
            cache_dir = ?self.cache_dir,
            policy = ?self.policy,
            "Starting model downloads"
        );

        for entry in &manifest.entries {
            let kind = entry.source.kind();

            let result = match &entry.source {
                ModelSource::Civitai { urn } => {
                    tracing::info!(line = entry.line, urn = %urn, "Downloading");
                    self.downloader.civitai(urn, &self.cache_dir).await
                }
                ModelSource::HuggingFace {
                    subdir,
                    repo_id,
                    filename,
                } => {
                    tracing::info!(
                        line = entry.line,
                        repo_id = %repo_id,
                        filename = %filename,
                        subdir = %subdir,
                        "Downloading"
                    );
                    let local_dir = self.cache_dir.join(subdir);
                    self.downloader
                        .huggingface(repo_id, filename, &local_dir)
                        .await
                }
                ModelSource::Unknown { raw } => {
                    tracing::warn!(line = entry.line, identifier = %raw, "Unknown model identifier format");
                    crate::metrics::record_unknown_identifier();
                    report.unknown += 1;
                    continue;
                }
            };

            crate::metrics::record_download(kind, result.is_ok());

            match result {
                Ok(()) => match entry.source {
                    ModelSource::Civitai { .. } => report.civitai += 1,
                    _ => report.huggingface += 1,
                },
                Err(e) if self.policy == FailurePolicy::FailFast => {
                    tracing::error!(line = entry.line, error = %e, "Download failed, aborting");
                    return Err(e);
                }
                Err(e) => {
                    tracing::error!(line = entry.line, error = %e, "Download failed, continuing");
                    report.failed.push(FailedEntry {
                        line: entry.line,
                        kind,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            civitai = report.civitai,
            huggingface = report.huggingface,
            unknown = report.unknown,
            failed = report.failed.len(),
            "Model downloads finished"
        );

        Ok(report)
    }
}
