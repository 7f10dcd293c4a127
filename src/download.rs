//! Model download backends
//!
//! Civitai entries always go through the external downloader binary. Hugging
//! Face entries go through either the hub CLI or the hf-hub crate, depending on
//! `download.hf_backend`.

use crate::config::{DeployConfig, DownloadConfig, HfBackend};
use crate::error::{DeployError, DeployResult};
use async_trait::async_trait;
use hf_hub::api::tokio::{Api, ApiBuilder};
use std::path::Path;
use std::sync::Arc;
use tokio::process::Command;

/// Fetches model files into the cache volume
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download a Civitai asset, laid out under `base_dir` by the downloader
    async fn civitai(&self, urn: &str, base_dir: &Path) -> DeployResult<()>;

    /// Download one file of a Hugging Face repo into `local_dir`
    async fn huggingface(&self, repo_id: &str, filename: &str, local_dir: &Path)
    -> DeployResult<()>;
}

/// Build the downloader selected by config
pub fn from_config(config: &DeployConfig, dry_run: bool) -> anyhow::Result<Arc<dyn Downloader>> {
    let command = CommandDownloader::new(&config.download).dry_run(dry_run);

    match config.download.hf_backend {
        HfBackend::Cli => Ok(Arc::new(command)),
        HfBackend::Native => Ok(Arc::new(HubDownloader::new(
            command,
            config.credentials.hf_token(),
        )?)),
    }
}

// ============================================================================
// External commands
// ============================================================================

/// Runs the external downloader binaries
#[derive(Debug, Clone)]
pub struct CommandDownloader {
    civitai_binary: String,
    hf_cli: String,
    hf_transfer: bool,
    dry_run: bool,
}

impl CommandDownloader {
    pub fn new(config: &DownloadConfig) -> Self {
        Self {
            civitai_binary: config.civitai_binary.clone(),
            hf_cli: config.hf_cli.clone(),
            hf_transfer: config.hf_transfer,
            dry_run: false,
        }
    }

    /// Log commands instead of running them
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Arguments passed to the Civitai downloader
    pub fn civitai_args(urn: &str, base_dir: &Path) -> Vec<String> {
        vec![
            "--urn".to_string(),
            urn.to_string(),
            "--base-dir".to_string(),
            base_dir.to_string_lossy().to_string(),
            "--comfyui".to_string(),
        ]
    }

    /// Arguments passed to the hub CLI
    pub fn hf_args(repo_id: &str, filename: &str, local_dir: &Path) -> Vec<String> {
        vec![
            "download".to_string(),
            repo_id.to_string(),
            filename.to_string(),
            "--local-dir".to_string(),
            local_dir.to_string_lossy().to_string(),
            "--local-dir-use-symlinks".to_string(),
            "False".to_string(),
            "--resume-download".to_string(),
        ]
    }

    async fn run(
        &self,
        program: &str,
        args: Vec<String>,
        source_kind: &'static str,
        identifier: &str,
    ) -> DeployResult<()> {
        if self.dry_run {
            tracing::info!(program = %program, args = ?args, "Dry run, not executing");
            return Ok(());
        }

        tracing::debug!(program = %program, args = ?args, "Running downloader");

        let mut cmd = Command::new(program);
        cmd.args(&args).kill_on_drop(true);
        if self.hf_transfer {
            cmd.env("HF_HUB_ENABLE_HF_TRANSFER", "1");
        }

        let status = cmd.status().await.map_err(|source| DeployError::Spawn {
            program: program.to_string(),
            source,
        })?;

        if !status.success() {
            return Err(DeployError::DownloadFailed {
                source_kind,
                identifier: identifier.to_string(),
                reason: status.to_string(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl Downloader for CommandDownloader {
    async fn civitai(&self, urn: &str, base_dir: &Path) -> DeployResult<()> {
        let args = Self::civitai_args(urn, base_dir);
        self.run(&self.civitai_binary, args, "civitai", urn).await
    }

    async fn huggingface(
        &self,
        repo_id: &str,
        filename: &str,
        local_dir: &Path,
    ) -> DeployResult<()> {
        let args = Self::hf_args(repo_id, filename, local_dir);
        let identifier = format!("{}@{}", repo_id, filename);
        self.run(&self.hf_cli, args, "huggingface", &identifier)
            .await
    }
}

// ============================================================================
// Native hf-hub
// ============================================================================

/// Downloads Hugging Face files with hf-hub, Civitai still via the binary
pub struct HubDownloader {
    api: Api,
    civitai: CommandDownloader,
    dry_run: bool,
}

impl HubDownloader {
    pub fn new(civitai: CommandDownloader, token: Option<String>) -> anyhow::Result<Self> {
        let api = ApiBuilder::new()
            .with_token(token)
            .with_progress(false)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HF API client: {}", e))?;

        let dry_run = civitai.dry_run;
        Ok(Self {
            api,
            civitai,
            dry_run,
        })
    }
}

#[async_trait]
impl Downloader for HubDownloader {
    async fn civitai(&self, urn: &str, base_dir: &Path) -> DeployResult<()> {
        self.civitai.civitai(urn, base_dir).await
    }

    async fn huggingface(
        &self,
        repo_id: &str,
        filename: &str,
        local_dir: &Path,
    ) -> DeployResult<()> {
        let dest = local_dir.join(filename);

        if self.dry_run {
            tracing::info!(repo_id = %repo_id, filename = %filename, dest = ?dest, "Dry run, not fetching");
            return Ok(());
        }

        let failed = |reason: String| DeployError::DownloadFailed {
            source_kind: "huggingface",
            identifier: format!("{}@{}", repo_id, filename),
            reason,
        };

        tracing::debug!(repo_id = %repo_id, filename = %filename, "Fetching via hf-hub");

        let cached = self
            .api
            .model(repo_id.to_string())
            .get(filename)
            .await
            .map_err(|e| failed(e.to_string()))?;

        copy_into_volume(&cached, &dest).await?;
        Ok(())
    }
}

/// Copy a file out of the hub cache so the volume holds a real file
///
/// Returns false when `dest` already has the same size and was left as is.
pub(crate) async fn copy_into_volume(cached: &Path, dest: &Path) -> DeployResult<bool> {
    if already_present(cached, dest).await {
        tracing::info!(dest = ?dest, "File already present in cache volume");
        return Ok(false);
    }

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DeployError::io(parent, e))?;
    }

    tokio::fs::copy(cached, dest)
        .await
        .map_err(|e| DeployError::io(dest, e))?;

    Ok(true)
}

async fn already_present(cached: &Path, dest: &Path) -> bool {
    match (tokio::fs::metadata(cached).await, tokio::fs::metadata(dest).await) {
        (Ok(src), Ok(dst)) => src.len() == dst.len(),
        _ => false,
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================
