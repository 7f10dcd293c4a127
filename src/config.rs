//! Configuration structures and loading logic

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level deploy configuration shared by both job roles
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Model identifier list read by the preparation job
    pub models_file: PathBuf,
    /// Mount point of the shared model cache volume
    pub cache_dir: PathBuf,
    /// Model directory the web application reads from
    pub models_dir: PathBuf,
    pub download: DownloadConfig,
    pub serve: ServeConfig,
    pub image: ImageConfig,
    pub credentials: CredentialsConfig,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            models_file: PathBuf::from("/root/models.txt"),
            cache_dir: PathBuf::from("/models"),
            models_dir: PathBuf::from("/root/comfy/ComfyUI/models"),
            download: DownloadConfig::default(),
            serve: ServeConfig::default(),
            image: ImageConfig::default(),
            credentials: CredentialsConfig::default(),
        }
    }
}

/// How the preparation job reacts to a failed download
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort on the first failed download
    #[default]
    #[value(alias = "fail_fast")]
    FailFast,
    /// Log, keep going, and report failures at the end
    Continue,
}

/// Which mechanism fetches Hugging Face entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum HfBackend {
    /// Shell out to the hub CLI
    #[default]
    Cli,
    /// Use the hf-hub crate in-process
    Native,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub civitai_binary: String,
    pub hf_cli: String,
    pub failure_policy: FailurePolicy,
    pub hf_backend: HfBackend,
    /// Sets HF_HUB_ENABLE_HF_TRANSFER=1 for CLI downloads
    pub hf_transfer: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            civitai_binary: "/bcat-civitai/target/release/bcat-civitai".to_string(),
            hf_cli: "huggingface-cli".to_string(),
            failure_policy: FailurePolicy::default(),
            hf_backend: HfBackend::default(),
            hf_transfer: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServeConfig {
    pub app_binary: String,
    pub host: String,
    pub port: u16,
    pub startup_timeout_secs: u64,
    pub graceful_shutdown_timeout_secs: u64,
    pub require_gpu: bool,
    /// Port for the status endpoint, 0 disables it
    pub status_port: u16,
    /// Extra args appended after `--listen/--port`
    pub extra_args: Vec<String>,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            app_binary: "comfy".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            startup_timeout_secs: 60,
            graceful_shutdown_timeout_secs: 30,
            require_gpu: false,
            status_port: 9000,
            extra_args: Vec::new(),
        }
    }
}

/// Inputs for rendering the container image recipes
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ImageConfig {
    pub base_image: String,
    pub fastapi_version: String,
    pub comfy_cli_version: String,
    pub comfyui_version: String,
    pub hf_hub_version: String,
    pub civitai_repo: String,
    /// Plugin list, resolved relative to the working directory
    pub nodes_file: PathBuf,
    pub workflow_file: PathBuf,
    /// Local model list copied into the preparation image
    pub models_file: PathBuf,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            base_image: "python:3.11-slim-bookworm".to_string(),
            fastapi_version: "0.115.4".to_string(),
            comfy_cli_version: "1.3.5".to_string(),
            comfyui_version: "0.3.23".to_string(),
            hf_hub_version: "0.26.2".to_string(),
            civitai_repo: "https://github.com/burritocatai/bcat-civitai.git".to_string(),
            nodes_file: PathBuf::from("nodes.txt"),
            workflow_file: PathBuf::from("workflow_api.json"),
            models_file: PathBuf::from("models.txt"),
        }
    }
}

/// Names of the environment variables the platform injects secrets into
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub civitai_token_env: String,
    pub hf_token_env: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            civitai_token_env: "CIVITAI_API_TOKEN".to_string(),
            hf_token_env: "HF_TOKEN".to_string(),
        }
    }
}

impl CredentialsConfig {
    pub fn hf_token(&self) -> Option<String> {
        read_secret(&self.hf_token_env)
    }

    pub fn civitai_token(&self) -> Option<String> {
        read_secret(&self.civitai_token_env)
    }

    /// Log which secrets are present. Values are never logged.
    pub fn log_presence(&self) {
        tracing::info!(
            civitai = %self.civitai_token_env,
            present = self.civitai_token().is_some(),
            "Civitai credential"
        );
        tracing::info!(
            huggingface = %self.hf_token_env,
            present = self.hf_token().is_some(),
            "Hugging Face credential"
        );
    }
}

fn read_secret(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl DeployConfig {
    /// Load configuration from file with environment variable overrides
    ///
    /// Without an explicit path, `$XDG_CONFIG_HOME/comfy-deploy/deploy.toml` is used
    /// when it exists.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = path.or_else(|| {
            dirs::config_dir()
                .map(|d| d.join("comfy-deploy/deploy.toml"))
                .filter(|p| p.exists())
        });

        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        if let Ok(dir) = std::env::var("COMFY_DEPLOY_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("COMFY_DEPLOY_MODELS_DIR") {
            config.models_dir = PathBuf::from(dir);
        }
        if let Ok(port) = std::env::var("COMFY_DEPLOY_APP_PORT") {
            config.serve.port = port.parse().context("Invalid COMFY_DEPLOY_APP_PORT value")?;
        }
        if let Ok(port) = std::env::var("COMFY_DEPLOY_STATUS_PORT") {
            config.serve.status_port = port
                .parse()
                .context("Invalid COMFY_DEPLOY_STATUS_PORT value")?;
        }
        if let Ok(policy) = std::env::var("COMFY_DEPLOY_FAILURE_POLICY") {
            config.download.failure_policy = FailurePolicy::from_str(&policy, true)
                .map_err(|e| anyhow::anyhow!("Invalid COMFY_DEPLOY_FAILURE_POLICY value: {}", e))?;
        }
        if let Ok(backend) = std::env::var("COMFY_DEPLOY_HF_BACKEND") {
            config.download.hf_backend = HfBackend::from_str(&backend, true)
                .map_err(|e| anyhow::anyhow!("Invalid COMFY_DEPLOY_HF_BACKEND value: {}", e))?;
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.serve.port < 1024 {
            anyhow::bail!("App port must be >= 1024 (got {})", self.serve.port);
        }
        if self.serve.status_port != 0 && self.serve.status_port == self.serve.port {
            anyhow::bail!(
                "Status port {} conflicts with app port",
                self.serve.status_port
            );
        }
        if self.serve.startup_timeout_secs == 0 {
            anyhow::bail!("Startup timeout must be greater than zero");
        }

        for (name, dir) in [("cache_dir", &self.cache_dir), ("models_dir", &self.models_dir)] {
            if !dir.is_absolute() {
                anyhow::bail!("{} must be an absolute path (got {:?})", name, dir);
            }
        }

        if self.models_dir.starts_with(&self.cache_dir) {
            anyhow::bail!(
                "models_dir {:?} cannot live inside cache_dir {:?}",
                self.models_dir,
                self.cache_dir
            );
        }

        if self.download.civitai_binary.is_empty() || self.download.hf_cli.is_empty() {
            anyhow::bail!("Downloader binaries cannot be empty");
        }

        Ok(())
    }
}
