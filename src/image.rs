//! Container image recipes for the two job roles
//!
//! A recipe is an ordered list of build steps rendered as Dockerfile text. The
//! serve image carries the web application and its plugins; the prepare image
//! carries the model download tools.

use crate::config::DeployConfig;
use crate::error::{DeployError, DeployResult};
use clap::ValueEnum;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Where the binary of this crate is installed inside both images
pub const BINARY_DEST: &str = "/usr/local/bin/comfy-deploy";
/// Fixed location of the workflow definition inside the serve image
pub const WORKFLOW_DEST: &str = "/root/workflow_api.json";

/// Which job an image is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ImageRole {
    Prepare,
    Serve,
}

/// One image build step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    From(String),
    AptInstall(Vec<String>),
    PipInstall(Vec<String>),
    Run(String),
    Env(String, String),
    Copy { src: PathBuf, dest: String },
    Expose(u16),
    Cmd(Vec<String>),
}

impl Step {
    fn render(&self, out: &mut String) {
        // Writing to a String cannot fail
        let _ = match self {
            Step::From(image) => writeln!(out, "FROM {}", image),
            Step::AptInstall(packages) => writeln!(
                out,
                "RUN apt-get update && apt-get install -y --no-install-recommends {} \\\n    && rm -rf /var/lib/apt/lists/*",
                packages.join(" ")
            ),
            Step::PipInstall(packages) => {
                let quoted: Vec<String> = packages.iter().map(|p| format!("\"{}\"", p)).collect();
                writeln!(out, "RUN pip install --no-cache-dir {}", quoted.join(" "))
            }
            Step::Run(command) => writeln!(out, "RUN {}", command),
            Step::Env(key, value) => writeln!(out, "ENV {}=\"{}\"", key, value),
            Step::Copy { src, dest } => writeln!(out, "COPY {} {}", src.display(), dest),
            Step::Expose(port) => writeln!(out, "EXPOSE {}", port),
            Step::Cmd(argv) => writeln!(
                out,
                "CMD {}",
                serde_json::to_string(argv).unwrap_or_else(|_| "[]".to_string())
            ),
        };
    }
}

/// Ordered image build steps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageRecipe {
    pub steps: Vec<Step>,
}

impl ImageRecipe {
    fn push(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Web application image: installer CLI, app, plugins, workflow
    ///
    /// Fails if the workflow file is missing or is not JSON, or if a plugin name
    /// would need shell quoting.
    pub fn serve(config: &DeployConfig, plugins: &[String]) -> DeployResult<Self> {
        let image = &config.image;
        validate_workflow(&image.workflow_file)?;

        let mut recipe = ImageRecipe::default()
            .push(Step::From(image.base_image.clone()))
            .push(Step::AptInstall(vec!["git".to_string()]))
            .push(Step::PipInstall(vec![format!(
                "fastapi[standard]=={}",
                image.fastapi_version
            )]))
            .push(Step::PipInstall(vec![format!(
                "comfy-cli=={}",
                image.comfy_cli_version
            )]))
            .push(Step::Run(format!(
                "comfy --skip-prompt install --nvidia --version {}",
                image.comfyui_version
            )));

        for plugin in plugins {
            validate_plugin(plugin)?;
            recipe = recipe.push(Step::Run(format!("comfy node install {}", plugin)));
        }

        Ok(recipe
            .push(Step::Copy {
                src: image.workflow_file.clone(),
                dest: WORKFLOW_DEST.to_string(),
            })
            .push(binary_copy())
            .push(Step::Env(
                "COMFY_DEPLOY_CACHE_DIR".to_string(),
                config.cache_dir.display().to_string(),
            ))
            .push(Step::Env(
                "COMFY_DEPLOY_MODELS_DIR".to_string(),
                config.models_dir.display().to_string(),
            ))
            .push(Step::Expose(config.serve.port))
            .push(Step::Cmd(vec![
                "comfy-deploy".to_string(),
                "serve".to_string(),
            ])))
    }

    /// Download-tool image: Civitai downloader built from source, hub client
    pub fn prepare(config: &DeployConfig) -> Self {
        let image = &config.image;

        ImageRecipe::default()
            .push(Step::From(image.base_image.clone()))
            .push(Step::AptInstall(
                ["git", "curl", "build-essential", "libssl-dev", "pkg-config"]
                    .iter()
                    .map(|p| p.to_string())
                    .collect(),
            ))
            .push(Step::Run(
                "curl --proto '=https' --tlsv1.2 -sSf https://sh.rustup.rs | sh -s -- -y"
                    .to_string(),
            ))
            .push(Step::Run(format!(
                "git clone {} /bcat-civitai",
                image.civitai_repo
            )))
            .push(Step::Run(
                ". \"$HOME/.cargo/env\" && cd /bcat-civitai && cargo build --release".to_string(),
            ))
            .push(Step::PipInstall(vec![format!(
                "huggingface_hub[hf_transfer]=={}",
                image.hf_hub_version
            )]))
            .push(Step::Env(
                "HF_HUB_ENABLE_HF_TRANSFER".to_string(),
                "1".to_string(),
            ))
            .push(Step::Copy {
                src: image.models_file.clone(),
                dest: config.models_file.display().to_string(),
            })
            .push(binary_copy())
            .push(Step::Cmd(vec![
                "comfy-deploy".to_string(),
                "prepare".to_string(),
            ]))
    }

    pub fn for_role(role: ImageRole, config: &DeployConfig, plugins: &[String]) -> DeployResult<Self> {
        match role {
            ImageRole::Serve => Self::serve(config, plugins),
            ImageRole::Prepare => Ok(Self::prepare(config)),
        }
    }

    /// Render as Dockerfile text
    pub fn render(&self) -> String {
        let mut out = String::from("# Generated by comfy-deploy. Do not edit.\n");
        for step in &self.steps {
            step.render(&mut out);
        }
        out
    }
}

fn binary_copy() -> Step {
    Step::Copy {
        src: PathBuf::from("target/release/comfy-deploy"),
        dest: BINARY_DEST.to_string(),
    }
}

fn validate_workflow(path: &Path) -> DeployResult<()> {
    let content = std::fs::read_to_string(path).map_err(|e| DeployError::io(path, e))?;
    serde_json::from_str::<serde_json::Value>(&content).map_err(|source| {
        DeployError::InvalidWorkflow {
            path: path.to_path_buf(),
            source,
        }
    })?;
    Ok(())
}

fn validate_plugin(name: &str) -> DeployResult<()> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || "._@/:+-".contains(c);
    if name.chars().all(allowed) {
        Ok(())
    } else {
        Err(DeployError::InvalidPlugin(name.to_string()))
    }
}
