//! comfy-deploy - ComfyUI on GPU containers
//!
//! Renders the container images for the two job roles, fills the shared model
//! cache volume (preparation job) and launches the web application with the
//! cache linked into its model directory (serving job).

pub mod api;
pub mod config;
pub mod download;
pub mod error;
pub mod gpu;
pub mod image;
pub mod launcher;
pub mod manifest;
pub mod metrics;
pub mod mirror;
pub mod prepare;

pub use config::{DeployConfig, FailurePolicy, HfBackend};
pub use download::{CommandDownloader, Downloader, HubDownloader};
pub use error::{DeployError, DeployResult};
pub use image::{ImageRecipe, ImageRole};
pub use launcher::{AppProcess, AppStatus, Launcher, SystemAppProcess};
pub use manifest::{Manifest, ManifestEntry, ModelSource};
pub use mirror::{MirrorReport, mirror_tree};
pub use prepare::{PrepareJob, PrepareReport};
