//! GPU inventory for the serving preflight
//!
//! The platform allocates the GPU; we only look at what nvidia-smi reports so
//! the logs show which card the container landed on.

use crate::error::{DeployError, DeployResult};
use serde::Serialize;
use std::process::Command;

/// One visible GPU
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GpuDevice {
    pub index: u32,
    pub name: String,
    pub memory_mib: Option<u64>,
}

/// GPUs visible to this container
#[derive(Debug, Clone, Default, Serialize)]
pub struct GpuInventory {
    pub devices: Vec<GpuDevice>,
}

impl GpuInventory {
    pub fn count(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Parse `nvidia-smi --query-gpu=index,name,memory.total --format=csv,noheader,nounits`
pub fn parse_inventory(stdout: &str) -> GpuInventory {
    let devices = stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.split(',').map(str::trim);
            let index = fields.next()?.parse::<u32>().ok()?;
            let name = fields.next()?.to_string();
            let memory_mib = fields.next().and_then(|m| m.parse::<u64>().ok());
            Some(GpuDevice {
                index,
                name,
                memory_mib,
            })
        })
        .collect();

    GpuInventory { devices }
}

/// Detect available GPUs using nvidia-smi
pub fn detect() -> GpuInventory {
    let output = Command::new("nvidia-smi")
        .args([
            "--query-gpu=index,name,memory.total",
            "--format=csv,noheader,nounits",
        ])
        .output();

    match output {
        Ok(output) if output.status.success() => {
            let inventory = parse_inventory(&String::from_utf8_lossy(&output.stdout));
            for device in &inventory.devices {
                tracing::info!(
                    index = device.index,
                    name = %device.name,
                    memory_mib = ?device.memory_mib,
                    "Detected GPU"
                );
            }
            inventory
        }
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(stderr = %stderr, "nvidia-smi failed, assuming no GPUs available");
            GpuInventory::default()
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to run nvidia-smi, assuming no GPUs available");
            GpuInventory::default()
        }
    }
}

/// Check the container has a GPU when one is required
pub fn preflight(inventory: &GpuInventory, require_gpu: bool) -> DeployResult<()> {
    if inventory.is_empty() {
        if require_gpu {
            return Err(DeployError::NoGpu);
        }
        tracing::warn!("No GPU detected, the web application will fall back to CPU");
    }
    Ok(())
}
