//! Compute device selection.
//!
//! `Auto` prefers a CUDA device when the crate is built with the `cuda`
//! feature and one is present, and otherwise falls back to the CPU. An
//! explicit `Cuda` request never falls back silently.

use crate::error::{MamformerError, Result};
use candle_core::Device;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl std::str::FromStr for DevicePreference {
    type Err = MamformerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            other => Err(MamformerError::invalid("device", other, "expected auto, cpu or cuda")),
        }
    }
}

pub fn select_device(pref: DevicePreference) -> Result<Device> {
    match pref {
        DevicePreference::Cpu => Ok(Device::Cpu),
        DevicePreference::Cuda => {
            let device = Device::new_cuda(0).map_err(|e| MamformerError::Device(e.to_string()))?;
            info!("using CUDA device 0");
            Ok(device)
        }
        DevicePreference::Auto => {
            if cfg!(feature = "cuda") && candle_core::utils::cuda_is_available() {
                match Device::new_cuda(0) {
                    Ok(device) => {
                        info!("using CUDA device 0");
                        return Ok(device);
                    }
                    Err(e) => warn!(error = %e, "CUDA reported available but failed to initialise"),
                }
            }
            info!("using CPU device");
            Ok(Device::Cpu)
        }
    }
}
