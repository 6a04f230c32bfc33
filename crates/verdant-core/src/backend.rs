//! Accelerator detection.
//!
//! The compute backend itself is chosen at compile time (see the `cuda`
//! feature of `verdant-training`); this module only answers whether the host
//! has a usable GPU so mixed precision can be granted or downgraded.

use serde::{Deserialize, Serialize};

/// Compute device family
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Device {
    /// CPU backend
    Cpu,
    /// GPU backend with device ordinal
    Gpu(usize),
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => write!(f, "CPU"),
            Device::Gpu(id) => write!(f, "GPU:{}", id),
        }
    }
}

/// Pick the device a run will use. A GPU only counts when the binary was
/// built with a GPU backend (`gpu_backend_compiled`).
pub fn select_device(gpu_backend_compiled: bool) -> Device {
    if gpu_backend_compiled && has_nvidia_gpu() {
        Device::Gpu(0)
    } else {
        Device::Cpu
    }
}

/// Check for an NVIDIA GPU (CUDA)
pub fn has_nvidia_gpu() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::path::Path::new("/proc/driver/nvidia/version").exists()
            || std::path::Path::new("/dev/nvidia0").exists()
            || nvidia_smi_succeeds("nvidia-smi")
    }

    #[cfg(target_os = "windows")]
    {
        nvidia_smi_succeeds("nvidia-smi.exe")
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        false
    }
}

#[cfg(any(target_os = "linux", target_os = "windows"))]
fn nvidia_smi_succeeds(program: &str) -> bool {
    std::process::Command::new(program)
        .arg("-L")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
