//! Backend selection.
//!
//! The compute backend is fixed at compile time: the `cuda` feature selects
//! the CUDA backend, otherwise training runs on the CPU `ndarray` backend.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;
use verdant_core::{select_device, Device};

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(not(feature = "cuda"))]
pub type DefaultBackend = burn_ndarray::NdArray;

/// The default autodiff backend for training
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Half-precision autodiff backend used when mixed precision is granted
#[cfg(feature = "cuda")]
pub type MixedPrecisionBackend = Autodiff<burn_cuda::Cuda<burn::tensor::f16>>;

pub fn default_device() -> <DefaultBackend as Backend>::Device {
    Default::default()
}

/// Get a human-readable name for the compiled backend
pub fn backend_name() -> &'static str {
    if cfg!(feature = "cuda") {
        "CUDA (GPU)"
    } else {
        "NdArray (CPU)"
    }
}

/// Whether a GPU is present and this build can use it
pub fn accelerator_available() -> bool {
    select_device(cfg!(feature = "cuda")) != Device::Cpu
}
