//! Kernel launch descriptors.

use crate::device::BufferHandle;
use crate::kernels::batch::{ConvGeometry, DenseGeometry};
use crate::kernels::{NormalizeParams, PoolGeometry};
use crate::utils::Activation;

/// Kernels a backend must provide before a compute context accepts it.
pub const REQUIRED_KERNELS: [&str; 4] = [
    "dense_forward",
    "convolution_forward",
    "max_pool_forward",
    "normalize_forward",
];

/// One kernel dispatch over device-resident buffers.
///
/// Output buffers must be distinct from each other and from every input.
#[derive(Debug, Clone, PartialEq)]
pub enum KernelLaunch {
    DenseForward {
        weights: BufferHandle,
        biases: BufferHandle,
        input: BufferHandle,
        inter: BufferHandle,
        output: BufferHandle,
        geometry: DenseGeometry,
        activation: Activation,
    },
    ConvolutionForward {
        weights: BufferHandle,
        biases: BufferHandle,
        input: BufferHandle,
        inter: BufferHandle,
        output: BufferHandle,
        geometry: ConvGeometry,
        activation: Activation,
    },
    MaxPoolForward {
        input: BufferHandle,
        output: BufferHandle,
        geometry: PoolGeometry,
        maps: usize,
        batch: usize,
    },
    NormalizeForward {
        input: BufferHandle,
        output: BufferHandle,
        width: usize,
        height: usize,
        maps: usize,
        batch: usize,
        params: NormalizeParams,
    },
}

impl KernelLaunch {
    pub fn kernel_name(&self) -> &'static str {
        match self {
            KernelLaunch::DenseForward { .. } => "dense_forward",
            KernelLaunch::ConvolutionForward { .. } => "convolution_forward",
            KernelLaunch::MaxPoolForward { .. } => "max_pool_forward",
            KernelLaunch::NormalizeForward { .. } => "normalize_forward",
        }
    }
}
