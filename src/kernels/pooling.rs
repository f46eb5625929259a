//! Max-pooling and its gradient-routing inverse.
//!
//! Window placement follows the overlap convention of the network description:
//! `stride` is an overlap parameter in `1..=pool_size` and windows advance by
//! `pool_size - stride + 1`. A stride of 1 therefore means non-overlapping
//! windows, and `stride == pool_size` moves the window one element at a time.

use serde::{Deserialize, Serialize};

use super::check_len;
use crate::error::KernelError;

/// Geometry of a max-pool over one `width × height` feature map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolGeometry {
    pub width: usize,
    pub height: usize,
    pub pool_size: usize,
    pub stride: usize,
}

impl PoolGeometry {
    pub fn new(width: usize, height: usize, pool_size: usize, stride: usize) -> Self {
        Self {
            width,
            height,
            pool_size,
            stride,
        }
    }

    /// Distance between the origins of neighbouring windows.
    pub fn step(&self) -> usize {
        (self.pool_size + 1).saturating_sub(self.stride)
    }

    /// Pooled width; 0 when the geometry is invalid.
    pub fn output_width(&self) -> usize {
        Self::pooled(self.width, self.pool_size, self.step())
    }

    pub fn output_height(&self) -> usize {
        Self::pooled(self.height, self.pool_size, self.step())
    }

    fn pooled(dim: usize, pool_size: usize, step: usize) -> usize {
        if pool_size == 0 || step == 0 || dim < pool_size {
            return 0;
        }
        (dim - pool_size) / step + 1
    }

    pub fn input_len(&self) -> usize {
        self.width * self.height
    }

    pub fn output_len(&self) -> usize {
        self.output_width() * self.output_height()
    }

    pub fn validate(&self) -> Result<(), KernelError> {
        if self.pool_size == 0 {
            return Err(KernelError::geometry("max_pool", "pool_size must be at least 1"));
        }
        if self.stride == 0 || self.stride > self.pool_size {
            return Err(KernelError::geometry(
                "max_pool",
                format!(
                    "stride {} outside 1..={}",
                    self.stride, self.pool_size
                ),
            ));
        }
        if self.width < self.pool_size || self.height < self.pool_size {
            return Err(KernelError::geometry(
                "max_pool",
                format!(
                    "{}x{} window does not fit a {}x{} map",
                    self.pool_size, self.pool_size, self.width, self.height
                ),
            ));
        }
        Ok(())
    }

    fn window(&self, px: usize, py: usize) -> impl Iterator<Item = usize> + '_ {
        let step = self.step();
        let (x0, y0) = (px * step, py * step);
        (0..self.pool_size).flat_map(move |dy| {
            (0..self.pool_size).map(move |dx| (y0 + dy) * self.width + x0 + dx)
        })
    }
}

/// Writes the maximum of every pooling window of `input` into `output`.
pub fn downsample_max(
    input: &[f32],
    geometry: &PoolGeometry,
    output: &mut [f32],
) -> Result<(), KernelError> {
    geometry.validate()?;
    check_len("downsample_max", "input", input, geometry.input_len())?;
    check_len("downsample_max", "output", output, geometry.output_len())?;

    let out_w = geometry.output_width();
    for py in 0..geometry.output_height() {
        for px in 0..out_w {
            let mut best = f32::NEG_INFINITY;
            for idx in geometry.window(px, py) {
                if input[idx] > best {
                    best = input[idx];
                }
            }
            output[py * out_w + px] = best;
        }
    }
    Ok(())
}

/// Routes `upstream` gradient back through a max-pool.
///
/// Each window of `input` is re-scanned in row-major order and the first
/// position equal to the recorded maximum `pooled` receives the window's
/// upstream gradient. Gradient is added into `output`; every other position
/// is left untouched, so callers zero `output` first to get the plain routing.
pub fn upsample_max(
    input: &[f32],
    pooled: &[f32],
    upstream: &[f32],
    geometry: &PoolGeometry,
    output: &mut [f32],
) -> Result<(), KernelError> {
    geometry.validate()?;
    check_len("upsample_max", "input", input, geometry.input_len())?;
    check_len("upsample_max", "pooled", pooled, geometry.output_len())?;
    check_len("upsample_max", "upstream", upstream, geometry.output_len())?;
    check_len("upsample_max", "output", output, geometry.input_len())?;

    let out_w = geometry.output_width();
    for py in 0..geometry.output_height() {
        for px in 0..out_w {
            let o = py * out_w + px;
            if let Some(idx) = geometry.window(px, py).find(|&idx| input[idx] == pooled[o]) {
                output[idx] += upstream[o];
            }
        }
    }
    Ok(())
}
