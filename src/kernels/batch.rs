//! Batched layer propagations.
//!
//! These are the forward passes of the four layer kinds expressed over a whole
//! mini-batch of example-major buffers. The CPU layers and the reference
//! accelerator backend both call them, so the two execution paths produce the
//! same bits.

use serde::{Deserialize, Serialize};

use super::convolution::{convolution_accumulate, ConvRect, Padding};
use super::normalize::{normalize_forward as normalize_map, NormalizeParams};
use super::pooling::{downsample_max, PoolGeometry};
use super::{check_len, matrix_vector_product};
use crate::error::KernelError;
use crate::utils::Activation;

/// Shape of a fully connected propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenseGeometry {
    pub batch: usize,
    pub inputs: usize,
    pub outputs: usize,
}

/// `inter = W · x + b` and `activation = f(inter)` for every example.
///
/// `weights` is row-major `outputs × inputs`.
pub fn dense_forward(
    weights: &[f32],
    biases: &[f32],
    input: &[f32],
    geometry: &DenseGeometry,
    activation: Activation,
    inter: &mut [f32],
    output: &mut [f32],
) -> Result<(), KernelError> {
    let DenseGeometry {
        batch,
        inputs,
        outputs,
    } = *geometry;
    check_len("dense_forward", "input", input, batch * inputs)?;
    check_len("dense_forward", "inter", inter, batch * outputs)?;
    check_len("dense_forward", "output", output, batch * outputs)?;
    check_len("dense_forward", "biases", biases, outputs)?;

    for b in 0..batch {
        let x = &input[b * inputs..(b + 1) * inputs];
        let z = &mut inter[b * outputs..(b + 1) * outputs];
        matrix_vector_product(weights, x, z, outputs, inputs)?;
        for (zi, &bias) in z.iter_mut().zip(&biases[..outputs]) {
            *zi += bias;
        }
        activation.apply_slice(z, &mut output[b * outputs..(b + 1) * outputs]);
    }
    Ok(())
}

/// Shape of a multi-map convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvGeometry {
    pub batch: usize,
    pub input_maps: usize,
    pub feature_maps: usize,
    pub width: usize,
    pub height: usize,
    pub receptive_size: usize,
    pub padding: Padding,
}

impl ConvGeometry {
    pub fn rect(&self) -> Result<ConvRect, KernelError> {
        ConvRect::for_padding(
            self.padding,
            self.width,
            self.height,
            self.receptive_size,
            self.receptive_size,
        )
    }

    pub fn kernel_len(&self) -> usize {
        self.receptive_size * self.receptive_size
    }

    pub fn input_map_len(&self) -> usize {
        self.width * self.height
    }

    /// Number of weights: one kernel per (feature map, input map) pair.
    pub fn weight_len(&self) -> usize {
        self.feature_maps * self.input_maps * self.kernel_len()
    }
}

/// Convolves every input map against its kernel, sums per feature map, adds
/// the per-position bias and applies `activation`.
///
/// Weights are laid out `[feature_map][input_map][k·k]`, biases
/// `[feature_map][output position]`.
pub fn convolution_forward(
    weights: &[f32],
    biases: &[f32],
    input: &[f32],
    geometry: &ConvGeometry,
    activation: Activation,
    inter: &mut [f32],
    output: &mut [f32],
) -> Result<(), KernelError> {
    let rect = geometry.rect()?;
    let map_in = geometry.input_map_len();
    let map_out = rect.len();
    let k = geometry.receptive_size;
    let in_len = geometry.input_maps * map_in;
    let out_len = geometry.feature_maps * map_out;

    check_len("convolution_forward", "weights", weights, geometry.weight_len())?;
    check_len("convolution_forward", "biases", biases, out_len)?;
    check_len("convolution_forward", "input", input, geometry.batch * in_len)?;
    check_len("convolution_forward", "inter", inter, geometry.batch * out_len)?;
    check_len("convolution_forward", "output", output, geometry.batch * out_len)?;

    for b in 0..geometry.batch {
        let example = &input[b * in_len..(b + 1) * in_len];
        for o in 0..geometry.feature_maps {
            let z = &mut inter[b * out_len + o * map_out..b * out_len + (o + 1) * map_out];
            z.copy_from_slice(&biases[o * map_out..(o + 1) * map_out]);
            for i in 0..geometry.input_maps {
                let kernel = &weights[(o * geometry.input_maps + i) * k * k..][..k * k];
                convolution_accumulate(
                    &example[i * map_in..(i + 1) * map_in],
                    geometry.width,
                    geometry.height,
                    kernel,
                    k,
                    k,
                    rect,
                    z,
                )?;
            }
        }
        activation.apply_slice(
            &inter[b * out_len..(b + 1) * out_len],
            &mut output[b * out_len..(b + 1) * out_len],
        );
    }
    Ok(())
}

/// Max-pools `maps` feature maps of every example.
pub fn max_pool_forward(
    input: &[f32],
    geometry: &PoolGeometry,
    maps: usize,
    batch: usize,
    output: &mut [f32],
) -> Result<(), KernelError> {
    let (map_in, map_out) = (geometry.input_len(), geometry.output_len());
    check_len("max_pool_forward", "input", input, batch * maps * map_in)?;
    check_len("max_pool_forward", "output", output, batch * maps * map_out)?;
    for m in 0..batch * maps {
        downsample_max(
            &input[m * map_in..(m + 1) * map_in],
            geometry,
            &mut output[m * map_out..(m + 1) * map_out],
        )?;
    }
    Ok(())
}

/// Local response normalization of `maps` feature maps of every example.
pub fn normalize_forward(
    input: &[f32],
    width: usize,
    height: usize,
    maps: usize,
    batch: usize,
    params: &NormalizeParams,
    output: &mut [f32],
) -> Result<(), KernelError> {
    let map = width * height;
    check_len("normalize_forward", "input", input, batch * maps * map)?;
    check_len("normalize_forward", "output", output, batch * maps * map)?;
    for m in 0..batch * maps {
        normalize_map(
            &input[m * map..(m + 1) * map],
            width,
            height,
            params,
            &mut output[m * map..(m + 1) * map],
        )?;
    }
    Ok(())
}
