//! Local response normalization over a spatial neighbourhood.
//!
//! For a feature map `a` and the square window `N(p)` of half-width `r`
//! around `p` (clipped at the borders):
//!
//! ```text
//! D(p) = 1 + alpha · Σ_{q ∈ N(p)} a(q)²
//! b(p) = a(p) · D(p)^(-beta)
//! ```
//!
//! Since the window relation is symmetric, the gradient is
//!
//! ```text
//! ∂L/∂a(q) = g(q)·D(q)^(-beta) - 2·alpha·beta·a(q) · Σ_{p ∈ N(q)} g(p)·a(p)·D(p)^(-beta-1)
//! ```

use serde::{Deserialize, Serialize};

use super::check_len;
use crate::error::KernelError;

/// Hyperparameters of the normalization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizeParams {
    pub half_width: usize,
    pub alpha: f32,
    pub beta: f32,
}

fn neighbourhood(
    x: usize,
    y: usize,
    width: usize,
    height: usize,
    r: usize,
) -> impl Iterator<Item = usize> {
    let (x0, x1) = (x.saturating_sub(r), (x + r).min(width - 1));
    let (y0, y1) = (y.saturating_sub(r), (y + r).min(height - 1));
    (y0..=y1).flat_map(move |qy| (x0..=x1).map(move |qx| qy * width + qx))
}

fn denominators(input: &[f32], width: usize, height: usize, params: &NormalizeParams) -> Vec<f32> {
    let mut denom = vec![0.0f32; width * height];
    for y in 0..height {
        for x in 0..width {
            let energy: f32 = neighbourhood(x, y, width, height, params.half_width)
                .map(|q| input[q] * input[q])
                .sum();
            denom[y * width + x] = 1.0 + params.alpha * energy;
        }
    }
    denom
}

/// Normalizes one `width × height` map of `input` into `output`.
pub fn normalize_forward(
    input: &[f32],
    width: usize,
    height: usize,
    params: &NormalizeParams,
    output: &mut [f32],
) -> Result<(), KernelError> {
    let len = width * height;
    check_len("normalize_forward", "input", input, len)?;
    check_len("normalize_forward", "output", output, len)?;
    if len == 0 {
        return Ok(());
    }

    let denom = denominators(input, width, height, params);
    for ((o, &a), &d) in output[..len].iter_mut().zip(&input[..len]).zip(&denom) {
        *o = a * d.powf(-params.beta);
    }
    Ok(())
}

/// Adds the gradient of the normalization w.r.t. `input` into `output`,
/// given the upstream gradient on the normalized map.
pub fn normalize_backward(
    input: &[f32],
    upstream: &[f32],
    width: usize,
    height: usize,
    params: &NormalizeParams,
    output: &mut [f32],
) -> Result<(), KernelError> {
    let len = width * height;
    check_len("normalize_backward", "input", input, len)?;
    check_len("normalize_backward", "upstream", upstream, len)?;
    check_len("normalize_backward", "output", output, len)?;
    if len == 0 {
        return Ok(());
    }

    let denom = denominators(input, width, height, params);
    // g(p)·a(p)·D(p)^(-beta-1), shared by every neighbour of p.
    let cross: Vec<f32> = (0..len)
        .map(|p| upstream[p] * input[p] * denom[p].powf(-params.beta - 1.0))
        .collect();

    let coupling = 2.0 * params.alpha * params.beta;
    for y in 0..height {
        for x in 0..width {
            let q = y * width + x;
            let spread: f32 = neighbourhood(x, y, width, height, params.half_width)
                .map(|p| cross[p])
                .sum();
            output[q] += upstream[q] * denom[q].powf(-params.beta) - coupling * input[q] * spread;
        }
    }
    Ok(())
}
