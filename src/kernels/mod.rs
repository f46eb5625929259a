//! Compute kernel library
//!
//! Free numerical primitives over flat `f32` buffers with explicit dimensions.
//! Kernels hold no state; only the normalization keeps a per-call scratch map.
//! Every dimension is checked against the buffers it indexes; a short buffer
//! is reported as [`KernelError::BufferTooSmall`].
//!
//! Output buffers are borrowed mutably while inputs are borrowed shared, so an
//! output can never alias an input. This is what rules out an in-place
//! [`flip180`].

pub mod batch;
pub mod convolution;
pub mod normalize;
pub mod pooling;

pub use convolution::{
    convolution, convolution_accumulate, convolve_no_zero_pad, convolve_same_zero_pad,
    convolve_wide_zero_pad, ConvRect, Padding,
};
pub use normalize::{normalize_backward, normalize_forward, NormalizeParams};
pub use pooling::{downsample_max, upsample_max, PoolGeometry};

use crate::error::KernelError;

pub(crate) fn check_len(
    op: &'static str,
    buffer: &'static str,
    slice: &[f32],
    required: usize,
) -> Result<(), KernelError> {
    if slice.len() < required {
        return Err(KernelError::BufferTooSmall {
            op,
            buffer,
            len: slice.len(),
            required,
        });
    }
    Ok(())
}

/// Elementwise `out = a + b` over the first `dim` elements.
pub fn add(a: &[f32], b: &[f32], out: &mut [f32], dim: usize) -> Result<(), KernelError> {
    check_len("add", "a", a, dim)?;
    check_len("add", "b", b, dim)?;
    check_len("add", "out", out, dim)?;
    for ((o, &x), &y) in out[..dim].iter_mut().zip(&a[..dim]).zip(&b[..dim]) {
        *o = x + y;
    }
    Ok(())
}

/// Elementwise `out = a ⊙ b` over the first `dim` elements.
pub fn pointwise_multiply(
    a: &[f32],
    b: &[f32],
    out: &mut [f32],
    dim: usize,
) -> Result<(), KernelError> {
    check_len("pointwise_multiply", "a", a, dim)?;
    check_len("pointwise_multiply", "b", b, dim)?;
    check_len("pointwise_multiply", "out", out, dim)?;
    for ((o, &x), &y) in out[..dim].iter_mut().zip(&a[..dim]).zip(&b[..dim]) {
        *o = x * y;
    }
    Ok(())
}

/// Elementwise `out = factor · a` over the first `dim` elements.
pub fn scale(a: &[f32], factor: f32, out: &mut [f32], dim: usize) -> Result<(), KernelError> {
    check_len("scale", "a", a, dim)?;
    check_len("scale", "out", out, dim)?;
    for (o, &x) in out[..dim].iter_mut().zip(&a[..dim]) {
        *o = factor * x;
    }
    Ok(())
}

/// Row-major `dim_r × dim_c` matrix times a `dim_c` vector into a `dim_r` vector.
pub fn matrix_vector_product(
    matrix: &[f32],
    vector: &[f32],
    out: &mut [f32],
    dim_r: usize,
    dim_c: usize,
) -> Result<(), KernelError> {
    check_len("matrix_vector_product", "matrix", matrix, dim_r * dim_c)?;
    check_len("matrix_vector_product", "vector", vector, dim_c)?;
    check_len("matrix_vector_product", "out", out, dim_r)?;
    for (r, o) in out[..dim_r].iter_mut().enumerate() {
        let row = &matrix[r * dim_c..(r + 1) * dim_c];
        *o = row.iter().zip(&vector[..dim_c]).map(|(m, v)| m * v).sum();
    }
    Ok(())
}

/// Reduces `num_v` consecutive vectors of length `dim_v` into `out`.
///
/// `out` is zeroed before accumulation.
pub fn sum_over_batch(
    vectors: &[f32],
    out: &mut [f32],
    num_v: usize,
    dim_v: usize,
) -> Result<(), KernelError> {
    check_len("sum_over_batch", "vectors", vectors, num_v * dim_v)?;
    check_len("sum_over_batch", "out", out, dim_v)?;
    let out = &mut out[..dim_v];
    out.fill(0.0);
    for vector in vectors[..num_v * dim_v].chunks_exact(dim_v.max(1)) {
        for (o, &v) in out.iter_mut().zip(vector) {
            *o += v;
        }
    }
    Ok(())
}

/// `dim_n × dim_m` outer product `out[i][j] = a[i] · b[j]`.
pub fn outer_product(
    a: &[f32],
    b: &[f32],
    out: &mut [f32],
    dim_n: usize,
    dim_m: usize,
) -> Result<(), KernelError> {
    check_len("outer_product", "a", a, dim_n)?;
    check_len("outer_product", "b", b, dim_m)?;
    check_len("outer_product", "out", out, dim_n * dim_m)?;
    for (i, &x) in a[..dim_n].iter().enumerate() {
        let row = &mut out[i * dim_m..(i + 1) * dim_m];
        for (o, &y) in row.iter_mut().zip(&b[..dim_m]) {
            *o = x * y;
        }
    }
    Ok(())
}

/// Transposes a row-major `dim_r × dim_c` matrix into a `dim_c × dim_r` one.
pub fn transpose(
    matrix: &[f32],
    out: &mut [f32],
    dim_r: usize,
    dim_c: usize,
) -> Result<(), KernelError> {
    check_len("transpose", "matrix", matrix, dim_r * dim_c)?;
    check_len("transpose", "out", out, dim_r * dim_c)?;
    for r in 0..dim_r {
        for c in 0..dim_c {
            out[c * dim_r + r] = matrix[r * dim_c + c];
        }
    }
    Ok(())
}

/// Reverses the element order of `input` into `output`.
///
/// For a square kernel stored row-major this is the 180° rotation used to
/// mirror a convolution kernel during back-propagation. Flipping in place is
/// not offered: `output` must be a distinct buffer.
pub fn flip180(input: &[f32], output: &mut [f32]) -> Result<(), KernelError> {
    let dim = input.len();
    check_len("flip180", "output", output, dim)?;
    for (o, &v) in output[..dim].iter_mut().zip(input.iter().rev()) {
        *o = v;
    }
    Ok(())
}

/// Zero-pads `count` consecutive `width × height` matrices by `margin` on
/// every side, producing `(width + 2·margin) × (height + 2·margin)` matrices.
pub fn inflate(
    input: &[f32],
    output: &mut [f32],
    width: usize,
    height: usize,
    count: usize,
    margin: usize,
) -> Result<(), KernelError> {
    let out_w = width + 2 * margin;
    let out_h = height + 2 * margin;
    check_len("inflate", "input", input, count * width * height)?;
    check_len("inflate", "output", output, count * out_w * out_h)?;

    for m in 0..count {
        let src = &input[m * width * height..(m + 1) * width * height];
        let dst = &mut output[m * out_w * out_h..(m + 1) * out_w * out_h];
        dst.fill(0.0);
        for y in 0..height {
            let row = (y + margin) * out_w + margin;
            dst[row..row + width].copy_from_slice(&src[y * width..(y + 1) * width]);
        }
    }
    Ok(())
}

/// Index of the largest element (first occurrence on ties).
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}
