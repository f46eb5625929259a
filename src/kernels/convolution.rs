//! 2-D convolution with three boundary policies.
//!
//! The primitive computes a true convolution (cross-correlation against the
//! spatially flipped kernel) over a caller-chosen output rectangle. Output
//! position `(ox, oy)` of the rectangle correlates the flipped kernel with the
//! input window whose top-left corner sits at `(rect.x + ox, rect.y + oy)`;
//! taps falling outside the input contribute zero. The three policies differ
//! only in the rectangle:
//!
//! | policy  | origin                      | size               |
//! |---------|-----------------------------|--------------------|
//! | NoZero  | `(0, 0)`                    | `dim - k + 1`      |
//! | Same    | `(-(k-1)/2, -(k-1)/2)`      | `dim`              |
//! | Wide    | `(-(k-1), -(k-1))`          | `dim + k - 1`      |

use serde::{Deserialize, Serialize};

use super::check_len;
use crate::error::KernelError;

/// Boundary policy of a convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Padding {
    /// "valid": no implicit border.
    NoZero,
    /// Output the size of the input, kernel zero-padded at the borders.
    Same,
    /// "full": every overlap of kernel and input, used for back-propagation.
    Wide,
}

/// Output rectangle in the correlation coordinate space described above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvRect {
    pub x: isize,
    pub y: isize,
    pub width: usize,
    pub height: usize,
}

impl ConvRect {
    /// Rectangle for `policy` applied to a `width × height` input and a
    /// `k_width × k_height` kernel.
    pub fn for_padding(
        policy: Padding,
        width: usize,
        height: usize,
        k_width: usize,
        k_height: usize,
    ) -> Result<Self, KernelError> {
        if k_width == 0 || k_height == 0 {
            return Err(KernelError::geometry("convolution", "kernel has no taps"));
        }
        match policy {
            Padding::NoZero => {
                if width < k_width || height < k_height {
                    return Err(KernelError::geometry(
                        "convolution",
                        format!(
                            "{}x{} kernel does not fit a {}x{} input without padding",
                            k_width, k_height, width, height
                        ),
                    ));
                }
                Ok(ConvRect {
                    x: 0,
                    y: 0,
                    width: width - k_width + 1,
                    height: height - k_height + 1,
                })
            }
            Padding::Same => Ok(ConvRect {
                x: -(((k_width - 1) / 2) as isize),
                y: -(((k_height - 1) / 2) as isize),
                width,
                height,
            }),
            Padding::Wide => Ok(ConvRect {
                x: -((k_width - 1) as isize),
                y: -((k_height - 1) as isize),
                width: width + k_width - 1,
                height: height + k_height - 1,
            }),
        }
    }

    /// Rectangle that carries error from this forward rectangle's output back
    /// onto a `width × height` input when convolving with the flipped kernel.
    pub fn backward_of(self, width: usize, height: usize, k_width: usize, k_height: usize) -> Self {
        ConvRect {
            x: -((k_width - 1) as isize) - self.x,
            y: -((k_height - 1) as isize) - self.y,
            width,
            height,
        }
    }

    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[allow(clippy::too_many_arguments)]
fn convolve_into(
    op: &'static str,
    input: &[f32],
    width: usize,
    height: usize,
    kernel: &[f32],
    k_width: usize,
    k_height: usize,
    rect: ConvRect,
    output: &mut [f32],
    accumulate: bool,
) -> Result<(), KernelError> {
    check_len(op, "input", input, width * height)?;
    check_len(op, "kernel", kernel, k_width * k_height)?;
    check_len(op, "output", output, rect.len())?;

    for oy in 0..rect.height {
        for ox in 0..rect.width {
            let px = rect.x + ox as isize;
            let py = rect.y + oy as isize;
            let mut sum = 0.0f32;

            for ky in 0..k_height {
                let iy = py + ky as isize;
                if iy < 0 || iy >= height as isize {
                    continue;
                }
                let in_row = iy as usize * width;
                let k_row = (k_height - 1 - ky) * k_width;

                for kx in 0..k_width {
                    let ix = px + kx as isize;
                    if ix < 0 || ix >= width as isize {
                        continue;
                    }
                    sum += input[in_row + ix as usize] * kernel[k_row + (k_width - 1 - kx)];
                }
            }

            let out = &mut output[oy * rect.width + ox];
            if accumulate {
                *out += sum;
            } else {
                *out = sum;
            }
        }
    }
    Ok(())
}

/// Convolves a `width × height` input with a `k_width × k_height` kernel over
/// `rect`, overwriting the first `rect.width · rect.height` outputs.
#[allow(clippy::too_many_arguments)]
pub fn convolution(
    input: &[f32],
    width: usize,
    height: usize,
    kernel: &[f32],
    k_width: usize,
    k_height: usize,
    rect: ConvRect,
    output: &mut [f32],
) -> Result<(), KernelError> {
    convolve_into(
        "convolution",
        input,
        width,
        height,
        kernel,
        k_width,
        k_height,
        rect,
        output,
        false,
    )
}

/// Same as [`convolution`] but adds into `output`.
#[allow(clippy::too_many_arguments)]
pub fn convolution_accumulate(
    input: &[f32],
    width: usize,
    height: usize,
    kernel: &[f32],
    k_width: usize,
    k_height: usize,
    rect: ConvRect,
    output: &mut [f32],
) -> Result<(), KernelError> {
    convolve_into(
        "convolution_accumulate",
        input,
        width,
        height,
        kernel,
        k_width,
        k_height,
        rect,
        output,
        true,
    )
}

fn convolve_policy(
    policy: Padding,
    input: &[f32],
    width: usize,
    height: usize,
    kernel: &[f32],
    k: usize,
    output: &mut [f32],
) -> Result<ConvRect, KernelError> {
    let rect = ConvRect::for_padding(policy, width, height, k, k)?;
    convolution(input, width, height, kernel, k, k, rect, output)?;
    Ok(rect)
}

/// "Valid" convolution with a square `k × k` kernel; returns the output rectangle.
pub fn convolve_no_zero_pad(
    input: &[f32],
    width: usize,
    height: usize,
    kernel: &[f32],
    k: usize,
    output: &mut [f32],
) -> Result<ConvRect, KernelError> {
    convolve_policy(Padding::NoZero, input, width, height, kernel, k, output)
}

/// Convolution keeping the input size, zero-padded at the borders.
pub fn convolve_same_zero_pad(
    input: &[f32],
    width: usize,
    height: usize,
    kernel: &[f32],
    k: usize,
    output: &mut [f32],
) -> Result<ConvRect, KernelError> {
    convolve_policy(Padding::Same, input, width, height, kernel, k, output)
}

/// "Full" convolution producing `(width + k - 1) × (height + k - 1)` outputs.
pub fn convolve_wide_zero_pad(
    input: &[f32],
    width: usize,
    height: usize,
    kernel: &[f32],
    k: usize,
    output: &mut [f32],
) -> Result<ConvRect, KernelError> {
    convolve_policy(Padding::Wide, input, width, height, kernel, k, output)
}
