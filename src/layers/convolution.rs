//! Multi-map 2-D convolution layer
//!
//! Each output feature map sums the convolution of every input map with its
//! own `k × k` kernel, adds a per-position bias and applies the configured
//! activation. `zero_pad` selects the same-size policy; without it the layer
//! uses the valid policy and shrinks each map by `k - 1`.

use std::sync::Arc;

use serde_json::Value;

use super::coefficients::{Dimension, LayerCoefficients};
use super::factory::LayerOptions;
use super::r#trait::{check_io, AcceleratedLayer, Layer};
use super::shape::{LayerKind, LayerShape, Shape};
use crate::config::WeightInit;
use crate::device::{ComputeContext, KernelLaunch};
use crate::error::{DeviceError, Result};
use crate::kernels::batch::{convolution_forward, ConvGeometry};
use crate::kernels::{
    convolution, convolution_accumulate, flip180, inflate, sum_over_batch, ConvRect, Padding,
};
use crate::layer_data::{LayerData, Slot};
use crate::optimizers::{Optimizer, SGD};
use crate::utils::{Activation, SimpleRng};

/// Settings of a convolution layer, as read from a network description.
///
/// # Fields
///
/// * `input_maps` - Feature maps of the previous layer
/// * `feature_maps` - Output feature maps
/// * `width`, `height` - Size of each input map
/// * `receptive_size` - Kernel side `k`
/// * `padding` - `Same` keeps the map size, `NoZero` shrinks it by `k - 1`
/// * `activation` - Sigmoid or ReLU
/// * `weight_decay` - L2 coefficient applied to the kernels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvolutionSettings {
    pub input_maps: usize,
    pub feature_maps: usize,
    pub width: usize,
    pub height: usize,
    pub receptive_size: usize,
    pub padding: Padding,
    pub activation: Activation,
    pub weight_decay: f32,
}

/// Convolution layer with one `k × k` kernel per (output map, input map) pair.
///
/// Kernels are stored `[feature_map][input_map][k·k]` and biases
/// `[feature_map][output position]`.
#[derive(Debug)]
pub struct ConvolutionLayer {
    settings: ConvolutionSettings,
    train_num: usize,
    rect: ConvRect,
    weights: Vec<f32>,
    biases: Vec<f32>,
    optimizer: SGD,
    device: Option<Arc<ComputeContext>>,
}

impl ConvolutionLayer {
    /// Create a convolution layer.
    ///
    /// Kernels use Xavier initialization with fan-in `input_maps · k²` and
    /// fan-out `feature_maps · k²` unless `options` asks for zero weights.
    /// Biases start at zero.
    ///
    /// # Arguments
    ///
    /// * `settings` - Geometry, padding and activation
    /// * `train_num` - Number of training examples, carried in the layer shape
    /// * `options` - Learn rate, weight initialization and optional device
    /// * `rng` - Random number generator for weight initialization
    ///
    /// # Returns
    ///
    /// The layer, or [`crate::NetworkError::Kernel`] if the kernel does not
    /// fit the input under the chosen padding
    pub fn new(
        settings: ConvolutionSettings,
        train_num: usize,
        options: &LayerOptions,
        rng: &mut SimpleRng,
    ) -> Result<Self> {
        let k = settings.receptive_size;
        let rect = ConvRect::for_padding(settings.padding, settings.width, settings.height, k, k)?;

        let mut weights = vec![0.0f32; settings.feature_maps * settings.input_maps * k * k];
        if options.weight_init == WeightInit::Xavier {
            rng.fill_xavier(
                &mut weights,
                settings.input_maps * k * k,
                settings.feature_maps * k * k,
            );
        }

        Ok(Self {
            settings,
            train_num,
            rect,
            weights,
            biases: vec![0.0f32; settings.feature_maps * rect.len()],
            optimizer: SGD::new(options.learn_rate).with_weight_decay(settings.weight_decay),
            device: options.device.clone(),
        })
    }

    pub fn settings(&self) -> &ConvolutionSettings {
        &self.settings
    }

    /// Output rectangle in correlation coordinates.
    pub fn rect(&self) -> ConvRect {
        self.rect
    }

    fn geometry(&self, batch: usize) -> ConvGeometry {
        ConvGeometry {
            batch,
            input_maps: self.settings.input_maps,
            feature_maps: self.settings.feature_maps,
            width: self.settings.width,
            height: self.settings.height,
            receptive_size: self.settings.receptive_size,
            padding: self.settings.padding,
        }
    }

    fn dimension(&self) -> Dimension {
        Dimension {
            feature_maps: self.settings.feature_maps,
            input_maps: self.settings.input_maps,
            receptive_size: self.settings.receptive_size,
        }
    }
}

impl Layer for ConvolutionLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Convolution
    }

    fn shape(&self) -> LayerShape {
        LayerShape {
            kind: LayerKind::Convolution,
            train_num: self.train_num,
            output: Shape::Image {
                width: self.rect.width,
                height: self.rect.height,
                maps: self.settings.feature_maps,
            },
            activation: self.settings.activation,
        }
    }

    fn forward(&self, prev: &LayerData, current: &mut LayerData) -> Result<()> {
        check_io(self.kind(), prev, current, self.input_size(), self.output_size())?;
        let geometry = self.geometry(current.batch_size());
        let slots = current.split_mut();
        convolution_forward(
            &self.weights,
            &self.biases,
            prev.slot(Slot::Activation),
            &geometry,
            self.settings.activation,
            slots.inter,
            slots.activation,
        )?;
        Ok(())
    }

    fn backward(&mut self, prev: &mut LayerData, current: &LayerData) -> Result<()> {
        check_io(self.kind(), prev, current, self.input_size(), self.output_size())?;
        let batch = current.batch_size();
        if batch == 0 {
            return Ok(());
        }

        let ConvolutionSettings {
            input_maps,
            feature_maps,
            width,
            height,
            receptive_size: k,
            padding,
            ..
        } = self.settings;
        let kk = k * k;
        let rect = self.rect;
        let (map_in, map_out) = (width * height, rect.len());
        let (in_len, out_len) = (input_maps * map_in, feature_maps * map_out);
        let prev_activation = prev.activation();

        // Kernels as they were during forward, rotated for error propagation.
        let mut flipped = vec![0.0f32; self.weights.len()];
        for (src, dst) in self
            .weights
            .chunks_exact(kk)
            .zip(flipped.chunks_exact_mut(kk))
        {
            flip180(src, dst)?;
        }

        // A valid forward pass is undone by a valid pass over the error maps
        // inflated by k - 1; the other policies use the mirrored rectangle.
        let margin = if padding == Padding::NoZero { k - 1 } else { 0 };
        let (src_w, src_h) = (rect.width + 2 * margin, rect.height + 2 * margin);
        let back_rect = if margin > 0 {
            ConvRect::for_padding(Padding::NoZero, src_w, src_h, k, k)?
        } else {
            rect.backward_of(width, height, k, k)
        };
        let kernel_rect = ConvRect {
            x: rect.x,
            y: rect.y,
            width: k,
            height: k,
        };

        let mut inflated = vec![0.0f32; if margin > 0 { feature_maps * src_w * src_h } else { 0 }];
        let mut grad_in = vec![0.0f32; in_len];
        let mut flipped_delta = vec![0.0f32; map_out];
        let mut correlation = vec![0.0f32; kk];
        let mut weight_grad = vec![0.0f32; self.weights.len()];
        let mut bias_grad = vec![0.0f32; out_len];

        let delta_all = current.slot(Slot::Error);
        let slots = prev.split_mut();
        for b in 0..batch {
            let delta = &delta_all[b * out_len..(b + 1) * out_len];
            let x = &slots.activation[b * in_len..(b + 1) * in_len];
            let source: &[f32] = if margin > 0 {
                inflate(delta, &mut inflated, rect.width, rect.height, feature_maps, margin)?;
                &inflated
            } else {
                delta
            };

            grad_in.fill(0.0);
            for o in 0..feature_maps {
                let src_map = &source[o * src_w * src_h..(o + 1) * src_w * src_h];
                flip180(&delta[o * map_out..(o + 1) * map_out], &mut flipped_delta)?;

                for i in 0..input_maps {
                    let kernel = (o * input_maps + i) * kk..(o * input_maps + i + 1) * kk;
                    convolution_accumulate(
                        src_map,
                        src_w,
                        src_h,
                        &flipped[kernel.clone()],
                        k,
                        k,
                        back_rect,
                        &mut grad_in[i * map_in..(i + 1) * map_in],
                    )?;

                    // Input correlated with the error map gives the rotated
                    // kernel gradient.
                    convolution(
                        &x[i * map_in..(i + 1) * map_in],
                        width,
                        height,
                        &flipped_delta,
                        rect.width,
                        rect.height,
                        kernel_rect,
                        &mut correlation,
                    )?;
                    for (g, c) in weight_grad[kernel].iter_mut().zip(correlation.iter().rev()) {
                        *g += c;
                    }
                }
            }

            let range = b * in_len..(b + 1) * in_len;
            prev_activation.scale_by_derivative(&slots.inter[range.clone()], &mut grad_in);
            for (e, g) in slots.error[range].iter_mut().zip(&grad_in) {
                *e += g;
            }
        }
        sum_over_batch(delta_all, &mut bias_grad, batch, out_len)?;

        let inv_batch = 1.0 / batch as f32;
        weight_grad.iter_mut().for_each(|g| *g *= inv_batch);
        bias_grad.iter_mut().for_each(|g| *g *= inv_batch);
        self.optimizer.update(&mut self.weights, &weight_grad);
        self.optimizer.update_biases(&mut self.biases, &bias_grad);
        Ok(())
    }

    fn create_layer_data(&self, batch_size: usize) -> Result<LayerData> {
        match &self.device {
            Some(context) => LayerData::mirrored(
                context,
                self.output_size(),
                batch_size,
                self.settings.activation,
                self.weights.len(),
                self.biases.len(),
            ),
            None => Ok(LayerData::new(
                self.output_size(),
                batch_size,
                self.settings.activation,
            )),
        }
    }

    fn import_layer(&mut self, value: &Value) -> Result<()> {
        let name = self.kind().name();
        let s = &self.settings;
        let coefficients = LayerCoefficients::parse(name, value, self.dimension())?;
        let weights = coefficients.flat_weights(
            name,
            s.feature_maps * s.input_maps,
            s.receptive_size * s.receptive_size,
        )?;
        let biases = coefficients.flat_biases(name, s.feature_maps, self.rect.len())?;
        self.weights = weights;
        self.biases = biases;
        Ok(())
    }

    fn export_layer(&self) -> Value {
        let k = self.settings.receptive_size;
        LayerCoefficients::from_flat(
            self.dimension(),
            &self.weights,
            k * k,
            &self.biases,
            self.rect.len(),
        )
        .to_value()
    }

    fn input_size(&self) -> usize {
        self.settings.input_maps * self.settings.width * self.settings.height
    }

    fn output_size(&self) -> usize {
        self.settings.feature_maps * self.rect.len()
    }

    fn weights(&self) -> &[f32] {
        &self.weights
    }

    fn biases(&self) -> &[f32] {
        &self.biases
    }

    fn accelerated(&self) -> Option<&dyn AcceleratedLayer> {
        self.device.as_ref().map(|_| self as &dyn AcceleratedLayer)
    }
}

impl AcceleratedLayer for ConvolutionLayer {
    fn forward_on_device(&self, prev: &LayerData, current: &mut LayerData) -> Result<()> {
        check_io(self.kind(), prev, current, self.input_size(), self.output_size())?;
        let context = self.device.as_ref().ok_or(DeviceError::NotMirrored)?;

        current.stage_parameters(&self.weights, &self.biases)?;
        prev.sync_to_device(Slot::Activation)?;
        context.dispatch(&KernelLaunch::ConvolutionForward {
            weights: current.device_handle(Slot::Weight)?,
            biases: current.device_handle(Slot::Bias)?,
            input: prev.device_handle(Slot::Activation)?,
            inter: current.device_handle(Slot::InterValue)?,
            output: current.device_handle(Slot::Activation)?,
            geometry: self.geometry(current.batch_size()),
            activation: self.settings.activation,
        })?;
        current.sync_from_device(Slot::InterValue)?;
        current.sync_from_device(Slot::Activation)?;
        Ok(())
    }
}
