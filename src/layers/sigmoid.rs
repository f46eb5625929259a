//! Fully connected layer with a logistic sigmoid activation
//!
//! `inter = W · x + b`, `activation = σ(inter)`, with `W` stored row-major as
//! `output_size × input_size`.

use std::sync::Arc;

use serde_json::Value;

use super::coefficients::{Dimension, LayerCoefficients};
use super::factory::LayerOptions;
use super::r#trait::{check_io, AcceleratedLayer, Layer};
use super::shape::{LayerKind, LayerShape, Shape};
use crate::config::WeightInit;
use crate::device::{ComputeContext, KernelLaunch};
use crate::error::{DeviceError, Result};
use crate::kernels::batch::{dense_forward, DenseGeometry};
use crate::kernels::{matrix_vector_product, outer_product, sum_over_batch, transpose};
use crate::layer_data::{LayerData, Slot};
use crate::optimizers::{Optimizer, SGD};
use crate::utils::{Activation, SimpleRng};

/// Dense layer with sigmoid units.
///
/// # Example
///
/// ```
/// use rust_neural_graph::layers::{Layer, LayerOptions, SigmoidLayer};
/// use rust_neural_graph::utils::SimpleRng;
///
/// let mut rng = SimpleRng::new(42);
/// let layer = SigmoidLayer::new(784, 10, 60000, &LayerOptions::new(0.1), &mut rng);
/// assert_eq!(layer.parameter_count(), 784 * 10 + 10);
/// ```
#[derive(Debug)]
pub struct SigmoidLayer {
    input_size: usize,
    output_size: usize,
    train_num: usize,
    weights: Vec<f32>,
    biases: Vec<f32>,
    optimizer: SGD,
    device: Option<Arc<ComputeContext>>,
}

impl SigmoidLayer {
    /// Creates the layer with weights initialized per `options.weight_init`
    /// and zero biases.
    ///
    /// # Arguments
    ///
    /// * `input_size` - Features read from the previous layer
    /// * `output_size` - Number of sigmoid units
    /// * `train_num` - Number of training examples, carried in the layer shape
    /// * `options` - Learn rate, weight initialization and optional device
    /// * `rng` - Random number generator for Xavier initialization
    pub fn new(
        input_size: usize,
        output_size: usize,
        train_num: usize,
        options: &LayerOptions,
        rng: &mut SimpleRng,
    ) -> Self {
        let mut weights = vec![0.0f32; input_size * output_size];
        if options.weight_init == WeightInit::Xavier {
            rng.fill_xavier(&mut weights, input_size, output_size);
        }

        Self {
            input_size,
            output_size,
            train_num,
            weights,
            biases: vec![0.0f32; output_size],
            optimizer: SGD::new(options.learn_rate),
            device: options.device.clone(),
        }
    }

    fn geometry(&self, batch: usize) -> DenseGeometry {
        DenseGeometry {
            batch,
            inputs: self.input_size,
            outputs: self.output_size,
        }
    }

    fn dimension(&self) -> Dimension {
        Dimension {
            feature_maps: self.output_size,
            input_maps: self.input_size,
            receptive_size: 1,
        }
    }
}

impl Layer for SigmoidLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Sigmoid
    }

    fn shape(&self) -> LayerShape {
        LayerShape {
            kind: LayerKind::Sigmoid,
            train_num: self.train_num,
            output: Shape::Vector(self.output_size),
            activation: Activation::Sigmoid,
        }
    }

    fn forward(&self, prev: &LayerData, current: &mut LayerData) -> Result<()> {
        check_io(self.kind(), prev, current, self.input_size, self.output_size)?;
        let geometry = self.geometry(current.batch_size());
        let slots = current.split_mut();
        dense_forward(
            &self.weights,
            &self.biases,
            prev.slot(Slot::Activation),
            &geometry,
            Activation::Sigmoid,
            slots.inter,
            slots.activation,
        )?;
        Ok(())
    }

    fn backward(&mut self, prev: &mut LayerData, current: &LayerData) -> Result<()> {
        check_io(self.kind(), prev, current, self.input_size, self.output_size)?;
        let batch = current.batch_size();
        if batch == 0 {
            return Ok(());
        }
        let (n_in, n_out) = (self.input_size, self.output_size);
        let prev_activation = prev.activation();
        let delta = current.slot(Slot::Error);

        let mut weights_t = vec![0.0f32; n_in * n_out];
        transpose(&self.weights, &mut weights_t, n_out, n_in)?;

        let mut weight_grad = vec![0.0f32; n_out * n_in];
        let mut bias_grad = vec![0.0f32; n_out];
        let mut outer = vec![0.0f32; n_out * n_in];
        let mut back = vec![0.0f32; n_in];

        let slots = prev.split_mut();
        for b in 0..batch {
            let d = &delta[b * n_out..(b + 1) * n_out];
            let range = b * n_in..(b + 1) * n_in;

            // Error for the previous layer, through the weights used in forward.
            matrix_vector_product(&weights_t, d, &mut back, n_in, n_out)?;
            prev_activation.scale_by_derivative(&slots.inter[range.clone()], &mut back);
            for (e, g) in slots.error[range.clone()].iter_mut().zip(&back) {
                *e += g;
            }

            outer_product(d, &slots.activation[range], &mut outer, n_out, n_in)?;
            for (w, o) in weight_grad.iter_mut().zip(&outer) {
                *w += o;
            }
        }
        sum_over_batch(delta, &mut bias_grad, batch, n_out)?;

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
                self.output_size,
                batch_size,
                Activation::Sigmoid,
                self.weights.len(),
                self.biases.len(),
            ),
            None => Ok(LayerData::new(
                self.output_size,
                batch_size,
                Activation::Sigmoid,
            )),
        }
    }

    fn import_layer(&mut self, value: &Value) -> Result<()> {
        let name = self.kind().name();
        let coefficients = LayerCoefficients::parse(name, value, self.dimension())?;
        let weights = coefficients.flat_weights(name, self.output_size, self.input_size)?;
        let biases = coefficients.flat_biases(name, 1, self.output_size)?;
        self.weights = weights;
        self.biases = biases;
        Ok(())
    }

    fn export_layer(&self) -> Value {
        LayerCoefficients::from_flat(
            self.dimension(),
            &self.weights,
            self.input_size,
            &self.biases,
            self.output_size,
        )
        .to_value()
    }

    fn input_size(&self) -> usize {
        self.input_size
    }

    fn output_size(&self) -> usize {
        self.output_size
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

impl AcceleratedLayer for SigmoidLayer {
    fn forward_on_device(&self, prev: &LayerData, current: &mut LayerData) -> Result<()> {
        check_io(self.kind(), prev, current, self.input_size, self.output_size)?;
        let context = self.device.as_ref().ok_or(DeviceError::NotMirrored)?;

        current.stage_parameters(&self.weights, &self.biases)?;
        prev.sync_to_device(Slot::Activation)?;
        context.dispatch(&KernelLaunch::DenseForward {
            weights: current.device_handle(Slot::Weight)?,
            biases: current.device_handle(Slot::Bias)?,
            input: prev.device_handle(Slot::Activation)?,
            inter: current.device_handle(Slot::InterValue)?,
            output: current.device_handle(Slot::Activation)?,
            geometry: self.geometry(current.batch_size()),
            activation: Activation::Sigmoid,
        })?;
        current.sync_from_device(Slot::InterValue)?;
        current.sync_from_device(Slot::Activation)?;
        Ok(())
    }
}
