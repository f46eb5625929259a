//! Local response normalization layer.
//!
//! Normalizes each activation by the energy of its spatial neighbourhood
//! within the same feature map (see [`crate::kernels::normalize`]). The layer
//! has no parameters and its output is not passed through a further
//! activation, so both output slots hold the normalized values.

use std::sync::Arc;

use serde_json::Value;

use super::coefficients::{Dimension, LayerCoefficients};
use super::r#trait::{check_io, AcceleratedLayer, Layer};
use super::shape::{LayerKind, LayerShape, Shape};
use crate::device::{ComputeContext, KernelLaunch};
use crate::error::{DeviceError, Result};
use crate::kernels::batch::normalize_forward;
use crate::kernels::{normalize_backward, NormalizeParams};
use crate::layer_data::{LayerData, Slot};
use crate::utils::Activation;

#[derive(Debug)]
pub struct NormalizeLayer {
    params: NormalizeParams,
    width: usize,
    height: usize,
    maps: usize,
    train_num: usize,
    device: Option<Arc<ComputeContext>>,
}

impl NormalizeLayer {
    pub fn new(
        params: NormalizeParams,
        (width, height, maps): (usize, usize, usize),
        train_num: usize,
        device: Option<Arc<ComputeContext>>,
    ) -> Self {
        Self {
            params,
            width,
            height,
            maps,
            train_num,
            device,
        }
    }

    pub fn params(&self) -> &NormalizeParams {
        &self.params
    }

    fn dimension(&self) -> Dimension {
        Dimension {
            feature_maps: self.maps,
            input_maps: self.maps,
            receptive_size: 2 * self.params.half_width + 1,
        }
    }
}

impl Layer for NormalizeLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Normalize
    }

    fn shape(&self) -> LayerShape {
        LayerShape {
            kind: LayerKind::Normalize,
            train_num: self.train_num,
            output: Shape::Image {
                width: self.width,
                height: self.height,
                maps: self.maps,
            },
            activation: Activation::Identity,
        }
    }

    fn forward(&self, prev: &LayerData, current: &mut LayerData) -> Result<()> {
        check_io(self.kind(), prev, current, self.input_size(), self.output_size())?;
        let batch = current.batch_size();
        let slots = current.split_mut();
        normalize_forward(
            prev.slot(Slot::Activation),
            self.width,
            self.height,
            self.maps,
            batch,
            &self.params,
            slots.activation,
        )?;
        slots.inter.copy_from_slice(slots.activation);
        Ok(())
    }

    fn backward(&mut self, prev: &mut LayerData, current: &LayerData) -> Result<()> {
        check_io(self.kind(), prev, current, self.input_size(), self.output_size())?;
        let map = self.width * self.height;
        let prev_activation = prev.activation();
        let upstream = current.slot(Slot::Error);
        let slots = prev.split_mut();
        let mut grad = vec![0.0f32; map];

        for m in 0..current.batch_size() * self.maps {
            let range = m * map..(m + 1) * map;
            grad.fill(0.0);
            normalize_backward(
                &slots.activation[range.clone()],
                &upstream[range.clone()],
                self.width,
                self.height,
                &self.params,
                &mut grad,
            )?;
            prev_activation.scale_by_derivative(&slots.inter[range.clone()], &mut grad);
            for (e, g) in slots.error[range].iter_mut().zip(&grad) {
                *e += g;
            }
        }
        Ok(())
    }

    fn create_layer_data(&self, batch_size: usize) -> Result<LayerData> {
        match &self.device {
            Some(context) => LayerData::mirrored(
                context,
                self.output_size(),
                batch_size,
                Activation::Identity,
                0,
                0,
            ),
            None => Ok(LayerData::new(
                self.output_size(),
                batch_size,
                Activation::Identity,
            )),
        }
    }

    fn import_layer(&mut self, value: &Value) -> Result<()> {
        let name = self.kind().name();
        let coefficients = LayerCoefficients::parse(name, value, self.dimension())?;
        coefficients.flat_weights(name, 0, 0)?;
        coefficients.flat_biases(name, 0, 0)?;
        Ok(())
    }

    fn export_layer(&self) -> Value {
        LayerCoefficients::from_flat(self.dimension(), &[], 0, &[], 0).to_value()
    }

    fn input_size(&self) -> usize {
        self.width * self.height * self.maps
    }

    fn output_size(&self) -> usize {
        self.input_size()
    }

    fn weights(&self) -> &[f32] {
        &[]
    }

    fn biases(&self) -> &[f32] {
        &[]
    }

    fn accelerated(&self) -> Option<&dyn AcceleratedLayer> {
        self.device.as_ref().map(|_| self as &dyn AcceleratedLayer)
    }
}

impl AcceleratedLayer for NormalizeLayer {
    fn forward_on_device(&self, prev: &LayerData, current: &mut LayerData) -> Result<()> {
        check_io(self.kind(), prev, current, self.input_size(), self.output_size())?;
        let context = self.device.as_ref().ok_or(DeviceError::NotMirrored)?;

        prev.sync_to_device(Slot::Activation)?;
        context.dispatch(&KernelLaunch::NormalizeForward {
            input: prev.device_handle(Slot::Activation)?,
            output: current.device_handle(Slot::Activation)?,
            width: self.width,
            height: self.height,
            maps: self.maps,
            batch: current.batch_size(),
            params: self.params,
        })?;
        current.sync_from_device(Slot::Activation)?;

        let slots = current.split_mut();
        slots.inter.copy_from_slice(slots.activation);
        Ok(())
    }
}
