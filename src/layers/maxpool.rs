//! Max-pooling layer
//!
//! Forward pools the previous layer's pre-activation and activation slots
//! independently with the same window geometry. Pooling has no parameters and
//! commutes with the monotone activations used here, so the two pooled slots
//! describe the same positions; the output keeps the previous layer's
//! activation so that downstream derivatives stay correct.
//!
//! Backward routes each pooled error to the first position of its window that
//! attained the activation maximum.

use std::sync::Arc;

use serde_json::Value;

use super::coefficients::{Dimension, LayerCoefficients};
use super::r#trait::{check_io, AcceleratedLayer, Layer};
use super::shape::{LayerKind, LayerShape, Shape};
use crate::device::{ComputeContext, KernelLaunch};
use crate::error::{DeviceError, Result};
use crate::kernels::batch::max_pool_forward;
use crate::kernels::{upsample_max, PoolGeometry};
use crate::layer_data::{LayerData, Slot};
use crate::utils::Activation;

/// Max-pooling layer without parameters.
///
/// Both the pre-activation and the activation slot are pooled, and error is
/// routed back through the position that held each activation maximum.
#[derive(Debug)]
pub struct MaxPoolLayer {
    geometry: PoolGeometry,
    maps: usize,
    train_num: usize,
    activation: Activation,
    device: Option<Arc<ComputeContext>>,
}

impl MaxPoolLayer {
    /// Pools `maps` maps of the given geometry.
    ///
    /// # Arguments
    ///
    /// * `geometry` - Map size, pool size and stride
    /// * `maps` - Number of feature maps pooled independently
    /// * `train_num` - Number of training examples, carried in the layer shape
    /// * `activation` - Inherited from the layer being pooled
    /// * `device` - Compute context when running on an accelerator
    ///
    /// # Errors
    ///
    /// Returns [`crate::NetworkError::Kernel`] when the stride is outside
    /// `1..=pool_size` or the window does not fit the map.
    pub fn new(
        geometry: PoolGeometry,
        maps: usize,
        train_num: usize,
        activation: Activation,
        device: Option<Arc<ComputeContext>>,
    ) -> Result<Self> {
        geometry.validate()?;
        Ok(Self {
            geometry,
            maps,
            train_num,
            activation,
            device,
        })
    }

    pub fn geometry(&self) -> &PoolGeometry {
        &self.geometry
    }

    fn dimension(&self) -> Dimension {
        Dimension {
            feature_maps: self.maps,
            input_maps: self.maps,
            receptive_size: self.geometry.pool_size,
        }
    }
}

impl Layer for MaxPoolLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::MaxPool
    }

    fn shape(&self) -> LayerShape {
        LayerShape {
            kind: LayerKind::MaxPool,
            train_num: self.train_num,
            output: Shape::Image {
                width: self.geometry.output_width(),
                height: self.geometry.output_height(),
                maps: self.maps,
            },
            activation: self.activation,
        }
    }

    fn forward(&self, prev: &LayerData, current: &mut LayerData) -> Result<()> {
        check_io(self.kind(), prev, current, self.input_size(), self.output_size())?;
        let batch = current.batch_size();
        let slots = current.split_mut();
        max_pool_forward(
            prev.slot(Slot::InterValue),
            &self.geometry,
            self.maps,
            batch,
            slots.inter,
        )?;
        max_pool_forward(
            prev.slot(Slot::Activation),
            &self.geometry,
            self.maps,
            batch,
            slots.activation,
        )?;
        Ok(())
    }

    fn backward(&mut self, prev: &mut LayerData, current: &LayerData) -> Result<()> {
        check_io(self.kind(), prev, current, self.input_size(), self.output_size())?;
        let (map_in, map_out) = (self.geometry.input_len(), self.geometry.output_len());
        let pooled = current.slot(Slot::Activation);
        let upstream = current.slot(Slot::Error);
        let slots = prev.split_mut();

        for m in 0..current.batch_size() * self.maps {
            let (inp, out) = (m * map_in..(m + 1) * map_in, m * map_out..(m + 1) * map_out);
            upsample_max(
                &slots.activation[inp.clone()],
                &pooled[out.clone()],
                &upstream[out],
                &self.geometry,
                &mut slots.error[inp],
            )?;
        }
        Ok(())
    }

    fn create_layer_data(&self, batch_size: usize) -> Result<LayerData> {
        match &self.device {
            Some(context) => {
                LayerData::mirrored(context, self.output_size(), batch_size, self.activation, 0, 0)
            }
            None => Ok(LayerData::new(
                self.output_size(),
                batch_size,
                self.activation,
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
        self.maps * self.geometry.input_len()
    }

    fn output_size(&self) -> usize {
        self.maps * self.geometry.output_len()
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

impl AcceleratedLayer for MaxPoolLayer {
    fn forward_on_device(&self, prev: &LayerData, current: &mut LayerData) -> Result<()> {
        check_io(self.kind(), prev, current, self.input_size(), self.output_size())?;
        let context = self.device.as_ref().ok_or(DeviceError::NotMirrored)?;

        for slot in [Slot::InterValue, Slot::Activation] {
            prev.sync_to_device(slot)?;
            context.dispatch(&KernelLaunch::MaxPoolForward {
                input: prev.device_handle(slot)?,
                output: current.device_handle(slot)?,
                geometry: self.geometry,
                maps: self.maps,
                batch: current.batch_size(),
            })?;
            current.sync_from_device(slot)?;
        }
        Ok(())
    }
}
