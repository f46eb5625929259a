//! Builds concrete layers from adjacent shape descriptors.

use std::sync::Arc;

use log::trace;

use super::convolution::{ConvolutionLayer, ConvolutionSettings};
use super::maxpool::MaxPoolLayer;
use super::normalize::NormalizeLayer;
use super::r#trait::Layer;
use super::shape::{LayerGeometry, LayerShape, LayerSpec};
use super::sigmoid::SigmoidLayer;
use crate::config::WeightInit;
use crate::device::ComputeContext;
use crate::error::{NetworkError, Result};
use crate::kernels::PoolGeometry;
use crate::utils::SimpleRng;

/// Network-wide settings every layer is built with.
#[derive(Debug, Clone)]
pub struct LayerOptions {
    pub learn_rate: f32,
    pub weight_init: WeightInit,
    /// Compute context for the accelerator path; `None` runs on the host.
    pub device: Option<Arc<ComputeContext>>,
}

impl LayerOptions {
    pub fn new(learn_rate: f32) -> Self {
        Self {
            learn_rate,
            weight_init: WeightInit::default(),
            device: None,
        }
    }
}

/// Builds the layer described by `current` on top of a layer shaped `prev`.
///
/// Returns `Ok(None)` when the kind cannot follow `prev` at all (a spatial
/// layer after a vector output); callers must treat that as a configuration
/// error. Returns an error when the pair is supported but the sizes disagree.
pub fn create_layer(
    prev: &LayerShape,
    current: &LayerSpec,
    options: &LayerOptions,
    rng: &mut SimpleRng,
) -> Result<Option<Box<dyn Layer>>> {
    trace!("building {} layer after {}", current.kind(), prev.kind);
    let device = options.device.clone();

    if let LayerGeometry::Sigmoid { size } = current.geometry {
        return Ok(Some(Box::new(SigmoidLayer::new(
            prev.output.len(),
            size,
            current.train_num,
            options,
            rng,
        ))));
    }

    let Some((width, height, maps)) = prev.output.image() else {
        return Ok(None);
    };

    let layer: Box<dyn Layer> = match current.geometry {
        LayerGeometry::Sigmoid { .. } => return Ok(None),
        LayerGeometry::Convolution {
            feature_maps,
            receptive_size,
            padding,
            activation,
            weight_decay,
            input_maps,
        } => {
            if let Some(declared) = input_maps {
                if declared != maps {
                    return Err(NetworkError::shape(
                        "convolution input maps",
                        maps,
                        declared,
                    ));
                }
            }
            let settings = ConvolutionSettings {
                input_maps: maps,
                feature_maps,
                width,
                height,
                receptive_size,
                padding,
                activation,
                weight_decay,
            };
            Box::new(ConvolutionLayer::new(
                settings,
                current.train_num,
                options,
                rng,
            )?)
        }
        LayerGeometry::MaxPool { pool_size, stride } => Box::new(MaxPoolLayer::new(
            PoolGeometry::new(width, height, pool_size, stride),
            maps,
            current.train_num,
            prev.activation,
            device,
        )?),
        LayerGeometry::Normalize(params) => Box::new(NormalizeLayer::new(
            params,
            (width, height, maps),
            current.train_num,
            device,
        )),
    };
    Ok(Some(layer))
}
