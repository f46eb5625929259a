//! Network description structures
//!
//! A network is declared in JSON: the training hyperparameters at the top
//! level, an `input` block and a `layers` list wired together by `children`
//! ids.
//!
//! ```json
//! {
//!   "train_num": 1000, "batch_size": 10, "epoch_num": 5, "learn_rate": 0.1,
//!   "input": { "type": "image", "width": 28, "height": 28 },
//!   "layers": [
//!     { "id": "conv", "type": "convolution", "feature_maps": 4,
//!       "receptive_size": 5, "activation": "relu", "children": ["pool"] },
//!     { "id": "pool", "type": "maxpool", "pool_size": 2, "children": ["out"] },
//!     { "id": "out", "type": "sigmoid", "size": 10 }
//!   ]
//! }
//! ```
//!
//! A `branch` entry declares one sigmoid sibling per element of `sizes`; the
//! sibling at position `i` feeds `children[i]`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::config::{validate_config, TrainingConfig};
use crate::error::{NetworkError, Result};
use crate::kernels::{NormalizeParams, Padding};
use crate::layers::{LayerGeometry, LayerSpec, Shape};
use crate::utils::Activation;

const LAYER_TYPES: [&str; 5] = ["sigmoid", "convolution", "maxpool", "normalize", "branch"];

/// Shape of one input example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    /// "vector" or "image"
    #[serde(rename = "type")]
    pub input_type: String,

    /// Feature count of a vector input
    pub size: Option<usize>,

    // Image input
    pub width: Option<usize>,
    pub height: Option<usize>,
    /// Channel count of an image input (default 1)
    pub channels: Option<usize>,
}

impl InputConfig {
    pub fn shape(&self) -> Result<Shape> {
        match self.input_type.to_lowercase().as_str() {
            "vector" => {
                let size = require(self.size, "input", "vector input", "size")?;
                positive(size, "input", "size")?;
                Ok(Shape::Vector(size))
            }
            "image" => {
                let width = require(self.width, "input", "image input", "width")?;
                let height = require(self.height, "input", "image input", "height")?;
                let maps = self.channels.unwrap_or(1);
                positive(width, "input", "width")?;
                positive(height, "input", "height")?;
                positive(maps, "input", "channels")?;
                Ok(Shape::Image {
                    width,
                    height,
                    maps,
                })
            }
            other => Err(NetworkError::config(
                "input",
                format!("Invalid input type '{}'. Must be one of: vector, image", other),
            )),
        }
    }
}

/// One entry of the `layers` list.
///
/// Fields required per type:
///
/// - **sigmoid**: `size`
/// - **convolution**: `feature_maps`, `receptive_size`; optional `zero_pad`
///   (default false), `activation` ("sigmoid" default, or "relu"),
///   `weight_decay` (default 0), `input_maps` (checked against the input)
/// - **maxpool**: `pool_size`; optional `stride` (default 1, non-overlapping)
/// - **normalize**: `half_width`, `alpha`, `beta`
/// - **branch**: `sizes`, with exactly one `children` entry per size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub id: String,

    #[serde(rename = "type")]
    pub layer_type: String,

    #[serde(default)]
    pub children: Vec<String>,

    // Sigmoid
    pub size: Option<usize>,

    // Convolution
    pub feature_maps: Option<usize>,
    pub receptive_size: Option<usize>,
    pub zero_pad: Option<bool>,
    pub activation: Option<String>,
    pub weight_decay: Option<f32>,
    pub input_maps: Option<usize>,

    // Max-pool
    pub pool_size: Option<usize>,
    pub stride: Option<usize>,

    // Normalize
    pub half_width: Option<usize>,
    pub alpha: Option<f32>,
    pub beta: Option<f32>,

    // Branch
    pub sizes: Option<Vec<usize>>,
}

impl LayerConfig {
    /// Human-readable location used in configuration errors.
    pub fn region(&self, index: usize) -> String {
        format!("layers[{}] (id '{}')", index, self.id)
    }

    pub fn is_branch(&self) -> bool {
        self.layer_type.eq_ignore_ascii_case("branch")
    }

    /// Layer descriptors declared by this entry: one per sibling for a
    /// branch, a single one otherwise.
    pub fn layer_specs(&self, index: usize, train_num: usize) -> Result<Vec<LayerSpec>> {
        let region = self.region(index);
        let spec = |geometry| LayerSpec {
            train_num,
            geometry,
        };

        match self.layer_type.to_lowercase().as_str() {
            "sigmoid" => {
                let size = require(self.size, &region, "Sigmoid layer", "size")?;
                positive(size, &region, "size")?;
                Ok(vec![spec(LayerGeometry::Sigmoid { size })])
            }
            "convolution" => {
                let feature_maps =
                    require(self.feature_maps, &region, "Convolution layer", "feature_maps")?;
                let receptive_size = require(
                    self.receptive_size,
                    &region,
                    "Convolution layer",
                    "receptive_size",
                )?;
                positive(feature_maps, &region, "feature_maps")?;
                positive(receptive_size, &region, "receptive_size")?;
                if let Some(maps) = self.input_maps {
                    positive(maps, &region, "input_maps")?;
                }

                let activation = match self.activation.as_deref() {
                    None => Activation::Sigmoid,
                    Some(name) => match Activation::from_name(name) {
                        Some(activation @ (Activation::Sigmoid | Activation::Relu)) => activation,
                        _ => {
                            return Err(NetworkError::config(
                                region,
                                format!(
                                    "Invalid activation '{}'. Must be one of: sigmoid, relu",
                                    name
                                ),
                            ))
                        }
                    },
                };

                let weight_decay = self.weight_decay.unwrap_or(0.0);
                if !weight_decay.is_finite() || weight_decay < 0.0 {
                    return Err(NetworkError::config(
                        region,
                        "weight_decay must be non-negative",
                    ));
                }

                let padding = if self.zero_pad.unwrap_or(false) {
                    Padding::Same
                } else {
                    Padding::NoZero
                };

                Ok(vec![spec(LayerGeometry::Convolution {
                    feature_maps,
                    receptive_size,
                    padding,
                    activation,
                    weight_decay,
                    input_maps: self.input_maps,
                })])
            }
            "maxpool" => {
                let pool_size = require(self.pool_size, &region, "MaxPool layer", "pool_size")?;
                positive(pool_size, &region, "pool_size")?;
                let stride = self.stride.unwrap_or(1);
                if stride == 0 || stride > pool_size {
                    return Err(NetworkError::config(
                        region,
                        format!("stride must be in range [1, {}]", pool_size),
                    ));
                }
                Ok(vec![spec(LayerGeometry::MaxPool { pool_size, stride })])
            }
            "normalize" => {
                let half_width =
                    require(self.half_width, &region, "Normalize layer", "half_width")?;
                let alpha = require(self.alpha, &region, "Normalize layer", "alpha")?;
                let beta = require(self.beta, &region, "Normalize layer", "beta")?;
                if !(alpha.is_finite() && alpha >= 0.0) {
                    return Err(NetworkError::config(region, "alpha must be non-negative"));
                }
                if !(beta.is_finite() && beta >= 0.0) {
                    return Err(NetworkError::config(region, "beta must be non-negative"));
                }
                Ok(vec![spec(LayerGeometry::Normalize(NormalizeParams {
                    half_width,
                    alpha,
                    beta,
                }))])
            }
            "branch" => {
                let sizes = self.sizes.as_ref().ok_or_else(|| {
                    NetworkError::config(region.clone(), "Branch layer requires 'sizes'")
                })?;
                if sizes.is_empty() {
                    return Err(NetworkError::config(region, "sizes must not be empty"));
                }
                if sizes.len() != self.children.len() {
                    return Err(NetworkError::config(
                        region,
                        format!(
                            "branch declares {} sizes but {} children",
                            sizes.len(),
                            self.children.len()
                        ),
                    ));
                }
                sizes
                    .iter()
                    .map(|&size| -> Result<LayerSpec> {
                        positive(size, &region, "sizes")?;
                        Ok(spec(LayerGeometry::Sigmoid { size }))
                    })
                    .collect()
            }
            other => Err(NetworkError::config(
                region,
                format!(
                    "Invalid layer type '{}'. Must be one of: {}",
                    other,
                    LAYER_TYPES.join(", ")
                ),
            )),
        }
    }
}

/// A complete network description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkDescription {
    #[serde(flatten)]
    pub training: TrainingConfig,

    pub input: InputConfig,

    pub layers: Vec<LayerConfig>,
}

/// Loads and validates a network description from a JSON file.
pub fn load_description(path: impl AsRef<Path>) -> Result<NetworkDescription> {
    let contents = fs::read_to_string(path)?;
    parse_description(&contents)
}

/// Parses and validates a network description.
pub fn parse_description(json: &str) -> Result<NetworkDescription> {
    let description: NetworkDescription = serde_json::from_str(json)?;
    validate_description(&description)?;
    Ok(description)
}

/// Checks everything that can be checked without building layers: training
/// fields, the input block, every layer's fields, id uniqueness and child
/// references.
pub fn validate_description(description: &NetworkDescription) -> Result<()> {
    validate_config(&description.training)?;
    description.input.shape()?;

    if description.layers.is_empty() {
        return Err(NetworkError::config(
            "layers",
            "Network must have at least one layer",
        ));
    }

    let mut ids = HashSet::new();
    for (index, layer) in description.layers.iter().enumerate() {
        if layer.id.is_empty() {
            return Err(NetworkError::config(
                format!("layers[{}]", index),
                "layer requires a non-empty 'id'",
            ));
        }
        if !ids.insert(layer.id.as_str()) {
            return Err(NetworkError::config(
                layer.region(index),
                "duplicate layer id",
            ));
        }
        layer.layer_specs(index, description.training.train_num)?;
    }

    for (index, layer) in description.layers.iter().enumerate() {
        for child in &layer.children {
            if !ids.contains(child.as_str()) {
                return Err(NetworkError::config(
                    layer.region(index),
                    format!("unknown child id '{}'", child),
                ));
            }
        }
    }

    if description.layers[0].is_branch() {
        return Err(NetworkError::config(
            description.layers[0].region(0),
            "the first layer reads the input and cannot be a branch",
        ));
    }

    Ok(())
}

fn require<T: Copy>(value: Option<T>, region: &str, kind: &str, field: &str) -> Result<T> {
    value.ok_or_else(|| {
        NetworkError::config(region, format!("{} requires '{}'", kind, field))
    })
}

fn positive(value: usize, region: &str, field: &str) -> Result<()> {
    if value == 0 {
        return Err(NetworkError::config(
            region,
            format!("{} must be greater than 0", field),
        ));
    }
    Ok(())
}
