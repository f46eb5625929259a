//! Shape descriptors exchanged between adjacent layers.

use std::fmt;

use crate::kernels::{NormalizeParams, Padding};
use crate::utils::Activation;

/// Concrete layer variants, plus the two pseudo-layers that can precede one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    /// The network input buffer.
    Input,
    /// A merged buffer gathering several parents.
    Merge,
    Sigmoid,
    Convolution,
    MaxPool,
    Normalize,
}

impl LayerKind {
    pub fn name(self) -> &'static str {
        match self {
            LayerKind::Input => "input",
            LayerKind::Merge => "merge",
            LayerKind::Sigmoid => "sigmoid",
            LayerKind::Convolution => "convolution",
            LayerKind::MaxPool => "maxpool",
            LayerKind::Normalize => "normalize",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-example output of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Vector(usize),
    Image {
        width: usize,
        height: usize,
        maps: usize,
    },
}

impl Shape {
    /// Number of features per example.
    pub fn len(&self) -> usize {
        match *self {
            Shape::Vector(n) => n,
            Shape::Image {
                width,
                height,
                maps,
            } => width * height * maps,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(width, height, maps)` of an image shape.
    pub fn image(&self) -> Option<(usize, usize, usize)> {
        match *self {
            Shape::Image {
                width,
                height,
                maps,
            } => Some((width, height, maps)),
            Shape::Vector(_) => None,
        }
    }
}

/// What a layer exposes to the layer built after it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerShape {
    pub kind: LayerKind,
    pub train_num: usize,
    pub output: Shape,
    pub activation: Activation,
}

/// Kind-specific settings of a layer to build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LayerGeometry {
    Sigmoid {
        size: usize,
    },
    Convolution {
        feature_maps: usize,
        receptive_size: usize,
        padding: Padding,
        activation: Activation,
        weight_decay: f32,
        /// Declared input map count, checked against the previous layer.
        input_maps: Option<usize>,
    },
    MaxPool {
        pool_size: usize,
        stride: usize,
    },
    Normalize(NormalizeParams),
}

/// Descriptor of the layer to build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerSpec {
    pub train_num: usize,
    pub geometry: LayerGeometry,
}

impl LayerSpec {
    pub fn kind(&self) -> LayerKind {
        match self.geometry {
            LayerGeometry::Sigmoid { .. } => LayerKind::Sigmoid,
            LayerGeometry::Convolution { .. } => LayerKind::Convolution,
            LayerGeometry::MaxPool { .. } => LayerKind::MaxPool,
            LayerGeometry::Normalize(_) => LayerKind::Normalize,
        }
    }
}
