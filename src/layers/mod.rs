//! Layer abstractions
//!
//! The [`Layer`] trait, its four concrete kinds, the shape descriptors that
//! connect adjacent layers and the factory that builds a layer from them.

mod r#trait;
pub mod coefficients;
pub mod convolution;
pub mod factory;
pub mod maxpool;
pub mod normalize;
pub mod shape;
pub mod sigmoid;

pub use coefficients::{Dimension, LayerCoefficients};
pub use convolution::{ConvolutionLayer, ConvolutionSettings};
pub use factory::{create_layer, LayerOptions};
pub use maxpool::MaxPoolLayer;
pub use normalize::NormalizeLayer;
pub use r#trait::{AcceleratedLayer, Layer};
pub use shape::{LayerGeometry, LayerKind, LayerShape, LayerSpec, Shape};
pub use sigmoid::SigmoidLayer;
