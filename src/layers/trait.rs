//! Layer trait definition
//!
//! A layer never looks at the graph it lives in. Everything it needs arrives as
//! two [`LayerData`] buffers: the data of the node feeding it (`prev`) and its
//! own (`current`).

use std::fmt;

use serde_json::Value;

use super::shape::{LayerKind, LayerShape};
use crate::error::Result;
use crate::layer_data::LayerData;

/// Core trait for network layers.
///
/// # Contract
///
/// * `forward` reads `prev`'s activation slot and writes `current`'s
///   pre-activation and activation slots. It is idempotent.
/// * `backward` reads `current`'s error and pre-activation slots and `prev`'s
///   activation, **adds** the back-propagated error into `prev`'s error slot
///   (already multiplied by the derivative of `prev`'s activation) and applies
///   one gradient-descent step, scaled by `1 / batch_size`, to the layer's own
///   parameters. It is the only place parameters change.
///
/// Both `prev` and `current` must hold the same logical batch size.
pub trait Layer: fmt::Debug {
    fn kind(&self) -> LayerKind;

    /// Output descriptor handed to the layer built after this one.
    fn shape(&self) -> LayerShape;

    fn forward(&self, prev: &LayerData, current: &mut LayerData) -> Result<()>;

    fn backward(&mut self, prev: &mut LayerData, current: &LayerData) -> Result<()>;

    /// Layer data shaped to this layer's output. Mirrored on the layer's
    /// compute context when it has one.
    fn create_layer_data(&self, batch_size: usize) -> Result<LayerData>;

    /// Replaces weights and biases with an exported coefficient tree.
    ///
    /// Fails without touching the layer when the tree's dimension block or
    /// array sizes do not match.
    fn import_layer(&mut self, value: &Value) -> Result<()>;

    fn export_layer(&self) -> Value;

    /// Features per example consumed.
    fn input_size(&self) -> usize;

    /// Features per example produced.
    fn output_size(&self) -> usize;

    fn parameter_count(&self) -> usize {
        self.weights().len() + self.biases().len()
    }

    fn weights(&self) -> &[f32];

    fn biases(&self) -> &[f32];

    /// The accelerator capability, when the layer was built with a compute
    /// context.
    fn accelerated(&self) -> Option<&dyn AcceleratedLayer> {
        None
    }
}

/// Forward pass dispatched through a compute context.
///
/// Stages the layer's parameters, uploads `prev`'s activation, launches the
/// kernel and downloads `current`'s pre-activation and activation, so the host
/// copies are up to date when it returns. Backward passes always run on the
/// host.
pub trait AcceleratedLayer {
    fn forward_on_device(&self, prev: &LayerData, current: &mut LayerData) -> Result<()>;
}

/// Checks that `prev` and `current` agree with a layer's sizes and with each
/// other's batch size.
pub(crate) fn check_io(
    kind: LayerKind,
    prev: &LayerData,
    current: &LayerData,
    input_size: usize,
    output_size: usize,
) -> Result<()> {
    use crate::error::NetworkError;

    if prev.feature_count() != input_size {
        return Err(NetworkError::shape(
            format!("{} layer input", kind),
            input_size,
            prev.feature_count(),
        ));
    }
    if current.feature_count() != output_size {
        return Err(NetworkError::shape(
            format!("{} layer output", kind),
            output_size,
            current.feature_count(),
        ));
    }
    if prev.batch_size() != current.batch_size() {
        return Err(NetworkError::shape(
            format!("{} layer batch size", kind),
            current.batch_size(),
            prev.batch_size(),
        ));
    }
    Ok(())
}
