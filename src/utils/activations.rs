//! Activation functions for neural networks
//!
//! Layers apply an [`Activation`] to their pre-activation values. The derivative
//! is always expressed in terms of the pre-activation `z`, which is what the
//! INTER_VALUE slot of a layer data buffer stores.

use serde::{Deserialize, Serialize};

/// Logistic sigmoid: 1 / (1 + exp(-x)).
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Derivative of the sigmoid at pre-activation `z`: σ(z)(1 - σ(z)).
pub fn sigmoid_derivative(z: f32) -> f32 {
    let s = sigmoid(z);
    s * (1.0 - s)
}

/// Rectified linear unit.
pub fn relu(x: f32) -> f32 {
    if x > 0.0 {
        x
    } else {
        0.0
    }
}

/// Derivative of ReLU at pre-activation `z` (0 at the kink).
pub fn relu_derivative(z: f32) -> f32 {
    if z > 0.0 {
        1.0
    } else {
        0.0
    }
}

/// Activation applied by a layer to its pre-activation values.
///
/// Every layer data buffer records the activation of the layer that produced
/// it, so that a downstream layer can multiply back-propagated error by the
/// right derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// Pass-through, used by the network input and normalization layers.
    #[default]
    Identity,
    Sigmoid,
    Relu,
}

impl Activation {
    /// Parses the activation names accepted in a network description.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "identity" | "linear" => Some(Activation::Identity),
            "sigmoid" => Some(Activation::Sigmoid),
            "relu" => Some(Activation::Relu),
            _ => None,
        }
    }

    pub fn apply(self, z: f32) -> f32 {
        match self {
            Activation::Identity => z,
            Activation::Sigmoid => sigmoid(z),
            Activation::Relu => relu(z),
        }
    }

    pub fn derivative(self, z: f32) -> f32 {
        match self {
            Activation::Identity => 1.0,
            Activation::Sigmoid => sigmoid_derivative(z),
            Activation::Relu => relu_derivative(z),
        }
    }

    /// Writes `apply(z)` for every element of `inter` into `output`.
    ///
    /// # Panics
    ///
    /// Panics if the slices differ in length.
    pub fn apply_slice(self, inter: &[f32], output: &mut [f32]) {
        assert_eq!(inter.len(), output.len(), "activation slice length mismatch");
        for (out, &z) in output.iter_mut().zip(inter) {
            *out = self.apply(z);
        }
    }

    /// Multiplies `grad` in place by the derivative evaluated at `inter`.
    pub fn scale_by_derivative(self, inter: &[f32], grad: &mut [f32]) {
        assert_eq!(inter.len(), grad.len(), "derivative slice length mismatch");
        if self == Activation::Identity {
            return;
        }
        for (g, &z) in grad.iter_mut().zip(inter) {
            *g *= self.derivative(z);
        }
    }
}
