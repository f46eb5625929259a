//! Stochastic Gradient Descent (SGD) optimizer implementation
//!
//! Plain gradient descent with optional L2 weight decay:
//! `w = w - η * (∇L/∂w + λ * w)`. Biases are never decayed.

use crate::optimizers::Optimizer;

/// Stochastic Gradient Descent optimizer.
///
/// # Fields
///
/// * `learning_rate` - Step size η
/// * `weight_decay` - L2 coefficient λ applied to weights only
///
/// # Example
///
/// ```
/// use rust_neural_graph::optimizers::{Optimizer, SGD};
///
/// let mut optimizer = SGD::new(0.01);
/// let mut weights = vec![1.0, 2.0, 3.0];
/// optimizer.update(&mut weights, &[0.1, 0.2, 0.3]);
/// assert!((weights[0] - 0.999).abs() < 1e-6);
/// ```
#[derive(Debug, Clone)]
pub struct SGD {
    learning_rate: f32,
    weight_decay: f32,
}

impl SGD {
    /// Creates a new SGD optimizer without weight decay.
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            weight_decay: 0.0,
        }
    }

    /// Sets the L2 weight decay coefficient.
    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    pub fn weight_decay(&self) -> f32 {
        self.weight_decay
    }

    fn step(&self, parameters: &mut [f32], gradients: &[f32], decay: f32) {
        assert_eq!(
            parameters.len(),
            gradients.len(),
            "Parameters and gradients must have the same length"
        );

        for (param, grad) in parameters.iter_mut().zip(gradients.iter()) {
            *param -= self.learning_rate * (grad + decay * *param);
        }
    }
}

impl Optimizer for SGD {
    /// Applies `parameter[i] -= learning_rate * (gradient[i] + weight_decay * parameter[i])`.
    ///
    /// # Panics
    ///
    /// Panics if `parameters` and `gradients` have different lengths.
    fn update(&mut self, parameters: &mut [f32], gradients: &[f32]) {
        self.step(parameters, gradients, self.weight_decay);
    }

    fn update_biases(&mut self, biases: &mut [f32], gradients: &[f32]) {
        self.step(biases, gradients, 0.0);
    }
}
