//! Optimizer abstractions for parameter updates
//!
//! Layers accumulate their gradients over a mini-batch, scale them by
//! `1 / batch_size` and hand them to an optimizer, which applies the update
//! rule in place. Weight matrices and bias vectors go through separate entry
//! points so that regularization can be restricted to weights.
//!
//! # Example
//!
//! ```
//! use rust_neural_graph::optimizers::{Optimizer, SGD};
//!
//! let mut optimizer = SGD::new(0.1).with_weight_decay(0.01);
//! let mut weights = vec![1.0, -1.0];
//! optimizer.update(&mut weights, &[0.5, 0.5]);
//! assert!((weights[0] - (1.0 - 0.1 * (0.5 + 0.01))).abs() < 1e-6);
//! ```

pub mod sgd;

pub use sgd::SGD;

/// Core trait for optimizers.
pub trait Optimizer {
    /// Applies one update to a weight buffer.
    ///
    /// # Panics
    ///
    /// Implementations may panic if `parameters` and `gradients` differ in length.
    fn update(&mut self, parameters: &mut [f32], gradients: &[f32]);

    /// Applies one update to a bias buffer. Defaults to [`Optimizer::update`].
    fn update_biases(&mut self, biases: &mut [f32], gradients: &[f32]) {
        self.update(biases, gradients);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Halving;

    impl Optimizer for Halving {
        fn update(&mut self, parameters: &mut [f32], _gradients: &[f32]) {
            parameters.iter_mut().for_each(|p| *p *= 0.5);
        }
    }

    #[test]
    fn test_update_alone_implements_the_trait() {
        let mut optimizer: Box<dyn Optimizer> = Box::new(Halving);
        let mut biases = vec![4.0, -2.0];
        optimizer.update_biases(&mut biases, &[0.0, 0.0]);
        assert_eq!(biases, vec![2.0, -1.0]);
    }
}
