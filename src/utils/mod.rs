//! Shared utilities: activation functions and the seeded RNG.

pub mod activations;
pub mod rng;

pub use activations::{relu, relu_derivative, sigmoid, sigmoid_derivative, Activation};
pub use rng::SimpleRng;
