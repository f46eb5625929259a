//! Tests for activation functions
//!
//! This file covers:
//! - Scalar sigmoid and ReLU values and derivatives
//! - Parsing activation names from descriptions
//! - Slice application and in-place derivative scaling

use approx::assert_relative_eq;
use rust_neural_graph::utils::{relu, relu_derivative, sigmoid, sigmoid_derivative, Activation};

// ============================================================================
// Scalar Function Tests
// ============================================================================

mod scalar_tests {
    use super::*;

    #[test]
    fn test_sigmoid_values() {
        assert_relative_eq!(sigmoid(0.0), 0.5, epsilon = 1e-6);
        assert_relative_eq!(sigmoid(2.0), 0.880797, epsilon = 1e-5);
        assert!(sigmoid(50.0) > 0.999_999);
        assert!(sigmoid(-50.0) < 1e-6);
    }

    #[test]
    fn test_sigmoid_symmetry() {
        for x in [0.3f32, 1.0, 4.5] {
            assert_relative_eq!(sigmoid(x) + sigmoid(-x), 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_sigmoid_derivative_matches_finite_difference() {
        let h = 1e-3f32;
        for z in [-2.0f32, -0.5, 0.0, 1.5] {
            let numeric = (sigmoid(z + h) - sigmoid(z - h)) / (2.0 * h);
            assert_relative_eq!(sigmoid_derivative(z), numeric, epsilon = 1e-3);
        }
        assert_relative_eq!(sigmoid_derivative(0.0), 0.25, epsilon = 1e-6);
    }

    #[test]
    fn test_relu_and_derivative() {
        assert_eq!(relu(-3.0), 0.0);
        assert_eq!(relu(0.0), 0.0);
        assert_eq!(relu(2.5), 2.5);
        assert_eq!(relu_derivative(-1.0), 0.0);
        assert_eq!(relu_derivative(0.0), 0.0);
        assert_eq!(relu_derivative(0.1), 1.0);
    }
}

// ============================================================================
// Activation Enum Tests
// ============================================================================

mod activation_enum_tests {
    use super::*;

    #[test]
    fn test_from_name() {
        assert_eq!(Activation::from_name("Sigmoid"), Some(Activation::Sigmoid));
        assert_eq!(Activation::from_name("RELU"), Some(Activation::Relu));
        assert_eq!(Activation::from_name("linear"), Some(Activation::Identity));
        assert_eq!(Activation::from_name("softmax"), None);
    }

    #[test]
    fn test_apply_slice() {
        let inter = [-1.0f32, 0.0, 2.0];
        let mut out = [9.0f32; 3];

        Activation::Identity.apply_slice(&inter, &mut out);
        assert_eq!(out, inter);

        Activation::Relu.apply_slice(&inter, &mut out);
        assert_eq!(out, [0.0, 0.0, 2.0]);

        Activation::Sigmoid.apply_slice(&inter, &mut out);
        for (a, &z) in out.iter().zip(&inter) {
            assert_relative_eq!(*a, sigmoid(z), epsilon = 1e-7);
        }
    }

    #[test]
    fn test_scale_by_derivative() {
        let inter = [-1.0f32, 0.0, 2.0];

        let mut grad = [2.0f32; 3];
        Activation::Sigmoid.scale_by_derivative(&inter, &mut grad);
        for (g, &z) in grad.iter().zip(&inter) {
            assert_relative_eq!(*g, 2.0 * sigmoid_derivative(z), epsilon = 1e-7);
        }

        let mut grad = [2.0f32; 3];
        Activation::Relu.scale_by_derivative(&inter, &mut grad);
        assert_eq!(grad, [0.0, 0.0, 2.0]);
    }

    #[test]
    #[should_panic(expected = "activation slice length mismatch")]
    fn test_apply_slice_length_mismatch() {
        let mut out = [0.0f32; 2];
        Activation::Relu.apply_slice(&[1.0, 2.0, 3.0], &mut out);
    }

    #[test]
    fn test_serde_names() {
        let parsed: Activation = serde_json::from_str("\"relu\"").unwrap();
        assert_eq!(parsed, Activation::Relu);
        assert_eq!(serde_json::to_string(&Activation::Sigmoid).unwrap(), "\"sigmoid\"");
    }
}
