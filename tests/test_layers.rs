//! Tests for the layer implementations
//!
//! This file covers:
//! - Sigmoid layer forward values, input gradient and one SGD step
//! - Convolution layer shapes, coefficient layout and weight decay
//! - Max-pool error routing and normalize gradients through the Layer trait
//! - Coefficient import validation

use approx::assert_relative_eq;
use rust_neural_graph::config::WeightInit;
use rust_neural_graph::kernels::{NormalizeParams, Padding, PoolGeometry};
use rust_neural_graph::layers::{
    ConvolutionLayer, ConvolutionSettings, Layer, LayerKind, LayerOptions, MaxPoolLayer,
    NormalizeLayer, Shape, SigmoidLayer,
};
use rust_neural_graph::utils::{sigmoid, Activation, SimpleRng};
use rust_neural_graph::{LayerData, NetworkError, Slot};
use serde_json::json;

fn zero_options(learn_rate: f32) -> LayerOptions {
    let mut options = LayerOptions::new(learn_rate);
    options.weight_init = WeightInit::Zero;
    options
}

fn input_data(values: &[f32], features: usize) -> LayerData {
    let mut data = LayerData::new(features, values.len() / features, Activation::Identity);
    data.slot_mut(Slot::Activation).copy_from_slice(values);
    data
}

/// `½ Σ (a − t)²` after a forward pass.
fn half_squared_error(layer: &dyn Layer, input: &LayerData, target: &[f32]) -> f32 {
    let mut out = layer.create_layer_data(input.batch_size()).unwrap();
    layer.forward(input, &mut out).unwrap();
    out.slot(Slot::Activation)
        .iter()
        .zip(target)
        .map(|(a, t)| 0.5 * (a - t) * (a - t))
        .sum()
}

/// Seeds `out.ERROR` with `f'(z)·(a − t)`.
fn seed_error(out: &mut LayerData, target: &[f32]) {
    let activation = out.activation();
    let slots = out.split_mut();
    for k in 0..slots.error.len() {
        slots.error[k] = activation.derivative(slots.inter[k]) * (slots.activation[k] - target[k]);
    }
}

/// Compares the back-propagated input error with central differences.
fn check_input_gradient(layer: &mut dyn Layer, values: &[f32], target: &[f32]) {
    let features = layer.input_size();
    let mut input = input_data(values, features);
    let eps = 1e-2f32;

    let numeric: Vec<f32> = (0..values.len())
        .map(|i| {
            let mut plus = values.to_vec();
            plus[i] += eps;
            let mut minus = values.to_vec();
            minus[i] -= eps;
            (half_squared_error(layer, &input_data(&plus, features), target)
                - half_squared_error(layer, &input_data(&minus, features), target))
                / (2.0 * eps)
        })
        .collect();

    let mut out = layer.create_layer_data(input.batch_size()).unwrap();
    layer.forward(&input, &mut out).unwrap();
    seed_error(&mut out, target);
    layer.backward(&mut input, &out).unwrap();

    for (analytic, numeric) in input.slot(Slot::Error).iter().zip(&numeric) {
        assert_relative_eq!(*analytic, *numeric, epsilon = 2e-3);
    }
}

// ============================================================================
// Sigmoid Layer Tests
// ============================================================================

mod sigmoid_layer_tests {
    use super::*;

    #[test]
    fn test_forward_with_imported_coefficients() {
        let mut layer = SigmoidLayer::new(2, 1, 1, &zero_options(0.1), &mut SimpleRng::new(1));
        layer
            .import_layer(&json!({
                "dimension": { "feature_maps": 1, "input_maps": 2, "receptive_size": 1 },
                "weight": [[0.5, -1.0]],
                "bias": [[0.25]],
            }))
            .unwrap();

        let input = input_data(&[2.0, 1.0], 2);
        let mut out = layer.create_layer_data(1).unwrap();
        layer.forward(&input, &mut out).unwrap();
        assert_relative_eq!(out.slot(Slot::InterValue)[0], 0.25);
        assert_relative_eq!(out.slot(Slot::Activation)[0], sigmoid(0.25));
    }

    #[test]
    fn test_one_step_from_zero_weights() {
        let mut layer = SigmoidLayer::new(2, 2, 1, &zero_options(0.1), &mut SimpleRng::new(1));
        let mut input = input_data(&[1.0, -2.0], 2);
        let mut out = layer.create_layer_data(1).unwrap();
        layer.forward(&input, &mut out).unwrap();
        assert_eq!(out.slot(Slot::Activation), &[0.5, 0.5]);

        let target = [1.0, 0.0];
        seed_error(&mut out, &target);
        // δ = σ'(0)·(0.5 − t) = 0.25·(0.5 − t)
        assert_relative_eq!(out.slot(Slot::Error)[0], -0.125);
        assert_relative_eq!(out.slot(Slot::Error)[1], 0.125);

        layer.backward(&mut input, &out).unwrap();
        // ΔW[o][i] = −0.1·δ_o·x_i
        let expected = [0.0125, -0.025, -0.0125, 0.025];
        for (w, e) in layer.weights().iter().zip(expected) {
            assert_relative_eq!(*w, e, epsilon = 1e-7);
        }
        assert_relative_eq!(layer.biases()[0], 0.0125, epsilon = 1e-7);
        assert_relative_eq!(layer.biases()[1], -0.0125, epsilon = 1e-7);
        // Zero weights pass no error back.
        assert_eq!(input.slot(Slot::Error), &[0.0, 0.0]);
    }

    #[test]
    fn test_input_gradient_matches_finite_differences() {
        let mut layer = SigmoidLayer::new(3, 2, 2, &LayerOptions::new(0.1), &mut SimpleRng::new(5));
        check_input_gradient(
            &mut layer,
            &[0.3, -0.7, 1.2, 0.9, 0.1, -0.4],
            &[1.0, 0.0, 0.0, 1.0],
        );
    }

    #[test]
    fn test_import_rejects_wrong_dimension() {
        let mut layer = SigmoidLayer::new(2, 1, 1, &zero_options(0.1), &mut SimpleRng::new(1));
        let err = layer
            .import_layer(&json!({
                "dimension": { "feature_maps": 2, "input_maps": 2, "receptive_size": 1 },
                "weight": [[0.5, -1.0], [0.0, 0.0]],
                "bias": [[0.25, 0.0]],
            }))
            .unwrap_err();
        assert!(matches!(err, NetworkError::Coefficients { .. }));
        assert_eq!(layer.weights(), &[0.0, 0.0]);
    }

    #[test]
    fn test_forward_rejects_wrong_input_width() {
        let layer = SigmoidLayer::new(3, 1, 1, &zero_options(0.1), &mut SimpleRng::new(1));
        let input = input_data(&[1.0, 2.0], 2);
        let mut out = layer.create_layer_data(1).unwrap();
        assert!(matches!(
            layer.forward(&input, &mut out),
            Err(NetworkError::Shape { .. })
        ));
    }
}

// ============================================================================
// Convolution Layer Tests
// ============================================================================

mod convolution_layer_tests {
    use super::*;

    fn settings(padding: Padding) -> ConvolutionSettings {
        ConvolutionSettings {
            input_maps: 2,
            feature_maps: 3,
            width: 5,
            height: 4,
            receptive_size: 3,
            padding,
            activation: Activation::Sigmoid,
            weight_decay: 0.0,
        }
    }

    #[test]
    fn test_shapes_per_padding() {
        let valid =
            ConvolutionLayer::new(settings(Padding::NoZero), 1, &zero_options(0.1), &mut SimpleRng::new(1))
                .unwrap();
        assert_eq!(
            valid.shape().output,
            Shape::Image {
                width: 3,
                height: 2,
                maps: 3
            }
        );
        assert_eq!(valid.biases().len(), 3 * 6);

        let same =
            ConvolutionLayer::new(settings(Padding::Same), 1, &zero_options(0.1), &mut SimpleRng::new(1))
                .unwrap();
        assert_eq!(same.output_size(), 3 * 20);
        assert_eq!(same.input_size(), 2 * 20);
        assert_eq!(same.kind(), LayerKind::Convolution);
    }

    #[test]
    fn test_export_layout() {
        let layer =
            ConvolutionLayer::new(settings(Padding::NoZero), 1, &LayerOptions::new(0.1), &mut SimpleRng::new(3))
                .unwrap();
        let exported = layer.export_layer();
        assert_eq!(exported["dimension"]["feature_maps"], 3);
        assert_eq!(exported["dimension"]["input_maps"], 2);
        assert_eq!(exported["dimension"]["receptive_size"], 3);
        assert_eq!(exported["weight"].as_array().unwrap().len(), 6);
        assert_eq!(exported["weight"][0].as_array().unwrap().len(), 9);
        assert_eq!(exported["bias"].as_array().unwrap().len(), 3);
        assert_eq!(exported["bias"][0].as_array().unwrap().len(), 6);

        let mut copy =
            ConvolutionLayer::new(settings(Padding::NoZero), 1, &zero_options(0.1), &mut SimpleRng::new(1))
                .unwrap();
        copy.import_layer(&exported).unwrap();
        assert_eq!(copy.weights(), layer.weights());
    }

    #[test]
    fn test_input_gradient_matches_finite_differences() {
        let mut layer = ConvolutionLayer::new(
            ConvolutionSettings {
                input_maps: 1,
                feature_maps: 2,
                width: 4,
                height: 4,
                receptive_size: 3,
                padding: Padding::Same,
                activation: Activation::Sigmoid,
                weight_decay: 0.0,
            },
            1,
            &LayerOptions::new(0.1),
            &mut SimpleRng::new(11),
        )
        .unwrap();
        let values: Vec<f32> = (0..16).map(|i| ((i * 7) % 5) as f32 * 0.2 - 0.4).collect();
        let target: Vec<f32> = (0..32).map(|i| (i % 2) as f32).collect();
        check_input_gradient(&mut layer, &values, &target);
    }

    #[test]
    fn test_weight_decay_shrinks_weights_without_error() {
        let mut layer = ConvolutionLayer::new(
            ConvolutionSettings {
                weight_decay: 0.5,
                ..settings(Padding::NoZero)
            },
            1,
            &LayerOptions::new(0.1),
            &mut SimpleRng::new(2),
        )
        .unwrap();
        let before = layer.weights().to_vec();

        let mut input = LayerData::new(layer.input_size(), 1, Activation::Identity);
        let mut out = layer.create_layer_data(1).unwrap();
        layer.forward(&input, &mut out).unwrap();
        // Zero error: only the decay term moves the weights.
        layer.backward(&mut input, &out).unwrap();
        for (after, before) in layer.weights().iter().zip(&before) {
            assert_relative_eq!(*after, before * (1.0 - 0.1 * 0.5), epsilon = 1e-6);
        }
        assert!(layer.biases().iter().all(|&b| b == 0.0));
    }
}

// ============================================================================
// Max-Pool and Normalize Layer Tests
// ============================================================================

mod parameterless_layer_tests {
    use super::*;

    #[test]
    fn test_maxpool_routes_error_to_maximum() {
        let mut layer =
            MaxPoolLayer::new(PoolGeometry::new(4, 2, 2, 1), 1, 1, Activation::Sigmoid, None).unwrap();
        assert_eq!(layer.output_size(), 2);
        assert_eq!(layer.shape().activation, Activation::Sigmoid);

        let mut prev = LayerData::new(8, 1, Activation::Sigmoid);
        prev.slot_mut(Slot::Activation)
            .copy_from_slice(&[0.1, 0.9, 0.3, 0.2, 0.4, 0.5, 0.8, 0.7]);
        let mut out = layer.create_layer_data(1).unwrap();
        layer.forward(&prev, &mut out).unwrap();
        assert_eq!(out.slot(Slot::Activation), &[0.9, 0.8]);

        out.slot_mut(Slot::Error).copy_from_slice(&[1.0, -2.0]);
        layer.backward(&mut prev, &out).unwrap();
        assert_eq!(
            prev.slot(Slot::Error),
            &[0.0, 1.0, 0.0, 0.0, 0.0, 0.0, -2.0, 0.0]
        );
    }

    #[test]
    fn test_maxpool_rejects_bad_stride() {
        assert!(MaxPoolLayer::new(PoolGeometry::new(4, 4, 2, 0), 1, 1, Activation::Relu, None).is_err());
    }

    #[test]
    fn test_normalize_input_gradient() {
        let mut layer = NormalizeLayer::new(
            NormalizeParams {
                half_width: 1,
                alpha: 0.3,
                beta: 0.75,
            },
            (3, 3, 2),
            1,
            None,
        );
        assert_eq!(layer.shape().activation, Activation::Identity);
        let values: Vec<f32> = (0..18).map(|i| (i as f32 - 9.0) * 0.15).collect();
        let target = vec![0.1f32; 18];
        check_input_gradient(&mut layer, &values, &target);
    }

    #[test]
    fn test_parameterless_export_round_trip() {
        let mut layer =
            MaxPoolLayer::new(PoolGeometry::new(4, 4, 2, 1), 3, 1, Activation::Relu, None).unwrap();
        let exported = layer.export_layer();
        assert_eq!(exported["dimension"]["feature_maps"], 3);
        assert_eq!(exported["weight"].as_array().unwrap().len(), 0);
        layer.import_layer(&exported).unwrap();
        assert_eq!(layer.parameter_count(), 0);
    }
}
