//! Tests for network construction, traversal and training
//!
//! This file covers:
//! - One training step against its closed form
//! - Branch and merge wiring, offsets and traversal order
//! - Graph errors: cycles, unreachable layers, unsupported layer pairs
//! - Determinism, accelerator parity and coefficient persistence

use approx::assert_relative_eq;
use rust_neural_graph::architecture::parse_description;
use rust_neural_graph::device::ComputeContext;
use rust_neural_graph::layers::Shape;
use rust_neural_graph::utils::Activation;
use rust_neural_graph::{one_hot, Network, NetworkError, NodeId, Slot};
use std::sync::Arc;
use tempfile::tempdir;

const SINGLE_LAYER: &str = r#"{
    "train_num": 2, "batch_size": 2, "epoch_num": 1, "learn_rate": 0.1,
    "shuffle": false, "weight_init": "zero",
    "input": { "type": "vector", "size": 4 },
    "layers": [ { "id": "out", "type": "sigmoid", "size": 3 } ]
}"#;

const BRANCHED: &str = r#"{
    "train_num": 4, "batch_size": 2, "epoch_num": 3, "learn_rate": 0.5,
    "input": { "type": "vector", "size": 4 },
    "layers": [
        { "id": "hidden", "type": "sigmoid", "size": 4, "children": ["split"] },
        { "id": "split", "type": "branch", "sizes": [3, 5], "children": ["joined", "joined"] },
        { "id": "joined", "type": "sigmoid", "size": 2 }
    ]
}"#;

const IMAGE: &str = r#"{
    "train_num": 4, "batch_size": 3, "epoch_num": 2, "learn_rate": 0.2,
    "input": { "type": "image", "width": 6, "height": 6 },
    "layers": [
        { "id": "conv", "type": "convolution", "feature_maps": 2, "receptive_size": 3,
          "activation": "relu", "children": ["pool"] },
        { "id": "pool", "type": "maxpool", "pool_size": 2, "children": ["norm"] },
        { "id": "norm", "type": "normalize", "half_width": 1, "alpha": 0.1, "beta": 0.75,
          "children": ["out"] },
        { "id": "out", "type": "sigmoid", "size": 2 }
    ]
}"#;

fn node(layer: &str) -> NodeId {
    NodeId::new(layer, 0)
}

fn image_examples(count: usize) -> (Vec<f32>, Vec<Vec<f32>>) {
    let features: Vec<f32> = (0..count * 36)
        .map(|i| ((i * 13) % 17) as f32 / 17.0)
        .collect();
    let labels: Vec<usize> = (0..count).map(|i| i % 2).collect();
    (features, vec![one_hot(&labels, 2).unwrap()])
}

// ============================================================================
// Training Step Tests
// ============================================================================

mod training_tests {
    use super::*;

    #[test]
    fn test_single_step_closed_form() {
        let mut network = Network::from_json(SINGLE_LAYER).unwrap();
        let features = [1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0];
        let targets = vec![vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0]];

        let report = network.train(&features, &targets).unwrap();
        assert_eq!(report.epoch_losses.len(), 1);
        assert_relative_eq!(report.final_loss().unwrap(), 0.375, epsilon = 1e-6);

        // W[o][i] = −lr · (1/batch) · Σ_b δ_bo · x_bi with δ = σ'(0)·(0.5 − t)
        let layer = network.layer(&node("out")).unwrap();
        let expected = [
            0.00625, -0.00625, -0.00625, 0.00625, //
            -0.00625, 0.00625, 0.00625, -0.00625, //
            -0.00625, -0.00625, -0.00625, -0.00625,
        ];
        for (w, e) in layer.weights().iter().zip(expected) {
            assert_relative_eq!(*w, e, epsilon = 1e-7);
        }
        assert_relative_eq!(layer.biases()[0], 0.0, epsilon = 1e-7);
        assert_relative_eq!(layer.biases()[1], 0.0, epsilon = 1e-7);
        assert_relative_eq!(layer.biases()[2], -0.0125, epsilon = 1e-7);
    }

    #[test]
    fn test_loss_decreases() {
        let json = BRANCHED.replace(r#""epoch_num": 3"#, r#""epoch_num": 60"#);
        let mut network = Network::from_json(&json).unwrap();
        let features = [
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ];
        let targets = vec![one_hot(&[0, 0, 1, 1], 2).unwrap()];

        let report = network.train(&features, &targets).unwrap();
        let first = report.epoch_losses[0];
        let last = report.final_loss().unwrap();
        assert!(last < first, "loss went from {} to {}", first, last);
    }

    #[test]
    fn test_partial_final_batch() {
        let json = IMAGE.replace(r#""train_num": 4"#, r#""train_num": 5"#);
        let mut network = Network::from_json(&json).unwrap();
        let (features, targets) = image_examples(5);
        let report = network.train(&features, &targets).unwrap();
        assert_eq!(report.epoch_losses.len(), 2);
        assert!(report.epoch_losses.iter().all(|loss| loss.is_finite()));
        // Logical batch is restored after the short batch.
        assert_eq!(
            network.input_data().batch_size(),
            network.config().batch_size
        );
    }

    #[test]
    fn test_training_rejects_short_inputs() {
        let mut network = Network::from_json(SINGLE_LAYER).unwrap();
        let err = network
            .train(&[0.0; 4], &[vec![0.0; 6]])
            .unwrap_err();
        assert!(matches!(err, NetworkError::Shape { expected: 8, found: 4, .. }));

        let err = network.train(&[0.0; 8], &[]).unwrap_err();
        assert!(matches!(err, NetworkError::Shape { .. }));
    }

    #[test]
    fn test_output_error_seeds_heads() {
        let mut network = Network::from_json(SINGLE_LAYER).unwrap();
        network.load_input(&[0.0; 8]).unwrap();
        network.forward().unwrap();
        let target = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];
        let loss = network.output_error(&[&target[..]]).unwrap();
        assert_relative_eq!(loss, 0.75, epsilon = 1e-6);

        let error = network.layer_data(&node("out")).unwrap().slot(Slot::Error);
        assert_relative_eq!(error[0], -0.125);
        assert_relative_eq!(error[1], 0.125);

        assert!(matches!(
            network.output_error(&[]),
            Err(NetworkError::Shape { .. })
        ));
    }
}

// ============================================================================
// Graph Wiring Tests
// ============================================================================

mod graph_tests {
    use super::*;

    #[test]
    fn test_branch_siblings_merge_in_order() {
        let network = Network::from_json(BRANCHED).unwrap();
        assert_eq!(network.node_count(), 4);
        assert_eq!(network.heads(), vec![node("joined")]);

        let merger = network.merger(&node("joined")).unwrap();
        assert_eq!(merger.width(), 8);
        assert_eq!(merger.offset(&NodeId::new("split", 0)), Some(0));
        assert_eq!(merger.offset(&NodeId::new("split", 1)), Some(3));
        assert_eq!(network.layer(&node("joined")).unwrap().input_size(), 8);
        assert!(network.merger(&node("hidden")).is_none());
    }

    #[test]
    fn test_branch_after_convolution() {
        let json = r#"{
            "train_num": 2, "batch_size": 2, "epoch_num": 1, "learn_rate": 0.1,
            "input": { "type": "image", "width": 5, "height": 5 },
            "layers": [
                { "id": "conv", "type": "convolution", "feature_maps": 2, "receptive_size": 3,
                  "children": ["split"] },
                { "id": "split", "type": "branch", "sizes": [3, 5], "children": ["out", "out"] },
                { "id": "out", "type": "sigmoid", "size": 2 }
            ]
        }"#;
        let network = Network::from_json(json).unwrap();
        for branch in 0..2 {
            let sibling = network.layer(&NodeId::new("split", branch)).unwrap();
            assert_eq!(sibling.input_size(), 2 * 3 * 3);
        }
        let merger = network.merger(&node("out")).unwrap();
        assert_eq!(merger.width(), 8);
        assert_eq!(merger.offset(&NodeId::new("split", 0)), Some(0));
        assert_eq!(merger.offset(&NodeId::new("split", 1)), Some(3));
    }

    #[test]
    fn test_traversal_orders() {
        let network = Network::from_json(BRANCHED).unwrap();
        assert_eq!(
            network.forward_order(),
            vec![
                node("hidden"),
                NodeId::new("split", 0),
                NodeId::new("split", 1),
                node("joined"),
            ]
        );

        let backward = network.backward_order();
        let position = |id: &NodeId| backward.iter().position(|n| n == id).unwrap();
        assert!(position(&node("joined")) < position(&NodeId::new("split", 0)));
        assert!(position(&node("joined")) < position(&NodeId::new("split", 1)));
        assert!(position(&NodeId::new("split", 1)) < position(&node("hidden")));
        assert_eq!(backward.last(), Some(&node("hidden")));
    }

    #[test]
    fn test_image_merge_stacks_maps() {
        let json = r#"{
            "train_num": 2, "batch_size": 2, "epoch_num": 1, "learn_rate": 0.1,
            "input": { "type": "image", "width": 6, "height": 6 },
            "layers": [
                { "id": "stem", "type": "convolution", "feature_maps": 1, "receptive_size": 3,
                  "children": ["a", "b"] },
                { "id": "a", "type": "convolution", "feature_maps": 2, "receptive_size": 1,
                  "children": ["pool"] },
                { "id": "b", "type": "convolution", "feature_maps": 3, "receptive_size": 1,
                  "children": ["pool"] },
                { "id": "pool", "type": "maxpool", "pool_size": 2, "children": ["out"] },
                { "id": "out", "type": "sigmoid", "size": 2 }
            ]
        }"#;
        let mut network = Network::from_json(json).unwrap();
        assert_eq!(network.merger(&node("pool")).unwrap().width(), 80);
        assert_eq!(
            network.layer(&node("pool")).unwrap().shape().output,
            Shape::Image {
                width: 2,
                height: 2,
                maps: 5
            }
        );

        let features: Vec<f32> = (0..72).map(|i| (i % 5) as f32 * 0.25).collect();
        let targets = vec![one_hot(&[0, 1], 2).unwrap()];
        let report = network.train(&features, &targets).unwrap();
        assert!(report.final_loss().unwrap().is_finite());
    }

    #[test]
    fn test_merged_buffer_carries_parent_activation() {
        let json = r#"{
            "train_num": 2, "batch_size": 2, "epoch_num": 1, "learn_rate": 0.1,
            "input": { "type": "image", "width": 6, "height": 6 },
            "layers": [
                { "id": "stem", "type": "convolution", "feature_maps": 1, "receptive_size": 3,
                  "children": ["a", "b"] },
                { "id": "a", "type": "convolution", "feature_maps": 2, "receptive_size": 1,
                  "activation": "relu", "children": ["out"] },
                { "id": "b", "type": "convolution", "feature_maps": 1, "receptive_size": 1,
                  "activation": "relu", "children": ["out"] },
                { "id": "out", "type": "sigmoid", "size": 2 }
            ]
        }"#;
        let network = Network::from_json(json).unwrap();
        let merged = network.merged_data(&node("out")).unwrap();
        assert_eq!(merged.activation(), Activation::Relu);
        assert_eq!(merged.feature_count(), 3 * 16);
        assert!(network.merged_data(&node("a")).is_none());
    }

    #[test]
    fn test_merge_requires_shared_activation() {
        let json = r#"{
            "train_num": 2, "batch_size": 2, "epoch_num": 1, "learn_rate": 0.1,
            "input": { "type": "image", "width": 6, "height": 6 },
            "layers": [
                { "id": "stem", "type": "convolution", "feature_maps": 1, "receptive_size": 3,
                  "children": ["relu", "sig"] },
                { "id": "relu", "type": "convolution", "feature_maps": 1, "receptive_size": 1,
                  "activation": "relu", "children": ["out"] },
                { "id": "sig", "type": "convolution", "feature_maps": 1, "receptive_size": 1,
                  "children": ["out"] },
                { "id": "out", "type": "sigmoid", "size": 2 }
            ]
        }"#;
        let err = Network::from_json(json).unwrap_err();
        assert!(err.to_string().contains("share one activation"), "{}", err);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let json = r#"{
            "train_num": 2, "batch_size": 1, "epoch_num": 1, "learn_rate": 0.1,
            "input": { "type": "vector", "size": 2 },
            "layers": [
                { "id": "a", "type": "sigmoid", "size": 2, "children": ["b"] },
                { "id": "b", "type": "sigmoid", "size": 2, "children": ["c"] },
                { "id": "c", "type": "sigmoid", "size": 2, "children": ["b"] }
            ]
        }"#;
        let err = Network::from_json(json).unwrap_err();
        assert!(matches!(err, NetworkError::Config { .. }));
        assert!(err.to_string().contains("cycle"), "{}", err);
    }

    #[test]
    fn test_unreachable_layer_is_rejected() {
        let json = r#"{
            "train_num": 2, "batch_size": 1, "epoch_num": 1, "learn_rate": 0.1,
            "input": { "type": "vector", "size": 2 },
            "layers": [
                { "id": "a", "type": "sigmoid", "size": 2 },
                { "id": "orphan", "type": "sigmoid", "size": 2 }
            ]
        }"#;
        let err = Network::from_json(json).unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration error in layers[1] (id 'orphan'): unreachable: no layer lists it as a child"
        );
    }

    #[test]
    fn test_spatial_layer_after_vector_is_rejected() {
        let json = r#"{
            "train_num": 2, "batch_size": 1, "epoch_num": 1, "learn_rate": 0.1,
            "input": { "type": "vector", "size": 16 },
            "layers": [
                { "id": "pool", "type": "maxpool", "pool_size": 2 }
            ]
        }"#;
        let err = Network::from_json(json).unwrap_err();
        assert!(err.to_string().contains("layers[0] (id 'pool')"), "{}", err);
        assert!(err.to_string().contains("cannot follow"), "{}", err);
    }

    #[test]
    fn test_input_map_mismatch_names_layer() {
        let json = r#"{
            "train_num": 2, "batch_size": 1, "epoch_num": 1, "learn_rate": 0.1,
            "input": { "type": "image", "width": 8, "height": 8, "channels": 3 },
            "layers": [
                { "id": "conv", "type": "convolution", "feature_maps": 2, "receptive_size": 3,
                  "input_maps": 1 }
            ]
        }"#;
        let err = Network::from_json(json).unwrap_err();
        assert!(matches!(err, NetworkError::Config { ref region, .. } if region == "layers[0] (id 'conv')"));
    }
}

// ============================================================================
// Determinism, Accelerator and Persistence Tests
// ============================================================================

mod execution_tests {
    use super::*;

    #[test]
    fn test_same_seed_same_coefficients() {
        let (features, targets) = image_examples(4);
        let mut a = Network::from_json(IMAGE).unwrap();
        let mut b = Network::from_json(IMAGE).unwrap();
        let report_a = a.train(&features, &targets).unwrap();
        let report_b = b.train(&features, &targets).unwrap();
        assert_eq!(report_a, report_b);
        assert_eq!(a.export_coefficients(), b.export_coefficients());
    }

    #[test]
    fn test_fixed_order_training_is_bit_identical() {
        let json = IMAGE.replace(
            r#""learn_rate": 0.2,"#,
            r#""learn_rate": 0.2, "shuffle": false, "weight_init": "xavier", "seed": 11,"#,
        );
        let (features, targets) = image_examples(4);

        let mut first = Network::from_json(&json).unwrap();
        let mut second = Network::from_json(&json).unwrap();
        assert_eq!(first.export_coefficients(), second.export_coefficients());

        let report_first = first.train(&features, &targets).unwrap();
        let report_second = second.train(&features, &targets).unwrap();
        for (a, b) in report_first
            .epoch_losses
            .iter()
            .zip(&report_second.epoch_losses)
        {
            assert_eq!(a.to_bits(), b.to_bits());
        }

        let trained_first = first.export_coefficients();
        let trained_second = second.export_coefficients();
        assert_eq!(trained_first, trained_second);

        let untrained = Network::from_json(&json).unwrap().export_coefficients();
        assert_ne!(trained_first, untrained);
    }

    #[test]
    fn test_accelerator_matches_host() {
        let (features, targets) = image_examples(4);
        let mut host = Network::from_json(IMAGE).unwrap();
        assert!(!host.is_accelerated());

        let description = parse_description(&IMAGE.replace(
            r#""learn_rate": 0.2,"#,
            r#""learn_rate": 0.2, "accelerator": true,"#,
        ))
        .unwrap();
        let context = ComputeContext::host().unwrap();
        let mut device = Network::with_context(&description, Arc::clone(&context)).unwrap();
        assert!(device.is_accelerated());
        assert!(device.input_data().is_mirrored());

        let host_report = host.train(&features, &targets).unwrap();
        let device_report = device.train(&features, &targets).unwrap();
        // Five launches per batch (max-pool pools two slots), two batches
        // per epoch, two epochs.
        assert_eq!(context.launches(), 5 * 2 * 2);

        for (a, b) in host_report
            .epoch_losses
            .iter()
            .zip(&device_report.epoch_losses)
        {
            assert_relative_eq!(*a, *b, epsilon = 1e-5);
        }
        for id in ["conv", "out"] {
            let h = host.layer(&node(id)).unwrap().weights();
            let d = device.layer(&node(id)).unwrap().weights();
            for (a, b) in h.iter().zip(d) {
                assert_relative_eq!(*a, *b, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_context_unused_without_flag() {
        let description = parse_description(IMAGE).unwrap();
        let network = Network::with_context(&description, ComputeContext::host().unwrap()).unwrap();
        assert!(!network.is_accelerated());
    }

    #[test]
    fn test_coefficients_survive_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("coefficients.json");
        let (features, targets) = image_examples(4);

        let mut trained = Network::from_json(IMAGE).unwrap();
        trained.train(&features, &targets).unwrap();
        trained.save_coefficients(&path).unwrap();

        let json = IMAGE.replace(r#""learn_rate": 0.2,"#, r#""learn_rate": 0.2, "seed": 7,"#);
        let mut restored = Network::from_json(&json).unwrap();
        assert_ne!(
            restored.export_coefficients(),
            trained.export_coefficients()
        );
        restored.load_coefficients(&path).unwrap();
        assert_eq!(
            restored.export_coefficients(),
            trained.export_coefficients()
        );
        assert_eq!(
            restored.predict(&features).unwrap(),
            trained.predict(&features).unwrap()
        );
    }

    #[test]
    fn test_import_reports_missing_node() {
        let mut network = Network::from_json(BRANCHED).unwrap();
        let mut exported = network.export_coefficients();
        exported
            .as_object_mut()
            .unwrap()
            .remove(&NodeId::new("split", 1).to_string());
        let err = network.import_coefficients(&exported).unwrap_err();
        assert_eq!(
            err.to_string(),
            "coefficient import rejected for split#1: missing"
        );
    }

    #[test]
    fn test_predict_handles_any_example_count() {
        let mut network = Network::from_json(IMAGE).unwrap();
        let (features, _) = image_examples(7);
        let predictions = network.predict(&features).unwrap();
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].len(), 7);
        assert!(predictions[0].iter().all(|&class| class < 2));

        assert!(network.predict(&features[..35]).is_err());
    }

    #[test]
    fn test_set_batch_size_grows_every_buffer() {
        let mut network = Network::from_json(IMAGE).unwrap();
        network.set_batch_size(8).unwrap();
        assert_eq!(network.batch_size(), 8);
        assert_eq!(network.input_data().capacity(), 8);
        assert_eq!(
            network.layer_data(&node("out")).unwrap().capacity(),
            8
        );
        let (features, _) = image_examples(8);
        network.load_input(&features).unwrap();
        network.forward().unwrap();
        assert_eq!(network.outputs(0).unwrap().len(), 16);
    }
}
