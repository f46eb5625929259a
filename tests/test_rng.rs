//! Tests for the seeded random number generator
//!
//! This file covers:
//! - Reproducibility from a seed
//! - Output ranges of the sampling helpers
//! - Xavier initialization bounds
//! - Shuffle permutations

use rust_neural_graph::utils::SimpleRng;

// ============================================================================
// Reproducibility Tests
// ============================================================================

mod reproducibility_tests {
    use super::*;

    #[test]
    fn test_same_seed_same_sequence() {
        let mut rng1 = SimpleRng::new(12345);
        let mut rng2 = SimpleRng::new(12345);
        for _ in 0..100 {
            assert_eq!(rng1.next_u32(), rng2.next_u32());
        }
    }

    #[test]
    fn test_different_seeds_differ() {
        let mut rng1 = SimpleRng::new(12345);
        let mut rng2 = SimpleRng::new(54321);
        let first: Vec<u32> = (0..10).map(|_| rng1.next_u32()).collect();
        let second: Vec<u32> = (0..10).map(|_| rng2.next_u32()).collect();
        assert_ne!(first, second);
    }

    #[test]
    fn test_zero_seed_is_usable() {
        let mut rng = SimpleRng::new(0);
        let values: Vec<u32> = (0..10).map(|_| rng.next_u32()).collect();
        assert!(values.iter().any(|&v| v != 0));
    }

    #[test]
    fn test_clone_continues_identically() {
        let mut rng = SimpleRng::new(99);
        rng.next_u32();
        let mut copy = rng.clone();
        assert_eq!(rng.next_f32(), copy.next_f32());
    }
}

// ============================================================================
// Sampling Tests
// ============================================================================

mod sampling_tests {
    use super::*;

    #[test]
    fn test_gen_range_bounds() {
        let mut rng = SimpleRng::new(7);
        for _ in 0..1000 {
            let v = rng.gen_range_f32(-0.5, 0.25);
            assert!((-0.5..0.25).contains(&v));
        }
    }

    #[test]
    fn test_gen_usize_bounds() {
        let mut rng = SimpleRng::new(8);
        for _ in 0..1000 {
            assert!(rng.gen_usize(5) < 5);
        }
        assert_eq!(rng.gen_usize(0), 0);
    }

    #[test]
    fn test_fill_xavier_bounds() {
        let mut rng = SimpleRng::new(3);
        let mut weights = vec![0.0f32; 500];
        rng.fill_xavier(&mut weights, 20, 10);

        let limit = (6.0f32 / 30.0).sqrt();
        assert!(weights.iter().all(|w| w.abs() <= limit));
        assert!(weights.iter().any(|&w| w > 0.0));
        assert!(weights.iter().any(|&w| w < 0.0));
    }

    #[test]
    fn test_fill_xavier_reproducible() {
        let mut a = vec![0.0f32; 16];
        let mut b = vec![0.0f32; 16];
        SimpleRng::new(42).fill_xavier(&mut a, 4, 4);
        SimpleRng::new(42).fill_xavier(&mut b, 4, 4);
        assert_eq!(a, b);
    }
}

// ============================================================================
// Shuffle Tests
// ============================================================================

mod shuffle_tests {
    use super::*;

    #[test]
    fn test_shuffle_is_permutation() {
        let mut rng = SimpleRng::new(2024);
        let mut order: Vec<usize> = (0..50).collect();
        rng.shuffle_usize(&mut order);

        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..50).collect::<Vec<_>>());
        assert_ne!(order, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_shuffle_empty_and_single() {
        let mut rng = SimpleRng::new(1);
        let mut empty: Vec<usize> = Vec::new();
        rng.shuffle_usize(&mut empty);
        assert!(empty.is_empty());

        let mut single = vec![9];
        rng.shuffle_usize(&mut single);
        assert_eq!(single, vec![9]);
    }
}
