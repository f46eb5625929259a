//! Training configuration
//!
//! The hyperparameters that sit at the top level of a network description:
//! example count, mini-batch size, epochs and learning rate, plus the seeded
//! initialization and execution options.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{NetworkError, Result};

/// Initial values for layer weights. Biases always start at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightInit {
    /// Xavier/Glorot uniform, drawn from the seeded RNG.
    #[default]
    Xavier,
    /// All weights zero.
    Zero,
}

fn default_shuffle() -> bool {
    true
}

fn default_seed() -> u64 {
    42
}

/// Training hyperparameters of a network description.
///
/// # Example
///
/// ```json
/// {
///   "train_num": 60000,
///   "batch_size": 32,
///   "epoch_num": 10,
///   "learn_rate": 0.01,
///   "shuffle": true,
///   "seed": 42,
///   "weight_init": "xavier",
///   "accelerator": false
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Number of training examples consumed per epoch
    pub train_num: usize,

    /// Examples per mini-batch
    pub batch_size: usize,

    /// Passes over the training set
    pub epoch_num: usize,

    /// Gradient descent step size
    pub learn_rate: f32,

    /// Reshuffle example order every epoch (default true)
    #[serde(default = "default_shuffle")]
    pub shuffle: bool,

    /// Seed for weight initialization and shuffling (default 42)
    #[serde(default = "default_seed")]
    pub seed: u64,

    #[serde(default)]
    pub weight_init: WeightInit,

    /// Run forward passes through a compute context (default false)
    #[serde(default)]
    pub accelerator: bool,
}

/// Loads and validates a training configuration from a JSON file.
pub fn load_config(path: impl AsRef<Path>) -> Result<TrainingConfig> {
    let contents = fs::read_to_string(path)?;
    let config: TrainingConfig = serde_json::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &TrainingConfig) -> Result<()> {
    if config.train_num == 0 {
        return Err(NetworkError::config("train_num", "must be at least 1"));
    }

    if config.batch_size == 0 {
        return Err(NetworkError::config("batch_size", "must be at least 1"));
    }

    if config.batch_size > config.train_num {
        return Err(NetworkError::config(
            "batch_size",
            format!(
                "batch size {} exceeds train_num {}",
                config.batch_size, config.train_num
            ),
        ));
    }

    if !config.learn_rate.is_finite() || config.learn_rate <= 0.0 {
        return Err(NetworkError::config(
            "learn_rate",
            format!("must be positive and finite, got {}", config.learn_rate),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let config: TrainingConfig = serde_json::from_str(
            r#"{"train_num": 10, "batch_size": 2, "epoch_num": 1, "learn_rate": 0.1}"#,
        )
        .unwrap();
        assert!(config.shuffle);
        assert_eq!(config.seed, 42);
        assert_eq!(config.weight_init, WeightInit::Xavier);
        assert!(!config.accelerator);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_batch_larger_than_train_num_rejected() {
        let config: TrainingConfig = serde_json::from_str(
            r#"{"train_num": 2, "batch_size": 4, "epoch_num": 1, "learn_rate": 0.1}"#,
        )
        .unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }
}
