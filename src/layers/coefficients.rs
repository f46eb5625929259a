//! Structured export format of a layer's weights and biases.
//!
//! ```json
//! {
//!   "dimension": { "feature_maps": 4, "input_maps": 1, "receptive_size": 5 },
//!   "weight": [[...25 floats...], ...],
//!   "bias": [[...], ...]
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{NetworkError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub feature_maps: usize,
    pub input_maps: usize,
    pub receptive_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerCoefficients {
    pub dimension: Dimension,
    pub weight: Vec<Vec<f32>>,
    pub bias: Vec<Vec<f32>>,
}

impl LayerCoefficients {
    /// Splits flat weights and biases into rows of the given lengths.
    pub fn from_flat(
        dimension: Dimension,
        weights: &[f32],
        weight_row: usize,
        biases: &[f32],
        bias_row: usize,
    ) -> Self {
        Self {
            dimension,
            weight: rows(weights, weight_row),
            bias: rows(biases, bias_row),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "dimension": {
                "feature_maps": self.dimension.feature_maps,
                "input_maps": self.dimension.input_maps,
                "receptive_size": self.dimension.receptive_size,
            },
            "weight": self.weight,
            "bias": self.bias,
        })
    }

    /// Parses `value` and checks its dimension block against `expected`.
    pub fn parse(layer: &str, value: &Value, expected: Dimension) -> Result<Self> {
        let coefficients: LayerCoefficients = serde_json::from_value(value.clone())
            .map_err(|err| NetworkError::coefficients(layer, err.to_string()))?;
        if coefficients.dimension != expected {
            return Err(NetworkError::coefficients(
                layer,
                format!(
                    "dimension {:?} does not match layer dimension {:?}",
                    coefficients.dimension, expected
                ),
            ));
        }
        Ok(coefficients)
    }

    /// Flattens the weight rows, checking count and row length.
    pub fn flat_weights(&self, layer: &str, count: usize, row: usize) -> Result<Vec<f32>> {
        flatten(layer, "weight", &self.weight, count, row)
    }

    pub fn flat_biases(&self, layer: &str, count: usize, row: usize) -> Result<Vec<f32>> {
        flatten(layer, "bias", &self.bias, count, row)
    }
}

fn rows(values: &[f32], row: usize) -> Vec<Vec<f32>> {
    if row == 0 {
        return Vec::new();
    }
    values.chunks(row).map(<[f32]>::to_vec).collect()
}

fn flatten(
    layer: &str,
    field: &str,
    rows: &[Vec<f32>],
    count: usize,
    row: usize,
) -> Result<Vec<f32>> {
    if rows.len() != count {
        return Err(NetworkError::coefficients(
            layer,
            format!("'{}' has {} arrays, expected {}", field, rows.len(), count),
        ));
    }
    let mut flat = Vec::with_capacity(count * row);
    for (i, values) in rows.iter().enumerate() {
        if values.len() != row {
            return Err(NetworkError::coefficients(
                layer,
                format!(
                    "'{}[{}]' has {} values, expected {}",
                    field,
                    i,
                    values.len(),
                    row
                ),
            ));
        }
        flat.extend_from_slice(values);
    }
    Ok(flat)
}
