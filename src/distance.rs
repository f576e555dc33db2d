//! Distance metrics for vector similarity

use std::fmt;
use std::str::FromStr;

use crate::error::{IndexError, Result};
use serde::{Deserialize, Serialize};

/// Distance metrics supported by the index.
///
/// Every metric returns a value where smaller means closer, so the graph can
/// rank candidates without knowing which metric is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Squared Euclidean distance
    L2Sq,
    /// Cosine distance (1 - cosine similarity)
    Cosine,
    /// Inner product distance (1 - dot product)
    InnerProduct,
    /// Number of differing components
    Hamming,
}

impl Metric {
    /// Compute the distance between two vectors using this metric
    pub fn distance(&self, a: &[f32], b: &[f32]) -> Result<f32> {
        if a.len() != b.len() {
            return Err(IndexError::DimensionMismatch {
                expected: a.len(),
                actual: b.len(),
            });
        }
        Ok(self.eval(a, b))
    }

    /// Compute the distance without checking lengths.
    ///
    /// Callers must have validated both slices against the index dimension.
    #[inline]
    pub(crate) fn eval(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            Metric::L2Sq => l2sq_distance(a, b),
            Metric::Cosine => cosine_distance(a, b),
            Metric::InnerProduct => 1.0 - dot_product(a, b),
            Metric::Hamming => hamming_distance(a, b),
        }
    }

    /// Whether vectors with zero norm are meaningless under this metric.
    pub fn requires_nonzero_norm(&self) -> bool {
        matches!(self, Metric::Cosine)
    }

    /// Stable on-disk code.
    pub(crate) fn code(&self) -> u8 {
        match self {
            Metric::L2Sq => 0,
            Metric::Cosine => 1,
            Metric::InnerProduct => 2,
            Metric::Hamming => 3,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Metric::L2Sq),
            1 => Some(Metric::Cosine),
            2 => Some(Metric::InnerProduct),
            3 => Some(Metric::Hamming),
            _ => None,
        }
    }

    /// Canonical short name.
    pub fn name(&self) -> &'static str {
        match self {
            Metric::L2Sq => "l2sq",
            Metric::Cosine => "cos",
            Metric::InnerProduct => "ip",
            Metric::Hamming => "hamming",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l2sq" | "euclidean_sq" => Ok(Metric::L2Sq),
            "cos" | "cosine" | "angular" => Ok(Metric::Cosine),
            "ip" | "inner" | "dot" => Ok(Metric::InnerProduct),
            "hamming" => Ok(Metric::Hamming),
            other => Err(IndexError::InvalidConfiguration(format!(
                "unknown metric '{}', supported metrics are: l2sq, cos, ip, hamming",
                other
            ))),
        }
    }
}

/// Squared Euclidean distance. Monotonic with L2, so ranking is unaffected.
///
/// Accumulates in f64; the result is finite for any pair of vectors an
/// index accepts.
pub fn l2sq_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = f64::from(x) - f64::from(y);
            d * d
        })
        .sum::<f64>() as f32
}

/// Cosine distance (1 - cosine similarity), in `[0, 2]`.
///
/// A zero-norm operand yields 1.0; cosine indices reject such vectors
/// before they reach the graph.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    let similarity = dot / (na.sqrt() * nb.sqrt());

    // Clamp to [-1, 1] to handle floating point errors
    (1.0 - similarity.clamp(-1.0, 1.0)) as f32
}

/// Compute dot product of two vectors
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| f64::from(x) * f64::from(y))
        .sum::<f64>() as f32
}

/// Count of positions where the components differ.
pub fn hamming_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).filter(|(x, y)| x != y).count() as f32
}
