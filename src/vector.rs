//! Vector type and component validation

use crate::error::{IndexError, Result};
use serde::{Deserialize, Serialize};

/// An owned vector handed out to callers.
///
/// The index never exposes its internal storage; `Index::get` and the
/// vector store return copies wrapped in this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    data: Vec<f32>,
}

impl Vector {
    /// Create a new vector from a Vec<f32>
    pub fn new(data: Vec<f32>) -> Self {
        Self { data }
    }

    /// Get the dimension of the vector
    pub fn dimension(&self) -> usize {
        self.data.len()
    }

    /// Get the underlying data as a slice
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Consume the vector and return its components
    pub fn into_inner(self) -> Vec<f32> {
        self.data
    }

    /// Compute the L2 norm (magnitude) of the vector
    pub fn norm(&self) -> f32 {
        norm(&self.data)
    }
}

impl From<Vec<f32>> for Vector {
    fn from(data: Vec<f32>) -> Self {
        Self::new(data)
    }
}

impl From<&[f32]> for Vector {
    fn from(data: &[f32]) -> Self {
        Self::new(data.to_vec())
    }
}

impl AsRef<[f32]> for Vector {
    fn as_ref(&self) -> &[f32] {
        &self.data
    }
}

/// L2 norm of a slice.
pub fn norm(data: &[f32]) -> f32 {
    data.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Check that `data` has `expected` components.
pub fn check_dimension(data: &[f32], expected: usize) -> Result<()> {
    if data.len() != expected {
        return Err(IndexError::DimensionMismatch {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Reject NaN and infinite components.
pub fn check_finite(data: &[f32]) -> Result<()> {
    if let Some(pos) = data.iter().position(|x| !x.is_finite()) {
        return Err(IndexError::InvalidVector {
            reason: format!("component {} is not finite ({})", pos, data[pos]),
        });
    }
    Ok(())
}

/// Largest squared L2 norm a stored or query vector may have.
///
/// Two vectors within this bound are at most `f32::MAX` apart in squared
/// Euclidean distance, and their inner product stays within `f32` range.
pub const MAX_SQUARED_NORM: f64 = f32::MAX as f64 / 4.0;

/// Reject vectors whose magnitude would overflow distance computations.
pub fn check_magnitude(data: &[f32]) -> Result<()> {
    let squared: f64 = data.iter().map(|&x| f64::from(x) * f64::from(x)).sum();
    if squared > MAX_SQUARED_NORM {
        return Err(IndexError::InvalidVector {
            reason: format!(
                "squared norm {:e} exceeds the supported maximum {:e}",
                squared, MAX_SQUARED_NORM
            ),
        });
    }
    Ok(())
}
