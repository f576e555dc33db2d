//! Index configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::distance::Metric;
use crate::error::{IndexError, Result};
use crate::persistence::serialization;

/// How mutating operations are coordinated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    /// One `add`/`remove` at a time; searches never wait on each other.
    #[default]
    SingleWriter,
    /// Insertions link in parallel under per-node locks.
    ConcurrentWriters,
}

/// Configuration parameters for an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Number of components per vector.
    pub dimensions: usize,
    /// Distance metric.
    pub metric: Metric,
    /// Max number of connections per node on layers > 0 (`M`).
    pub connectivity: usize,
    /// Beam width during insertion.
    pub ef_construction: usize,
    /// Beam width during search.
    pub ef_search: usize,
    /// Hard cap on the number of layers.
    pub max_layers: usize,
    /// Seed for layer sampling. `None` seeds from OS entropy.
    pub seed: Option<u64>,
    pub concurrency: ConcurrencyMode,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimensions: 0,
            metric: Metric::L2Sq,
            connectivity: 16,
            ef_construction: 128,
            ef_search: 64,
            max_layers: 16,
            seed: None,
            concurrency: ConcurrencyMode::SingleWriter,
        }
    }
}

impl IndexConfig {
    pub fn new(dimensions: usize, metric: Metric) -> Self {
        Self {
            dimensions,
            metric,
            ..Self::default()
        }
    }

    pub fn with_connectivity(mut self, connectivity: usize) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn with_ef_construction(mut self, ef_construction: usize) -> Self {
        self.ef_construction = ef_construction;
        self
    }

    pub fn with_ef_search(mut self, ef_search: usize) -> Self {
        self.ef_search = ef_search;
        self
    }

    pub fn with_max_layers(mut self, max_layers: usize) -> Self {
        self.max_layers = max_layers;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_concurrency(mut self, concurrency: ConcurrencyMode) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Check that the parameters describe a usable index.
    pub fn validate(&self) -> Result<()> {
        if self.dimensions == 0 {
            return Err(IndexError::InvalidConfiguration(
                "dimensions must be positive".to_string(),
            ));
        }
        if self.dimensions > u32::MAX as usize {
            return Err(IndexError::InvalidConfiguration(format!(
                "dimensions {} exceed the supported maximum",
                self.dimensions
            )));
        }
        // ln(1) = 0 would make the level multiplier infinite
        if self.connectivity < 2 {
            return Err(IndexError::InvalidConfiguration(format!(
                "connectivity must be at least 2, got {}",
                self.connectivity
            )));
        }
        if self.ef_construction == 0 {
            return Err(IndexError::InvalidConfiguration(
                "ef_construction must be positive".to_string(),
            ));
        }
        if self.ef_search == 0 {
            return Err(IndexError::InvalidConfiguration(
                "ef_search must be positive".to_string(),
            ));
        }
        if self.max_layers == 0 {
            return Err(IndexError::InvalidConfiguration(
                "max_layers must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// `M`: neighbour list capacity on layers above 0.
    pub fn m(&self) -> usize {
        self.connectivity
    }

    /// Neighbour list capacity on layer 0.
    pub fn m_max0(&self) -> usize {
        2 * self.connectivity
    }

    /// Capacity of a neighbour list on `layer`.
    pub fn capacity_at(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m_max0()
        } else {
            self.m()
        }
    }

    /// Level generation factor: 1 / ln(M).
    pub fn ml(&self) -> f64 {
        1.0 / (self.connectivity as f64).ln()
    }

    /// Parse a configuration from JSON bytes and validate it.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let config: IndexConfig = serialization::from_json(bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_json(&bytes)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serialization::to_json(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let config = IndexConfig::new(4, Metric::L2Sq).with_connectivity(8);
        assert!(config.validate().is_ok());
        assert_eq!(config.m(), 8);
        assert_eq!(config.m_max0(), 16);
        assert_eq!(config.capacity_at(0), 16);
        assert_eq!(config.capacity_at(3), 8);
        assert!((config.ml() - 1.0 / 8f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_invalid() {
        let bad = [
            IndexConfig::new(0, Metric::L2Sq),
            IndexConfig::new(4, Metric::L2Sq).with_connectivity(0),
            IndexConfig::new(4, Metric::L2Sq).with_connectivity(1),
            IndexConfig::new(4, Metric::L2Sq).with_ef_construction(0),
            IndexConfig::new(4, Metric::L2Sq).with_ef_search(0),
            IndexConfig::new(4, Metric::L2Sq).with_max_layers(0),
        ];
        for config in bad {
            assert!(matches!(
                config.validate(),
                Err(IndexError::InvalidConfiguration(_))
            ));
        }
    }

    #[test]
    fn test_json_roundtrip() {
        let config = IndexConfig::new(128, Metric::Cosine)
            .with_connectivity(12)
            .with_seed(7)
            .with_concurrency(ConcurrencyMode::ConcurrentWriters);
        let bytes = config.to_json().unwrap();
        assert_eq!(IndexConfig::from_json(&bytes).unwrap(), config);
    }

    #[test]
    fn test_json_partial_uses_defaults() {
        let config =
            IndexConfig::from_json(br#"{"dimensions": 3, "metric": "inner_product"}"#).unwrap();
        assert_eq!(config.dimensions, 3);
        assert_eq!(config.metric, Metric::InnerProduct);
        assert_eq!(config.connectivity, 16);
        assert_eq!(config.concurrency, ConcurrencyMode::SingleWriter);
    }

    #[test]
    fn test_json_invalid_is_rejected() {
        assert!(matches!(
            IndexConfig::from_json(br#"{"dimensions": 0}"#),
            Err(IndexError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            IndexConfig::from_json(b"not json"),
            Err(IndexError::SerializationError(_))
        ));
    }
}
