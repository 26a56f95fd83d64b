//! Weighted variation lists and the configuration errors they can raise.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{EmptyNameError, EndingReason, VariationName};

/// Malformed study configuration. Always fatal: startup aborts before any
/// telemetry is sent.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("study must declare at least one variation")]
    NoVariations,
    #[error(
        "variation '{variation}' has invalid weight {weight}; weights and their sum must be finite and > 0"
    )]
    InvalidWeight {
        variation: VariationName,
        weight: f64,
    },
    #[error("variation '{0}' is declared more than once")]
    DuplicateVariation(VariationName),
    #[error(transparent)]
    EmptyName(#[from] EmptyNameError),
    #[error("ending '{reason}' sets both base_url and exact_url")]
    ConflictingEndingUrls { reason: EndingReason },
    #[error("ending '{reason}' has an invalid url '{url}': {message}")]
    InvalidEndingUrl {
        reason: EndingReason,
        url: String,
        message: String,
    },
    #[error("unknown ending category '{0}'")]
    UnknownEndingCategory(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedVariation {
    name: VariationName,
    weight: f64,
}

impl WeightedVariation {
    #[must_use]
    pub fn new(name: VariationName, weight: f64) -> Self {
        Self { name, weight }
    }

    #[must_use]
    pub fn name(&self) -> &VariationName {
        &self.name
    }

    #[must_use]
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Check that a list of variations can be sampled from.
    ///
    /// The list must be non-empty and its names unique. Every weight must be
    /// finite and strictly positive, and so must their running sum.
    pub fn validate_all(variations: &[WeightedVariation]) -> Result<(), ConfigError> {
        if variations.is_empty() {
            return Err(ConfigError::NoVariations);
        }
        let mut seen = HashSet::with_capacity(variations.len());
        let mut total = 0.0;
        for variation in variations {
            total += variation.weight;
            if !variation.weight.is_finite() || variation.weight <= 0.0 || !total.is_finite() {
                return Err(ConfigError::InvalidWeight {
                    variation: variation.name.clone(),
                    weight: variation.weight,
                });
            }
            if !seen.insert(variation.name.as_str()) {
                return Err(ConfigError::DuplicateVariation(variation.name.clone()));
            }
        }
        Ok(())
    }
}

/// An ordered variation list that passed [`WeightedVariation::validate_all`].
///
/// Order is significant: the selector walks it front to back.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct WeightedVariations(Vec<WeightedVariation>);

impl WeightedVariations {
    pub fn new(variations: Vec<WeightedVariation>) -> Result<Self, ConfigError> {
        WeightedVariation::validate_all(&variations)?;
        Ok(Self(variations))
    }

    #[must_use]
    pub fn as_slice(&self) -> &[WeightedVariation] {
        &self.0
    }

    #[must_use]
    pub fn total_weight(&self) -> f64 {
        self.0.iter().map(WeightedVariation::weight).sum()
    }

    #[must_use]
    pub fn contains(&self, name: &VariationName) -> bool {
        self.0.iter().any(|v| v.name() == name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for WeightedVariations {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = Vec::<WeightedVariation>::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}
