//! Deterministic variation selection.
//!
//! The client id is salted with the study name and hashed with SHA-256. The
//! first 48 bits of the digest give a fraction in `[0, 1)`, which is scaled to
//! the total weight and matched against running cumulative weights in list
//! order. Nothing here depends on a seed or the clock, so an install lands in
//! the same variation on every run.

use sha2::{Digest, Sha256};

use shield_types::{ConfigError, InstallIdentity, StudyName, VariationName, WeightedVariation};

/// Number of leading hex digits of the digest that feed the fraction.
const HASH_HEX_DIGITS: u32 = 12;

/// Map `input` onto `[0, 1)` using the leading digits of its SHA-256 digest.
#[must_use]
pub fn hash_fraction(input: &str) -> f64 {
    let digest = Sha256::digest(input.as_bytes());
    let bytes = (HASH_HEX_DIGITS / 2) as usize;
    let value = digest[..bytes]
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
    value as f64 / (1u64 << (HASH_HEX_DIGITS * 4)) as f64
}

/// Pick the variation whose cumulative weight first exceeds `fraction * total`.
///
/// Returns `None` only for an empty list.
#[must_use]
pub fn choose_weighted(variations: &[WeightedVariation], fraction: f64) -> Option<&VariationName> {
    let total: f64 = variations.iter().map(WeightedVariation::weight).sum();
    let point = fraction * total;
    let mut cumulative = 0.0;
    variations
        .iter()
        .find(|variation| {
            cumulative += variation.weight();
            cumulative > point
        })
        // Float rounding can leave the point at the very top of the range.
        .or_else(|| variations.last())
        .map(WeightedVariation::name)
}

/// Assign `identity` to one variation of `study`.
///
/// A forced variation is returned unchanged without hashing, whether or not
/// it appears in `variations`.
pub fn select_variation(
    identity: &InstallIdentity,
    study: &StudyName,
    variations: &[WeightedVariation],
    forced: Option<&VariationName>,
) -> Result<VariationName, ConfigError> {
    if let Some(forced) = forced {
        tracing::debug!(variation = %forced, "Using forced variation");
        return Ok(forced.clone());
    }

    WeightedVariation::validate_all(variations)?;
    let salted = format!("{study}{}", identity.client_id());
    let fraction = hash_fraction(&salted);
    let chosen = choose_weighted(variations, fraction).ok_or(ConfigError::NoVariations)?;
    tracing::debug!(fraction, variation = %chosen, "Selected variation");
    Ok(chosen.clone())
}
