//! Resolved study settings shared across crates.
//!
//! These types represent fully-validated study configuration. Raw TOML
//! deserialization structs stay private in `shield-config`, which resolves
//! them into these types at the parse boundary.

use serde::{Deserialize, Serialize};

use crate::{EndingConfig, EndingReason, Endings, StudyName, VariationName, WeightedVariations};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Submit records to the sink. When false records are only logged.
    pub send: bool,
    /// Production studies clear the `testing` flag on every record.
    pub remove_testing_flag: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            send: true,
            remove_testing_flag: false,
        }
    }
}

/// Immutable study descriptor. Existence of a value proves the variation
/// list is sampleable and any forced variation is non-empty.
#[derive(Debug, Clone, PartialEq)]
pub struct StudySettings {
    name: StudyName,
    variations: WeightedVariations,
    force_variation: Option<VariationName>,
    endings: Endings,
    telemetry: TelemetrySettings,
}

impl StudySettings {
    #[must_use]
    pub fn new(name: StudyName, variations: WeightedVariations) -> Self {
        Self {
            name,
            variations,
            force_variation: None,
            endings: Endings::new(),
            telemetry: TelemetrySettings::default(),
        }
    }

    #[must_use]
    pub fn with_force_variation(mut self, variation: Option<VariationName>) -> Self {
        self.force_variation = variation;
        self
    }

    #[must_use]
    pub fn with_ending(mut self, reason: EndingReason, config: EndingConfig) -> Self {
        self.endings.insert(reason, config);
        self
    }

    #[must_use]
    pub fn with_endings(mut self, endings: Endings) -> Self {
        self.endings = endings;
        self
    }

    #[must_use]
    pub fn with_telemetry(mut self, telemetry: TelemetrySettings) -> Self {
        self.telemetry = telemetry;
        self
    }

    #[must_use]
    pub fn name(&self) -> &StudyName {
        &self.name
    }

    #[must_use]
    pub fn variations(&self) -> &WeightedVariations {
        &self.variations
    }

    #[must_use]
    pub fn force_variation(&self) -> Option<&VariationName> {
        self.force_variation.as_ref()
    }

    #[must_use]
    pub fn endings(&self) -> &Endings {
        &self.endings
    }

    #[must_use]
    pub fn telemetry(&self) -> TelemetrySettings {
        self.telemetry
    }
}
