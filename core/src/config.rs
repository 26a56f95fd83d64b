use std::fmt;
use std::sync::Arc;

use shield_types::StudySettings;

use crate::eligibility::{AlwaysEligible, EligibilityCheck};

/// Study settings plus the domain-supplied eligibility predicate.
#[derive(Clone)]
pub struct StudyConfig {
    settings: StudySettings,
    eligibility: Arc<dyn EligibilityCheck>,
}

impl StudyConfig {
    #[must_use]
    pub fn new(settings: StudySettings) -> Self {
        Self {
            settings,
            eligibility: Arc::new(AlwaysEligible),
        }
    }

    #[must_use]
    pub fn with_eligibility(mut self, check: Arc<dyn EligibilityCheck>) -> Self {
        self.eligibility = check;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &StudySettings {
        &self.settings
    }

    #[must_use]
    pub fn eligibility(&self) -> &dyn EligibilityCheck {
        self.eligibility.as_ref()
    }
}

impl fmt::Debug for StudyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StudyConfig")
            .field("settings", &self.settings)
            .field("eligibility", &self.eligibility.describe())
            .finish()
    }
}
