//! Core domain types for Shield studies.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer: the config loader resolves raw TOML
//! into these types, and the lifecycle core consumes them.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod ending;
mod identity;
mod lifecycle;
mod message;
mod settings;
mod variation;

pub use ending::{EndingCategory, EndingConfig, EndingReason, EndingUrl, Endings};
pub use identity::{AddonInfo, InstallIdentity};
pub use lifecycle::{HostReason, LifecycleEvent, LifecycleState, UnknownHostReason};
pub use message::{ExtensionMessage, MessageError};
pub use settings::{StudySettings, TelemetrySettings};
pub use variation::{ConfigError, WeightedVariation, WeightedVariations};

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// NonEmpty name types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field} must not be empty")]
pub struct EmptyNameError {
    pub field: &'static str,
}

// Every name type, `EndingReason` included, stores its input with surrounding
// whitespace trimmed. Names that differ only in padding are the same name.
macro_rules! non_empty_name {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Result<Self, EmptyNameError> {
                let value = value.into();
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    Err(EmptyNameError { field: $field })
                } else if trimmed.len() == value.len() {
                    Ok(Self(value))
                } else {
                    Ok(Self(trimmed.to_string()))
                }
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = EmptyNameError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = EmptyNameError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

non_empty_name!(
    /// Name of a study, used as the hashing salt and on every telemetry record.
    StudyName,
    "study name"
);
non_empty_name!(
    /// One treatment arm of a study.
    VariationName,
    "variation name"
);
non_empty_name!(
    /// Opaque, stable per-profile identifier supplied by the host.
    ClientId,
    "client id"
);
