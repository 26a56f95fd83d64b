//! Ending reasons and the per-reason ending configuration.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{ConfigError, EmptyNameError};

/// Canonical tag explaining why a study stopped for an install.
///
/// Trimmed on construction, the same as the other name types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EndingReason(Cow<'static, str>);

impl EndingReason {
    pub const INELIGIBLE: Self = Self(Cow::Borrowed("ineligible"));
    pub const USER_DISABLE: Self = Self(Cow::Borrowed("user-disable"));
    pub const EXPIRED: Self = Self(Cow::Borrowed("expired"));

    pub fn new(value: impl Into<String>) -> Result<Self, EmptyNameError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(EmptyNameError {
                field: "ending reason",
            });
        }
        Ok(Self(Cow::Owned(trimmed.to_string())))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EndingReason {
    type Error = EmptyNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EndingReason> for String {
    fn from(value: EndingReason) -> Self {
        value.0.into_owned()
    }
}

impl fmt::Display for EndingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a custom ending is reported to telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EndingCategory {
    #[serde(rename = "ended-positive")]
    Positive,
    #[default]
    #[serde(rename = "ended-neutral")]
    Neutral,
    #[serde(rename = "ended-negative")]
    Negative,
}

impl EndingCategory {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "ended-positive",
            Self::Neutral => "ended-neutral",
            Self::Negative => "ended-negative",
        }
    }
}

impl FromStr for EndingCategory {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ended-positive" | "positive" => Ok(Self::Positive),
            "ended-neutral" | "neutral" => Ok(Self::Neutral),
            "ended-negative" | "negative" => Ok(Self::Negative),
            other => Err(ConfigError::UnknownEndingCategory(other.to_string())),
        }
    }
}

impl fmt::Display for EndingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where to send the user once an ending is effected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndingUrl {
    /// Study parameters are appended as query pairs.
    Base(Url),
    /// Used verbatim.
    Exact(Url),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndingConfig {
    url: Option<EndingUrl>,
    category: Option<EndingCategory>,
}

impl EndingConfig {
    #[must_use]
    pub fn new(url: Option<EndingUrl>, category: Option<EndingCategory>) -> Self {
        Self { url, category }
    }

    /// Resolve the raw `base_url` / `exact_url` pair from configuration.
    pub fn from_raw(
        reason: &EndingReason,
        base_url: Option<&str>,
        exact_url: Option<&str>,
        category: Option<EndingCategory>,
    ) -> Result<Self, ConfigError> {
        let parse = |raw: &str| {
            Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidEndingUrl {
                reason: reason.clone(),
                url: raw.to_string(),
                message: e.to_string(),
            })
        };
        let url = match (base_url, exact_url) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::ConflictingEndingUrls {
                    reason: reason.clone(),
                });
            }
            (Some(base), None) => Some(EndingUrl::Base(parse(base)?)),
            (None, Some(exact)) => Some(EndingUrl::Exact(parse(exact)?)),
            (None, None) => None,
        };
        Ok(Self { url, category })
    }

    #[must_use]
    pub fn url(&self) -> Option<&EndingUrl> {
        self.url.as_ref()
    }

    #[must_use]
    pub fn category(&self) -> Option<EndingCategory> {
        self.category
    }
}

/// Ending configuration keyed by reason. Consulted, never required.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endings(BTreeMap<EndingReason, EndingConfig>);

impl Endings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reason: EndingReason, config: EndingConfig) {
        self.0.insert(reason, config);
    }

    #[must_use]
    pub fn get(&self, reason: &EndingReason) -> Option<&EndingConfig> {
        self.0.get(reason)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EndingReason, &EndingConfig)> {
        self.0.iter()
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
