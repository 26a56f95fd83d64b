//! Study configuration loading.
//!
//! The on-disk format is TOML at `~/.shield/study.toml`:
//!
//! ```toml
//! [study]
//! name = "button-color"
//!
//! [[study.variations]]
//! name = "control"
//! weight = 1
//!
//! [[study.variations]]
//! name = "treatment"
//! weight = 3
//!
//! [study.endings.too-popular]
//! base_url = "https://example.com/survey"
//! category = "ended-positive"
//!
//! [addon]
//! id = "button-color@shield.example"
//! version = "1.0.0"
//!
//! [telemetry]
//! send = true
//!
//! [log]
//! level = "debug"
//!
//! [eligibility]
//! command = ["sh", "-c", "test -e ~/.eligible"]
//! ```
//!
//! Raw structs are private; [`ShieldConfig::from_toml_str`] resolves them into
//! validated [`StudySettings`] so nothing downstream sees a malformed study.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::{env, fs, io};

use serde::Deserialize;
use thiserror::Error;

use shield_types::{
    AddonInfo, ConfigError, EndingCategory, EndingConfig, EndingReason, Endings, StudyName,
    StudySettings, TelemetrySettings, VariationName, WeightedVariation, WeightedVariations,
};

/// Environment variable that overrides `study.force_variation`.
pub const FORCE_VARIATION_ENV: &str = "SHIELD_FORCE_VARIATION";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid study configuration: {0}")]
    Invalid(#[from] ConfigError),
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    study: RawStudy,
    #[serde(default)]
    addon: Option<RawAddon>,
    #[serde(default)]
    telemetry: TelemetrySettings,
    #[serde(default)]
    log: RawLog,
    #[serde(default)]
    eligibility: RawEligibility,
}

#[derive(Debug, Deserialize)]
struct RawStudy {
    name: String,
    #[serde(default)]
    force_variation: Option<String>,
    #[serde(default)]
    variations: Vec<RawVariation>,
    #[serde(default)]
    endings: BTreeMap<String, RawEnding>,
}

#[derive(Debug, Deserialize)]
struct RawVariation {
    name: String,
    weight: f64,
}

#[derive(Debug, Default, Deserialize)]
struct RawEnding {
    base_url: Option<String>,
    exact_url: Option<String>,
    category: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAddon {
    id: String,
    version: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawLog {
    level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawEligibility {
    #[serde(default)]
    command: Vec<String>,
}

/// Fully resolved configuration for one study install.
#[derive(Debug, Clone, PartialEq)]
pub struct ShieldConfig {
    settings: StudySettings,
    addon: AddonInfo,
    log_level: Option<String>,
    eligibility_command: Option<Vec<String>>,
}

impl ShieldConfig {
    /// Load from the default path, then apply `SHIELD_FORCE_VARIATION`.
    pub fn load() -> Result<Option<Self>, LoadError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, LoadError> {
        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {}: {source}", path.display());
            LoadError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let raw: RawConfig = toml::from_str(&content).map_err(|source| {
            tracing::warn!("Failed to parse config at {}: {source}", path.display());
            LoadError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let config = Self::resolve(raw, env::var(FORCE_VARIATION_ENV).ok())?;
        tracing::debug!(path = %path.display(), study = %config.settings.name(), "Loaded study config");
        Ok(config)
    }

    /// Parse TOML text without consulting the environment.
    pub fn from_toml_str(content: &str) -> Result<Self, LoadError> {
        let raw: RawConfig = toml::from_str(content).map_err(|source| LoadError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Ok(Self::resolve(raw, None)?)
    }

    fn resolve(raw: RawConfig, force_override: Option<String>) -> Result<Self, ConfigError> {
        let name = StudyName::new(raw.study.name)?;

        let variations = raw
            .study
            .variations
            .into_iter()
            .map(|v| -> Result<WeightedVariation, ConfigError> {
                Ok(WeightedVariation::new(VariationName::new(v.name)?, v.weight))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let variations = WeightedVariations::new(variations)?;

        // An override that is set but blank is rejected like a blank config value.
        let force_variation = force_override
            .or(raw.study.force_variation)
            .map(VariationName::new)
            .transpose()?;
        if let Some(forced) = &force_variation
            && !variations.contains(forced)
        {
            tracing::warn!(variation = %forced, "Forced variation is not in the variation list");
        }

        let mut endings = Endings::new();
        for (key, ending) in raw.study.endings {
            let reason = EndingReason::new(key)?;
            let category = ending
                .category
                .as_deref()
                .map(str::parse::<EndingCategory>)
                .transpose()?;
            let config = EndingConfig::from_raw(
                &reason,
                ending.base_url.as_deref(),
                ending.exact_url.as_deref(),
                category,
            )?;
            endings.insert(reason, config);
        }

        let addon = match raw.addon {
            Some(addon) => AddonInfo {
                id: addon.id,
                version: addon.version,
            },
            None => AddonInfo {
                id: format!("{name}@shield"),
                version: "0.0.0".to_string(),
            },
        };

        let eligibility_command = Some(raw.eligibility.command).filter(|cmd| !cmd.is_empty());

        Ok(Self {
            settings: StudySettings::new(name, variations)
                .with_force_variation(force_variation)
                .with_endings(endings)
                .with_telemetry(raw.telemetry),
            addon,
            log_level: raw.log.level.filter(|level| !level.trim().is_empty()),
            eligibility_command,
        })
    }

    #[must_use]
    pub fn settings(&self) -> &StudySettings {
        &self.settings
    }

    #[must_use]
    pub fn addon(&self) -> &AddonInfo {
        &self.addon
    }

    /// `tracing` filter directive from `[log] level`.
    #[must_use]
    pub fn log_level(&self) -> Option<&str> {
        self.log_level.as_deref()
    }

    /// Program and arguments of the external eligibility check.
    #[must_use]
    pub fn eligibility_command(&self) -> Option<&[String]> {
        self.eligibility_command.as_deref()
    }

    /// Per-study directory for persisted state and telemetry output.
    #[must_use]
    pub fn data_dir(&self) -> Option<PathBuf> {
        data_dir(self.settings.name())
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".shield").join("study.toml"))
}

#[must_use]
pub fn data_dir(study: &StudyName) -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".shield").join("studies").join(study.as_str()))
}
