//! Host lifecycle events and the controller state they drive.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// Reason code attached to every host lifecycle callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "RawHostReason")]
pub enum HostReason {
    AppStartup,
    AppShutdown,
    AddonEnable,
    AddonDisable,
    AddonInstall,
    AddonUninstall,
    AddonUpgrade,
    AddonDowngrade,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown host reason '{0}'")]
pub struct UnknownHostReason(pub String);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawHostReason {
    Code(u32),
    Name(String),
}

impl TryFrom<RawHostReason> for HostReason {
    type Error = UnknownHostReason;

    fn try_from(raw: RawHostReason) -> Result<Self, Self::Error> {
        match raw {
            RawHostReason::Code(code) => {
                Self::from_code(code).ok_or_else(|| UnknownHostReason(code.to_string()))
            }
            RawHostReason::Name(name) => name.parse(),
        }
    }
}

impl HostReason {
    pub const ALL: [HostReason; 8] = [
        Self::AppStartup,
        Self::AppShutdown,
        Self::AddonEnable,
        Self::AddonDisable,
        Self::AddonInstall,
        Self::AddonUninstall,
        Self::AddonUpgrade,
        Self::AddonDowngrade,
    ];

    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::AppStartup),
            2 => Some(Self::AppShutdown),
            3 => Some(Self::AddonEnable),
            4 => Some(Self::AddonDisable),
            5 => Some(Self::AddonInstall),
            6 => Some(Self::AddonUninstall),
            7 => Some(Self::AddonUpgrade),
            8 => Some(Self::AddonDowngrade),
            _ => None,
        }
    }

    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::AppStartup => 1,
            Self::AppShutdown => 2,
            Self::AddonEnable => 3,
            Self::AddonDisable => 4,
            Self::AddonInstall => 5,
            Self::AddonUninstall => 6,
            Self::AddonUpgrade => 7,
            Self::AddonDowngrade => 8,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AppStartup => "APP_STARTUP",
            Self::AppShutdown => "APP_SHUTDOWN",
            Self::AddonEnable => "ADDON_ENABLE",
            Self::AddonDisable => "ADDON_DISABLE",
            Self::AddonInstall => "ADDON_INSTALL",
            Self::AddonUninstall => "ADDON_UNINSTALL",
            Self::AddonUpgrade => "ADDON_UPGRADE",
            Self::AddonDowngrade => "ADDON_DOWNGRADE",
        }
    }

    /// Uninstall and disable remove the study from this profile.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::AddonUninstall | Self::AddonDisable)
    }
}

impl FromStr for HostReason {
    type Err = UnknownHostReason;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(code) = trimmed.parse::<u32>() {
            return Self::from_code(code).ok_or_else(|| UnknownHostReason(trimmed.to_string()));
        }
        Self::ALL
            .into_iter()
            .find(|reason| reason.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownHostReason(trimmed.to_string()))
    }
}

impl Serialize for HostReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for HostReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle callback delivered by the host loader.
///
/// ```json
/// {"event": "startup", "reason": "ADDON_INSTALL"}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "reason", rename_all = "lowercase")]
pub enum LifecycleEvent {
    Install(HostReason),
    Startup(HostReason),
    Shutdown(HostReason),
    Uninstall(HostReason),
    Upgrade(HostReason),
    Disable(HostReason),
}

impl LifecycleEvent {
    #[must_use]
    pub const fn reason(self) -> HostReason {
        match self {
            Self::Install(reason)
            | Self::Startup(reason)
            | Self::Shutdown(reason)
            | Self::Uninstall(reason)
            | Self::Upgrade(reason)
            | Self::Disable(reason) => reason,
        }
    }

    #[must_use]
    pub const fn kind(self) -> &'static str {
        match self {
            Self::Install(_) => "install",
            Self::Startup(_) => "startup",
            Self::Shutdown(_) => "shutdown",
            Self::Uninstall(_) => "uninstall",
            Self::Upgrade(_) => "upgrade",
            Self::Disable(_) => "disable",
        }
    }

    /// A shutdown-class event whose reason removes the study.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Shutdown(_) | Self::Uninstall(_) | Self::Disable(_)
        ) && self.reason().is_terminal()
    }

    /// The host delivers a fresh install as `install`/`startup` with `ADDON_INSTALL`.
    #[must_use]
    pub const fn is_first_install(self) -> bool {
        matches!(self, Self::Install(HostReason::AddonInstall) | Self::Startup(HostReason::AddonInstall))
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.reason())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    NotStarted,
    Installing,
    Evaluating,
    Active,
    Ending,
    Stopped,
}

impl LifecycleState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Installing => "installing",
            Self::Evaluating => "evaluating",
            Self::Active => "active",
            Self::Ending => "ending",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
