//! Study telemetry records and sinks.
//!
//! Emission is fire-and-forget from the state machine's perspective:
//! [`Telemetry::emit`] logs sink failures and returns. Nothing in the
//! lifecycle waits on, or aborts because of, a telemetry write.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use shield_types::{EndingCategory, EndingReason, StudyName, TelemetrySettings, VariationName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    /// First-seen: a fresh install entered the study funnel.
    Enter,
    Installed,
    Ineligible,
    Expired,
    UserDisable,
    EndedPositive,
    EndedNeutral,
    EndedNegative,
    /// Always follows an ending record.
    Exit,
    /// Informational record describing the resolved variation.
    Startup,
    /// Payload forwarded from the embedded extension.
    Addon,
}

impl EventType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enter => "enter",
            Self::Installed => "installed",
            Self::Ineligible => "ineligible",
            Self::Expired => "expired",
            Self::UserDisable => "user-disable",
            Self::EndedPositive => "ended-positive",
            Self::EndedNeutral => "ended-neutral",
            Self::EndedNegative => "ended-negative",
            Self::Exit => "exit",
            Self::Startup => "startup",
            Self::Addon => "addon",
        }
    }

    #[must_use]
    pub const fn is_ending(self) -> bool {
        matches!(
            self,
            Self::Ineligible
                | Self::Expired
                | Self::UserDisable
                | Self::EndedPositive
                | Self::EndedNeutral
                | Self::EndedNegative
        )
    }

    /// Telemetry state reported for an ending reason.
    ///
    /// Built-in reasons have their own state; anything else is reported
    /// through its configured category, neutral when none is configured.
    #[must_use]
    pub fn for_ending(reason: &EndingReason, category: Option<EndingCategory>) -> Self {
        if *reason == EndingReason::INELIGIBLE {
            return Self::Ineligible;
        }
        if *reason == EndingReason::EXPIRED {
            return Self::Expired;
        }
        if *reason == EndingReason::USER_DISABLE {
            return Self::UserDisable;
        }
        match category.unwrap_or_default() {
            EndingCategory::Positive => Self::EndedPositive,
            EndingCategory::Neutral => Self::EndedNeutral,
            EndingCategory::Negative => Self::EndedNegative,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub event_type: EventType,
    pub study_name: StudyName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<VariationName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<EndingReason>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    pub testing: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry write failed: {0}")]
    Io(#[from] io::Error),
    #[error("telemetry record could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("telemetry sink rejected record: {0}")]
    Rejected(String),
}

/// Opaque destination for telemetry records.
pub trait TelemetrySink: Send + Sync {
    fn submit(&self, record: &TelemetryRecord) -> Result<(), TelemetryError>;
}

/// Stamps records for one study and forwards them to a sink.
#[derive(Clone)]
pub struct Telemetry {
    sink: Arc<dyn TelemetrySink>,
    study: StudyName,
    settings: TelemetrySettings,
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telemetry")
            .field("study", &self.study)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Telemetry {
    #[must_use]
    pub fn new(sink: Arc<dyn TelemetrySink>, study: StudyName, settings: TelemetrySettings) -> Self {
        Self {
            sink,
            study,
            settings,
        }
    }

    #[must_use]
    pub fn record(&self, event_type: EventType) -> TelemetryRecord {
        TelemetryRecord {
            event_type,
            study_name: self.study.clone(),
            variation: None,
            reason: None,
            data: BTreeMap::new(),
            testing: !self.settings.remove_testing_flag,
            timestamp: Utc::now(),
        }
    }

    pub fn emit(&self, record: TelemetryRecord) {
        if !self.settings.send {
            tracing::debug!(event = %record.event_type, "Telemetry disabled; record not sent");
            return;
        }
        match self.sink.submit(&record) {
            Ok(()) => tracing::debug!(event = %record.event_type, "Telemetry sent"),
            Err(e) => tracing::warn!(event = %record.event_type, "Telemetry submission failed: {e}"),
        }
    }

    pub fn study_state(
        &self,
        event_type: EventType,
        variation: Option<&VariationName>,
        reason: Option<&EndingReason>,
    ) {
        let mut record = self.record(event_type);
        record.variation = variation.cloned();
        record.reason = reason.cloned();
        self.emit(record);
    }

    pub fn info(&self, variation: &VariationName, data: BTreeMap<String, String>) {
        let mut record = self.record(EventType::Startup);
        record.variation = Some(variation.clone());
        record.data = data;
        self.emit(record);
    }

    pub fn addon(&self, variation: Option<&VariationName>, payload: BTreeMap<String, String>) {
        let mut record = self.record(EventType::Addon);
        record.variation = variation.cloned();
        record.data = payload;
        self.emit(record);
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<TelemetryRecord>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn events(&self) -> Vec<EventType> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| r.event_type)
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

impl TelemetrySink for MemorySink {
    fn submit(&self, record: &TelemetryRecord) -> Result<(), TelemetryError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> TelemetrySink for JsonLinesSink<W> {
    fn submit(&self, record: &TelemetryRecord) -> Result<(), TelemetryError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(&line)?;
        writer.flush()?;
        Ok(())
    }
}
