//! Messages sent by an embedded extension to the study core.
//!
//! The wire shape is `{"shield": true, "msg": "info" | "endStudy" | "telemetry", "data": ...}`.
//! Anything without `shield: true`, or with another `msg`, belongs to some
//! other listener and is ignored rather than rejected.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

use crate::{EmptyNameError, EndingReason};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionMessage {
    Info,
    EndStudy { reason: EndingReason },
    Telemetry { payload: BTreeMap<String, String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("endStudy message is missing data.reason")]
    MissingReason,
    #[error("endStudy reason is invalid: {0}")]
    InvalidReason(#[from] EmptyNameError),
    #[error("telemetry payload must be an object of string values (offending key: {0:?})")]
    TelemetryPayload(Option<String>),
}

impl ExtensionMessage {
    /// Parse a raw message. `Ok(None)` means "not for us".
    pub fn from_value(value: &Value) -> Result<Option<Self>, MessageError> {
        let Some(fields) = value.as_object() else {
            return Ok(None);
        };
        if fields.get("shield").and_then(Value::as_bool) != Some(true) {
            return Ok(None);
        }
        let data = fields.get("data").unwrap_or(&Value::Null);

        match fields.get("msg").and_then(Value::as_str) {
            Some("info") => Ok(Some(Self::Info)),
            Some("endStudy") => {
                let raw = data
                    .get("reason")
                    .and_then(Value::as_str)
                    .or_else(|| data.as_str())
                    .ok_or(MessageError::MissingReason)?;
                Ok(Some(Self::EndStudy {
                    reason: EndingReason::new(raw)?,
                }))
            }
            Some("telemetry") => {
                let object = data
                    .as_object()
                    .ok_or(MessageError::TelemetryPayload(None))?;
                let mut payload = BTreeMap::new();
                for (key, value) in object {
                    let text = value
                        .as_str()
                        .ok_or_else(|| MessageError::TelemetryPayload(Some(key.clone())))?;
                    payload.insert(key.clone(), text.to_string());
                }
                Ok(Some(Self::Telemetry { payload }))
            }
            _ => Ok(None),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::EndStudy { .. } => "endStudy",
            Self::Telemetry { .. } => "telemetry",
        }
    }
}
